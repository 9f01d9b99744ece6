/// Task Queue: single-consumer, multi-producer FIFO driving every dispatch,
/// scene transition, and release action through one cooperative worker.
///
/// Grounded on the teacher's channel-based hand-off style in `main.rs`
/// (`tokio::sync::mpsc` carrying work from producer threads/tasks to a
/// single consumer task). A `release_all` is not a second channel with its
/// own priority: it is a `Task::Sync` variant the consumer runs inline,
/// without awaiting IO, matching §4.10's "pre-empt held state with minimum
/// latency" requirement without adding a second polling branch.
use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;

type BoxedFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type SyncFn = Box<dyn FnOnce() + Send>;

enum Task {
    Async(BoxedFuture),
    Sync(SyncFn),
}

#[derive(Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<Task>,
}

pub struct Consumer {
    rx: mpsc::Receiver<Task>,
}

impl TaskQueue {
    pub fn new(capacity: usize) -> (Self, Consumer) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, Consumer { rx })
    }

    /// Enqueues an async task. Preserves FIFO order relative to every other
    /// enqueue from the same producer (§5).
    pub async fn enqueue_task<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.tx.send(Task::Async(Box::pin(future))).await.is_err() {
            log::warn!("task queue consumer has shut down, dropping enqueued task");
        }
    }

    /// Enqueues a synchronous task, run inline by the consumer without
    /// awaiting any IO — used for `release_all`.
    pub async fn enqueue_sync_task<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Task::Sync(Box::new(task))).await.is_err() {
            log::warn!("task queue consumer has shut down, dropping enqueued sync task");
        }
    }
}

impl Consumer {
    /// Drains tasks in enqueue order until the queue is closed (all
    /// `TaskQueue` handles dropped). Intended to be spawned once as the
    /// control plane's sole cooperative worker.
    pub async fn run(mut self) {
        while let Some(task) = self.rx.recv().await {
            match task {
                Task::Async(future) => future.await,
                Task::Sync(task) => task(),
            }
        }
        log::debug!("task queue consumer exiting, channel closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn tasks_execute_in_enqueue_order() {
        let (queue, consumer) = TaskQueue::new(16);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        for i in 0..5 {
            let order = order.clone();
            queue.enqueue_task(async move { order.lock().unwrap().push(i) }).await;
        }
        drop(queue);
        consumer.run().await;

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn sync_task_runs_without_awaiting_io() {
        let (queue, consumer) = TaskQueue::new(16);
        let released = Arc::new(AtomicUsize::new(0));

        let r = released.clone();
        queue.enqueue_sync_task(move || { r.fetch_add(1, Ordering::SeqCst); }).await;
        drop(queue);
        consumer.run().await;

        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mixed_sync_and_async_preserve_order() {
        let (queue, consumer) = TaskQueue::new(16);
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        queue.enqueue_task(async move { o1.lock().unwrap().push("async-1") }).await;
        let o2 = order.clone();
        queue.enqueue_sync_task(move || o2.lock().unwrap().push("sync")).await;
        let o3 = order.clone();
        queue.enqueue_task(async move { o3.lock().unwrap().push("async-2") }).await;

        drop(queue);
        consumer.run().await;

        assert_eq!(*order.lock().unwrap(), vec!["async-1", "sync", "async-2"]);
    }
}
