/// IR Transceiver: drives the transmitter for a pulse array, optionally with
/// held-key repeat; records a pulse array from the receiver under a
/// cancellable session. Hardware access flows through `IrHardware` so the
/// state machine here is unit-testable without real GPIO/PWM.

use std::sync::Arc;

use tokio::sync::{watch, Mutex};

use crate::error::{Error, Result};
use crate::ir::codec::{self, Protocol};
use crate::ir::hardware::IrHardware;
use crate::model::PulseArray;

#[derive(Debug, Clone, PartialEq)]
pub enum RecordEvent {
    RecordingStarted,
    PulseCaptured(u32),
    RecordingDone(PulseArray),
    Cancelled,
}

/// Only one record and one transmit may be in flight at a time; hardware is
/// a single transceiver. Serialised upstream by the Task Queue, but the
/// transceiver itself also enforces "starting a new one cancels the prior".
pub struct Transceiver {
    hardware: Arc<dyn IrHardware>,
    repeat_interval_ms: u64,
    recording_silence_ms: u64,
    max_pulses: usize,
    repeat_cancel: Mutex<Option<watch::Sender<bool>>>,
    record_cancel: Mutex<Option<watch::Sender<bool>>>,
}

impl Transceiver {
    pub fn new(
        hardware: Arc<dyn IrHardware>,
        repeat_interval_ms: u64,
        recording_silence_ms: u64,
        max_pulses: usize,
    ) -> Self {
        Self {
            hardware,
            repeat_interval_ms,
            recording_silence_ms,
            max_pulses,
            repeat_cancel: Mutex::new(None),
            record_cancel: Mutex::new(None),
        }
    }

    /// Drive the transmitter once.
    pub async fn send(&self, pulses: &PulseArray) -> Result<()> {
        self.stop_repeating().await;
        self.hardware.transmit(pulses).await
    }

    /// Emit once, then emit the protocol-appropriate repeat burst every
    /// `repeat_interval_ms` until `stop_repeating` is called. Starting a new
    /// `send_and_repeat` cancels any prior repeat.
    pub async fn send_and_repeat(self: &Arc<Self>, pulses: PulseArray) -> Result<()> {
        self.stop_repeating().await;

        self.hardware.transmit(&pulses).await?;

        let detected = codec::detect(&pulses);
        let repeat_burst = repeat_burst_for(detected.protocol, &pulses);

        let (tx, mut rx) = watch::channel(false);
        *self.repeat_cancel.lock().await = Some(tx);

        let hardware = Arc::clone(&self.hardware);
        let interval_ms = self.repeat_interval_ms;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(std::time::Duration::from_millis(interval_ms)) => {
                        if hardware.transmit(&repeat_burst).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(())
    }

    /// Stop any in-flight repeat. No-op if none is active.
    pub async fn stop_repeating(&self) {
        if let Some(tx) = self.repeat_cancel.lock().await.take() {
            let _ = tx.send(true);
        }
    }

    /// Opens the receiver, streaming progress events to `event_sink`, and
    /// yields the captured array when a trailing silence is observed or the
    /// length cap is reached. A new `record` while one is active cancels the
    /// previous, which resolves with `RecordEvent::Cancelled`.
    pub async fn record(
        self: &Arc<Self>,
        event_sink: tokio::sync::mpsc::Sender<RecordEvent>,
    ) -> Result<PulseArray> {
        if let Some(prev) = self.record_cancel.lock().await.take() {
            let _ = prev.send(true);
        }

        let (tx, rx) = watch::channel(false);
        *self.record_cancel.lock().await = Some(tx);

        let _ = event_sink.send(RecordEvent::RecordingStarted).await;

        let result = self
            .hardware
            .receive(self.recording_silence_ms, self.max_pulses, rx)
            .await;

        match result {
            Ok(pulses) => {
                for &p in &pulses {
                    let _ = event_sink.send(RecordEvent::PulseCaptured(p)).await;
                }
                let _ = event_sink.send(RecordEvent::RecordingDone(pulses.clone())).await;
                Ok(pulses)
            }
            Err(Error::Cancelled) => {
                let _ = event_sink.send(RecordEvent::Cancelled).await;
                Err(Error::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// Cancel the in-flight recording session, if any.
    pub async fn cancel_recording(&self) {
        if let Some(tx) = self.record_cancel.lock().await.take() {
            let _ = tx.send(true);
        }
    }
}

/// Builds the repeat burst for a held key: NEC's 9000/2250/560 burst for NEC
/// family protocols, otherwise the original pulse array retransmitted.
fn repeat_burst_for(protocol: Protocol, original: &PulseArray) -> PulseArray {
    match protocol {
        Protocol::Nec | Protocol::NecRepeat => vec![9000, 2250, 560],
        _ => original.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::hardware::FakeIrHardware;

    #[tokio::test]
    async fn send_transmits_once() {
        let hw = Arc::new(FakeIrHardware::new());
        let tc = Transceiver::new(hw.clone(), 108, 100, 512);
        tc.send(&vec![9000, 4500, 560, 560]).await.unwrap();
        assert_eq!(hw.transmitted.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn send_and_repeat_emits_initial_burst_then_repeats() {
        let hw = Arc::new(FakeIrHardware::new());
        let tc = Arc::new(Transceiver::new(hw.clone(), 20, 100, 512));
        tc.send_and_repeat(vec![9000, 4500, 560, 560]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        tc.stop_repeating().await;
        let sent = hw.transmitted.lock().await;
        assert!(sent.len() >= 2, "expected at least an initial burst + one repeat, got {}", sent.len());
        assert_eq!(sent[1], vec![9000, 2250, 560]);
    }

    #[tokio::test]
    async fn record_emits_progress_and_resolves() {
        let hw = Arc::new(FakeIrHardware::new());
        hw.queue_receive(vec![9000, 4500, 560, 560]).await;
        let tc = Arc::new(Transceiver::new(hw, 108, 100, 512));
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let pulses = tc.record(tx).await.unwrap();
        assert_eq!(pulses, vec![9000, 4500, 560, 560]);

        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        assert!(matches!(events.first(), Some(RecordEvent::RecordingStarted)));
        assert!(matches!(events.last(), Some(RecordEvent::RecordingDone(_))));
    }

    #[tokio::test]
    async fn second_record_cancels_first() {
        let hw = Arc::new(FakeIrHardware::new());
        // Nothing queued, so the first record call blocks forever on an empty
        // queue pop until cancelled by the second record() call.
        let tc = Arc::new(Transceiver::new(hw.clone(), 108, 100, 512));
        let (tx1, mut rx1) = tokio::sync::mpsc::channel(16);
        let tc1 = Arc::clone(&tc);
        let first = tokio::spawn(async move { tc1.record(tx1).await });

        // Give the first record a moment to register its cancel sender.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        hw.queue_receive(vec![8000, 4000, 560, 560]).await;
        let (tx2, _rx2) = tokio::sync::mpsc::channel(16);
        let second = tc.record(tx2).await.unwrap();
        assert_eq!(second, vec![8000, 4000, 560, 560]);

        let first_result = first.await.unwrap();
        assert!(matches!(first_result, Err(Error::Cancelled)));
        let mut saw_cancelled = false;
        while let Ok(ev) = rx1.try_recv() {
            if matches!(ev, RecordEvent::Cancelled) {
                saw_cancelled = true;
            }
        }
        assert!(saw_cancelled);
    }
}
