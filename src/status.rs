/// Status Broadcaster: holds the single `Status` record and notifies its
/// one subscriber (the WebSocket fan-out, out of scope here) after every
/// mutation becomes visible.
///
/// Grounded on the teacher's `state.rs` `watch::channel::<AgentState>`
/// pattern — hold current value, notify on change, consumer awaits
/// `.changed()`. `tokio::sync::watch` already serializes "mutate, then
/// notify" the way §4.11 requires, since the callback only fires once the
/// new value is stored in the channel.
use tokio::sync::watch;

use crate::model::{CommandId, DeviceId, DeviceState, SceneId, SceneStatus, Status};

pub struct Broadcaster {
    tx: watch::Sender<Status>,
}

impl Broadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Status::default());
        Self { tx }
    }

    pub fn get_current_status(&self) -> Status {
        self.tx.borrow().clone()
    }

    /// The single subscriber's handle — typically held by the WS fan-out
    /// task, awaiting `.changed()` in a loop.
    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    pub fn update_device_status(&self, device_id: DeviceId, new_power_state: Option<bool>, new_input: Option<CommandId>, toggle_power: bool) {
        self.tx.send_modify(|status| {
            let state = status.devices.entry(device_id).or_default();
            if let Some(powered) = new_power_state {
                state.powered = powered;
            }
            if toggle_power {
                state.powered = !state.powered;
            }
            if let Some(input) = new_input {
                state.input = Some(input);
            }
        });
    }

    pub fn device_state(&self, device_id: DeviceId) -> DeviceState {
        self.tx.borrow().devices.get(&device_id).copied().unwrap_or_default()
    }

    pub fn set_scene(&self, scene_id: SceneId, scene_status: SceneStatus) {
        self.tx.send_modify(|status| {
            status.current_scene = Some(scene_id);
            status.scene_status = Some(scene_status);
        });
    }

    pub fn set_scene_status(&self, scene_status: SceneStatus) {
        self.tx.send_modify(|status| {
            status.scene_status = Some(scene_status);
        });
    }

    pub fn clear_scene(&self) {
        self.tx.send_modify(|status| {
            status.current_scene = None;
            status.scene_status = None;
        });
    }
}

impl Default for Broadcaster {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invariant_holds_across_scene_lifecycle() {
        let b = Broadcaster::new();
        assert!(b.get_current_status().invariant_holds());

        b.set_scene(SceneId(1), SceneStatus::Starting);
        assert!(b.get_current_status().invariant_holds());
        assert_eq!(b.get_current_status().current_scene, Some(SceneId(1)));

        b.clear_scene();
        assert!(b.get_current_status().invariant_holds());
        assert_eq!(b.get_current_status().current_scene, None);
    }

    #[tokio::test]
    async fn subscriber_observes_mutation_after_it_is_visible() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();

        b.update_device_status(DeviceId(7), Some(true), None, false);
        rx.changed().await.unwrap();
        assert!(rx.borrow().devices.get(&DeviceId(7)).unwrap().powered);
        // Matches what get_current_status already reports, proving the
        // watch fired only after the mutation was stored.
        assert_eq!(*rx.borrow(), b.get_current_status());
    }

    #[test]
    fn toggle_power_flips_current_state() {
        let b = Broadcaster::new();
        b.update_device_status(DeviceId(1), Some(true), None, false);
        assert!(b.device_state(DeviceId(1)).powered);
        b.update_device_status(DeviceId(1), None, None, true);
        assert!(!b.device_state(DeviceId(1)).powered);
    }
}
