/// Scene State Machine: `Idle | Starting(scene) | Active(scene) |
/// Stopping(scene)`, realized as a flat enum switched on in `Engine`,
/// matching the teacher's preference for small enums over a trait-object
/// state pattern (`mapper.rs::Profile`).
///
/// Grounded on `RemoteController.py::start_scene`/`stop_current_scene`/
/// `set_current_scene`/`execute_macro`.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};

use crate::ble::peripheral::BlePeripheral;
use crate::dispatcher::{Dispatcher, Modifiers};
use crate::error::{Error, Result};
use crate::model::{ButtonRole, Command, CommandId, DeviceId, Keymap, Macro, Scene, SceneId, SceneStatus};
use crate::status::Broadcaster;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    Idle,
    Starting(SceneId),
    Active(SceneId),
    Stopping(SceneId),
}

/// Resolves a `Scene`/`Macro`/`Command` by id. The storage layer (§6,
/// component M) is out of scope; callers wire in whatever lookup they have
/// (DB-backed, in-memory, config-loaded).
#[async_trait::async_trait]
pub trait SceneStore: Send + Sync {
    async fn get_scene(&self, id: SceneId) -> Option<Scene>;
    async fn get_macro(&self, id: MacroRef) -> Option<Macro>;
    async fn get_command(&self, id: CommandId) -> Option<Command>;

    /// Loads the per-scene command table `config/keymap_{name}.json`
    /// (§4.9, §6). `name = "default"` is the neutral table loaded when no
    /// scene is active.
    async fn load_keymap(&self, name: &str) -> Keymap;
}

pub type MacroRef = crate::model::MacroId;

/// Name of the neutral per-scene command table loaded when no scene is
/// active, or restored on `stop()` (§4.8, §6).
pub const DEFAULT_KEYMAP_NAME: &str = "default";

pub struct Engine<S: SceneStore> {
    store: Arc<S>,
    dispatcher: Arc<Dispatcher>,
    status: Arc<Broadcaster>,
    ble: Option<Arc<BlePeripheral>>,
    state: Mutex<State>,
    keymap_tx: watch::Sender<Keymap>,
}

impl<S: SceneStore> Engine<S> {
    pub fn new(store: Arc<S>, dispatcher: Arc<Dispatcher>, status: Arc<Broadcaster>, ble: Option<Arc<BlePeripheral>>) -> Self {
        let (keymap_tx, _) = watch::channel(Keymap::default());
        Self { store, dispatcher, status, ble, state: Mutex::new(State::Idle), keymap_tx }
    }

    /// The currently-active per-scene command table (§4.9): the global scene
    /// scheduler's input router subscribes to this instead of re-reading a
    /// file from disk, since the active table is scene-engine state, not
    /// on-disk state.
    pub fn subscribe_keymap(&self) -> watch::Receiver<Keymap> {
        self.keymap_tx.subscribe()
    }

    /// Loads and publishes the neutral default table. Call once at boot,
    /// before any scene has started.
    pub async fn reload_default_keymap(&self) {
        let keymap = self.store.load_keymap(DEFAULT_KEYMAP_NAME).await;
        let _ = self.keymap_tx.send(keymap);
    }

    pub async fn current_state(&self) -> State {
        self.state.lock().await.clone()
    }

    /// `Idle -> Active(scene)` or, if another scene is already active,
    /// handles handover: computes the skip-set from the *incoming* scene's
    /// start macro, stops the outgoing scene with that skip-set, then
    /// proceeds as a fresh start.
    pub async fn start(&self, scene_id: SceneId) -> Result<Keymap> {
        let scene = self.store.get_scene(scene_id).await.ok_or_else(|| Error::NotFound(format!("scene {scene_id}")))?;

        let previous = self.state.lock().await.clone();
        if let State::Active(prev_id) = previous {
            let skip = self.skip_set_for_incoming(&scene).await;
            self.stop_inner(prev_id, skip).await?;
        }

        *self.state.lock().await = State::Starting(scene_id);
        self.status.set_scene(scene_id, SceneStatus::Starting);

        if let Some(peer) = &scene.bluetooth_peer {
            if let Some(ble) = &self.ble {
                let _ = ble.connect(peer, Some(Duration::from_secs(10))).await;
            }
        }

        if let Some(macro_id) = scene.start_macro {
            if let Some(m) = self.store.get_macro(macro_id).await {
                self.execute_macro(&m, Modifiers { from_start: true, ..Default::default() }).await;
            }
        }

        let keymap_name = scene.keymap_name.as_deref().unwrap_or(DEFAULT_KEYMAP_NAME);
        let keymap = self.store.load_keymap(keymap_name).await;
        let _ = self.keymap_tx.send(keymap.clone());

        *self.state.lock().await = State::Active(scene_id);
        self.status.set_scene_status(SceneStatus::Active);
        log::info!("scene {} started", scene.name);

        Ok(keymap)
    }

    /// Devices named by the incoming scene's start macro with a
    /// POWER_ON/POWER_TOGGLE step — these must not be powered down by the
    /// outgoing scene's stop macro during handover (§4.8).
    async fn skip_set_for_incoming(&self, incoming: &Scene) -> HashSet<DeviceId> {
        let mut skip = HashSet::new();
        let Some(macro_id) = incoming.start_macro else { return skip };
        let Some(m) = self.store.get_macro(macro_id).await else { return skip };
        for command_id in &m.commands {
            if let Some(command) = self.store.get_command(*command_id).await {
                if let Some(device) = command.device {
                    if matches!(command.button, ButtonRole::PowerOn | ButtonRole::PowerToggle) {
                        skip.insert(device);
                    }
                }
            }
        }
        skip
    }

    /// `Active -> Idle`: runs only the stop-macro steps whose button is
    /// POWER_OFF/POWER_TOGGLE and whose device is not in `skip`, each with
    /// `from_stop`. INPUT-group steps are never filtered (Open Question
    /// resolution in DESIGN.md).
    pub async fn stop(&self) -> Result<()> {
        let current = match self.state.lock().await.clone() {
            State::Active(id) => id,
            _ => return Err(Error::NotFound("no scene active".into())),
        };
        self.stop_inner(current, HashSet::new()).await
    }

    async fn stop_inner(&self, scene_id: SceneId, skip_power_down_for: HashSet<DeviceId>) -> Result<()> {
        let scene = self.store.get_scene(scene_id).await.ok_or_else(|| Error::NotFound(format!("scene {scene_id}")))?;

        let default_keymap = self.store.load_keymap(DEFAULT_KEYMAP_NAME).await;
        let _ = self.keymap_tx.send(default_keymap);

        *self.state.lock().await = State::Stopping(scene_id);
        self.status.set_scene_status(SceneStatus::Stopping);

        if let Some(peer) = &scene.bluetooth_peer {
            if let Some(ble) = &self.ble {
                let _ = ble.disconnect(peer).await;
            }
        }

        if let Some(macro_id) = scene.stop_macro {
            if let Some(m) = self.store.get_macro(macro_id).await {
                for (i, command_id) in m.commands.iter().enumerate() {
                    let Some(command) = self.store.get_command(*command_id).await else { continue };
                    let targets_skipped_device = command.device.map(|d| skip_power_down_for.contains(&d)).unwrap_or(false);
                    let is_power_down_step = matches!(command.button, ButtonRole::PowerOff | ButtonRole::PowerToggle);
                    if is_power_down_step && !targets_skipped_device {
                        if let Err(e) = self.dispatcher.dispatch(&command, Modifiers { from_stop: true, ..Default::default() }).await {
                            log::warn!("stop-macro step {} failed: {e}", command.name);
                        }
                        if let Some(delay) = m.delay_after(i) {
                            tokio::time::sleep(Duration::from_millis(delay)).await;
                        }
                    }
                }
            }
        }

        *self.state.lock().await = State::Idle;
        self.status.clear_scene();
        log::info!("scene {} stopped", scene.name);
        Ok(())
    }

    /// Recomputes `DeviceState` as if `start` then `stop` of the prior
    /// scene had run, without actually executing any commands. Used when a
    /// scene is known to already be physically active (e.g. resuming after
    /// a process restart).
    pub async fn set_current(&self, scene_id: SceneId) -> Result<Keymap> {
        let scene = self.store.get_scene(scene_id).await.ok_or_else(|| Error::NotFound(format!("scene {scene_id}")))?;

        if let State::Active(prev_id) = self.state.lock().await.clone() {
            if let Some(prev) = self.store.get_scene(prev_id).await {
                if let Some(macro_id) = prev.stop_macro {
                    if let Some(m) = self.store.get_macro(macro_id).await {
                        self.apply_states_for_macro(&m).await;
                    }
                }
            }
        }

        if let Some(macro_id) = scene.start_macro {
            if let Some(m) = self.store.get_macro(macro_id).await {
                self.apply_states_for_macro(&m).await;
            }
        }

        if let Some(peer) = &scene.bluetooth_peer {
            if let Some(ble) = &self.ble {
                let _ = ble.connect(peer, Some(Duration::from_secs(10))).await;
            }
        }

        let keymap_name = scene.keymap_name.as_deref().unwrap_or(DEFAULT_KEYMAP_NAME);
        let keymap = self.store.load_keymap(keymap_name).await;
        let _ = self.keymap_tx.send(keymap.clone());

        *self.state.lock().await = State::Active(scene_id);
        self.status.set_scene(scene_id, SceneStatus::Active);
        log::info!("set {} as current scene", scene.name);
        Ok(keymap)
    }

    async fn apply_states_for_macro(&self, m: &Macro) {
        for command_id in &m.commands {
            if let Some(command) = self.store.get_command(*command_id).await {
                let Some(device) = command.device else { continue };
                if command.group == crate::model::CommandGroup::Input {
                    self.status.update_device_status(device, Some(true), Some(command.id), false);
                }
                match command.button {
                    ButtonRole::PowerOn => self.status.update_device_status(device, Some(true), None, false),
                    ButtonRole::PowerOff => self.status.update_device_status(device, Some(false), None, false),
                    ButtonRole::PowerToggle => self.status.update_device_status(device, None, None, true),
                    _ => {}
                }
            }
        }
    }

    /// Dispatches each command in sequence, sleeping `delays_ms[i]` before
    /// the next. Per-step failures are logged and the macro proceeds
    /// (§7 policy).
    async fn execute_macro(&self, m: &Macro, modifiers: Modifiers) {
        for (i, command_id) in m.commands.iter().enumerate() {
            let Some(command) = self.store.get_command(*command_id).await else {
                log::warn!("macro references missing command {command_id}");
                continue;
            };
            if let Err(e) = self.dispatcher.dispatch(&command, modifiers).await {
                log::warn!("macro step {} failed: {e}", command.name);
            }
            if let Some(delay) = m.delay_after(i) {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::hardware::FakeIrHardware;
    use crate::ir::transceiver::Transceiver;
    use crate::model::{CommandGroup, CommandPayload, MacroId};
    use std::collections::HashMap;

    struct InMemoryStore {
        scenes: HashMap<SceneId, Scene>,
        macros: HashMap<MacroId, Macro>,
        commands: HashMap<CommandId, Command>,
        keymaps: HashMap<String, Keymap>,
    }

    #[async_trait::async_trait]
    impl SceneStore for InMemoryStore {
        async fn get_scene(&self, id: SceneId) -> Option<Scene> {
            self.scenes.get(&id).cloned()
        }
        async fn get_macro(&self, id: MacroRef) -> Option<Macro> {
            self.macros.get(&id).cloned()
        }
        async fn get_command(&self, id: CommandId) -> Option<Command> {
            self.commands.get(&id).cloned()
        }
        async fn load_keymap(&self, name: &str) -> Keymap {
            self.keymaps.get(name).cloned().unwrap_or_default()
        }
    }

    fn ir(id: u64, device: u64, button: ButtonRole, group: CommandGroup) -> Command {
        Command { id: CommandId(id), name: format!("cmd-{id}"), device: Some(DeviceId(device)), button, group, payload: CommandPayload::Ir(vec![9000, 4500, 560, 560]) }
    }

    fn setup() -> (Engine<InMemoryStore>, Arc<Broadcaster>, Arc<FakeIrHardware>) {
        let power_on_tv = ir(1, 1, ButtonRole::PowerOn, CommandGroup::Other);
        let select_input = ir(2, 1, ButtonRole::Select, CommandGroup::Input);
        let power_off_tv = ir(3, 1, ButtonRole::PowerOff, CommandGroup::Other);
        let power_off_amp = ir(4, 2, ButtonRole::PowerOff, CommandGroup::Other);

        let start_b = Macro { id: MacroId(1), name: "start-b".into(), commands: vec![CommandId(1), CommandId(2)], delays_ms: vec![0] };
        let stop_a = Macro { id: MacroId(2), name: "stop-a".into(), commands: vec![CommandId(3), CommandId(4)], delays_ms: vec![0] };

        let scene_a = Scene { id: SceneId(10), name: "A".into(), bluetooth_peer: None, keymap_name: None, start_macro: None, stop_macro: Some(MacroId(2)), devices: vec![DeviceId(1), DeviceId(2)] };
        let scene_b = Scene { id: SceneId(20), name: "B".into(), bluetooth_peer: None, keymap_name: Some("scene-b".into()), start_macro: Some(MacroId(1)), stop_macro: None, devices: vec![DeviceId(1)] };

        let mut scenes = HashMap::new();
        scenes.insert(SceneId(10), scene_a);
        scenes.insert(SceneId(20), scene_b);
        let mut macros = HashMap::new();
        macros.insert(MacroId(1), start_b);
        macros.insert(MacroId(2), stop_a);
        let mut commands = HashMap::new();
        for c in [power_on_tv, select_input, power_off_tv, power_off_amp] {
            commands.insert(c.id, c);
        }

        let mut keymaps = HashMap::new();
        keymaps.insert(DEFAULT_KEYMAP_NAME.to_string(), Keymap::default());
        let mut scene_b_bindings = HashMap::new();
        scene_b_bindings.insert("BTN_1".to_string(), CommandId(2));
        keymaps.insert("scene-b".to_string(), Keymap { scene_bindings: HashMap::new(), command_bindings: scene_b_bindings });

        let store = Arc::new(InMemoryStore { scenes, macros, commands, keymaps });
        let status = Arc::new(Broadcaster::new());
        let hw = Arc::new(FakeIrHardware::new());
        let transceiver = Arc::new(Transceiver::new(hw.clone(), 108, 100, 512));
        let dispatcher = Arc::new(Dispatcher::new(status.clone(), transceiver, None, None));
        (Engine::new(store, dispatcher, status.clone(), None), status, hw)
    }

    #[tokio::test]
    async fn cross_scene_handover_skips_power_off_for_incoming_device() {
        let (engine, status, hw) = setup();
        engine.start(SceneId(10)).await.unwrap();
        assert_eq!(engine.current_state().await, State::Active(SceneId(10)));

        hw.transmitted.lock().await.clear();
        engine.start(SceneId(20)).await.unwrap();

        assert_eq!(engine.current_state().await, State::Active(SceneId(20)));
        // power_on_tv, select_input both emitted (2); power_off_tv skipped
        // (device 1 in skip-set); power_off_amp emitted (device 2 not skipped).
        assert_eq!(hw.transmitted.lock().await.len(), 3);

        let dev1 = status.device_state(DeviceId(1));
        assert!(dev1.powered);
        assert_eq!(dev1.input, Some(CommandId(2)));
        assert!(!status.device_state(DeviceId(2)).powered);
    }

    #[tokio::test]
    async fn stop_with_no_active_scene_errors() {
        let (engine, _status, _hw) = setup();
        assert!(matches!(engine.stop().await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn plain_stop_runs_full_stop_macro() {
        let (engine, status, hw) = setup();
        engine.start(SceneId(10)).await.unwrap();
        hw.transmitted.lock().await.clear();

        engine.stop().await.unwrap();
        assert_eq!(engine.current_state().await, State::Idle);
        assert_eq!(hw.transmitted.lock().await.len(), 2);
        assert!(!status.device_state(DeviceId(1)).powered);
        assert!(!status.device_state(DeviceId(2)).powered);
        assert_eq!(status.get_current_status().current_scene, None);
    }

    #[tokio::test]
    async fn starting_a_scene_publishes_its_keymap_and_stop_restores_default() {
        let (engine, _status, _hw) = setup();
        let mut rx = engine.subscribe_keymap();

        engine.reload_default_keymap().await;
        assert!(rx.borrow().command_bindings.is_empty());

        let started = engine.start(SceneId(20)).await.unwrap();
        assert_eq!(started.command_bindings.get("BTN_1"), Some(&CommandId(2)));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().command_bindings.get("BTN_1"), Some(&CommandId(2)));

        engine.stop().await.unwrap();
        rx.changed().await.unwrap();
        assert!(rx.borrow().command_bindings.is_empty());
    }
}
