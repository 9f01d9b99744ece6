/// Control Plane: the root object wiring every subsystem together and
/// driving the orderly startup/shutdown sequence. Owns nothing directly
/// reachable by the facade except through the handles it hands out —
/// `main.rs` constructs one `ControlPlane` and then just waits on a signal.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::ble::agent::PairingEvent;
use crate::ble::{BlePeripheral, BleProfileKind, PairingAgent};
use crate::config::Config;
use crate::dispatcher::{Dispatcher, Modifiers};
use crate::discovery::Announcer;
use crate::error::Result;
use crate::facade::{NullSink, PairingSink, StatusSink};
use crate::integration::IntegrationClient;
use crate::ir::hardware::IrHardware;
use crate::ir::transceiver::Transceiver;
use crate::keymap::{self, RoutedAction};
use crate::model::SceneId;
use crate::queue::{Consumer, TaskQueue};
use crate::rf::listener::{ButtonEvent, Listener};
use crate::rf::radio::RfRadio;
use crate::scene::Engine;
use crate::status::Broadcaster;
use crate::store::FileStore;

/// Everything the control plane holds that needs a coordinated shutdown.
pub struct ControlPlane {
    pub status: Arc<Broadcaster>,
    pub dispatcher: Arc<Dispatcher>,
    pub engine: Arc<Engine<FileStore>>,
    pub transceiver: Arc<Transceiver>,
    pub ble: Option<Arc<BlePeripheral>>,
    pub pairing_agent: Option<Arc<PairingAgent>>,
    pub queue: TaskQueue,
    agent_handle: Option<bluer::agent::AgentHandle>,
    rf_listener: Option<Listener>,
    announcer: Option<Announcer>,
    status_sink: Arc<dyn StatusSink>,
    pairing_sink: Arc<dyn PairingSink>,
}

impl ControlPlane {
    /// Builds every subsystem from `config`, registers the BLE GATT
    /// application if a Bluetooth adapter is reachable, starts the RF
    /// listener thread, and announces the service over mDNS.
    ///
    /// `ir_hardware`/`rf_radio` are injected so non-Linux builds (and tests)
    /// can supply fakes; `main.rs` is the only caller that picks the real
    /// hardware backends.
    pub async fn start(
        config: Config,
        ir_hardware: Arc<dyn IrHardware>,
        rf_radio: Option<Box<dyn RfRadio>>,
    ) -> Result<Self> {
        let status = Arc::new(Broadcaster::new());

        let transceiver = Arc::new(Transceiver::new(
            ir_hardware,
            config.ir.repeat_interval_ms,
            config.ir.recording_silence_ms,
            config.ir.max_pulses,
        ));

        let ble = match BlePeripheral::new(
            config.bluetooth.adapter_alias.clone(),
            Duration::from_secs(config.bluetooth.maintenance_interval_s),
            Duration::from_secs(config.bluetooth.connect_timeout_s),
        )
        .await
        {
            Ok(peripheral) => {
                if let Err(e) = peripheral.activate_profile(BleProfileKind::Remote).await {
                    log::warn!("failed to activate BLE remote profile: {e}");
                }
                Some(peripheral)
            }
            Err(e) => {
                log::warn!("no Bluetooth adapter available, BLE HID peripheral disabled: {e}");
                None
            }
        };

        if let Some(ble) = &ble {
            let maintenance_ble = ble.clone();
            tokio::spawn(async move { maintenance_ble.run_maintenance_loop().await });
        }

        let (pairing_tx, pairing_rx) = mpsc::channel(32);
        let pairing_agent = ble.as_ref().map(|_| Arc::new(PairingAgent::new(pairing_tx)));

        // Register the agent as BlueZ's default pairing agent (§4.4 step 3);
        // dropping the handle would unregister it, so it lives alongside
        // `pairing_agent` for the control plane's whole lifetime.
        let agent_handle = match (&ble, &pairing_agent) {
            (Some(ble), Some(agent)) => match ble.register_pairing_agent(agent.clone()).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log::warn!("failed to register BlueZ pairing agent: {e}");
                    None
                }
            },
            _ => None,
        };

        let pairing_sink: Arc<dyn PairingSink> = Arc::new(NullSink);
        spawn_pairing_fanout(pairing_rx, pairing_sink.clone());

        let integration = if config.integration.base_url.is_empty() {
            None
        } else {
            Some(Arc::new(IntegrationClient::new(
                &config.integration.base_url,
                config.integration.token.clone(),
                Duration::from_secs(config.integration.request_timeout_s),
            )))
        };

        let dispatcher = Arc::new(Dispatcher::new(status.clone(), transceiver.clone(), ble.clone(), integration));

        let store = Arc::new(FileStore::load(&config.paths.config_dir));
        dispatcher.prime_cache(store.commands()).await;

        let engine = Arc::new(Engine::new(store, dispatcher.clone(), status.clone(), ble.clone()));
        engine.reload_default_keymap().await;

        let (queue, consumer) = TaskQueue::new(config.queue_capacity);
        tokio::spawn(consumer.run());

        let status_sink: Arc<dyn StatusSink> = Arc::new(NullSink);
        spawn_status_fanout(status.clone(), status_sink.clone());

        let rf_listener = rf_radio.map(|radio| {
            let addresses = parse_rf_addresses(&config.rf.addresses);
            let known_commands = load_known_commands(&config.paths.config_dir);
            let (rf_tx, rf_rx) = mpsc::channel(64);
            let listener = Listener::spawn(radio, addresses, known_commands, config.rf.poll_interval_ms, rf_tx);
            spawn_input_router(rf_rx, engine.clone(), dispatcher.clone(), queue.clone(), config.paths.config_dir.clone());
            listener
        });

        let announcer = if config.discovery.enabled {
            match Announcer::start(&config.discovery.service_name, &config.bluetooth.adapter_alias, config.discovery.port) {
                Ok(a) => Some(a),
                Err(e) => {
                    log::warn!("mDNS announcement failed to start: {e}");
                    None
                }
            }
        } else {
            None
        };

        Ok(Self {
            status,
            dispatcher,
            engine,
            transceiver,
            ble,
            pairing_agent,
            queue,
            agent_handle,
            rf_listener,
            announcer,
            status_sink,
            pairing_sink,
        })
    }

    /// Orderly shutdown (SPEC_FULL §1 [ADDED]): stop the RF listener,
    /// cancel any in-flight IR recording, disconnect the BLE peer if a
    /// scene is active, then unregister GATT services and the pairing
    /// agent. Each step is best-effort; a failure logs and the sequence
    /// continues rather than aborting partway.
    pub async fn shutdown(mut self) {
        log::info!("control plane shutting down");

        if let Some(mut listener) = self.rf_listener.take() {
            listener.shutdown();
        }

        self.transceiver.cancel_recording().await;
        self.transceiver.stop_repeating().await;

        if let crate::scene::State::Active(_) = self.engine.current_state().await {
            if let Err(e) = self.engine.stop().await {
                log::warn!("failed to stop active scene during shutdown: {e}");
            }
        }

        if let Some(ble) = &self.ble {
            ble.stop_advertising().await;
        }

        if let Some(agent) = &self.pairing_agent {
            agent.cancel().await;
        }
        self.agent_handle.take();

        if let Some(announcer) = self.announcer.take() {
            announcer.stop();
        }

        self.status_sink.status_changed(&self.status.get_current_status()).await;
    }
}

fn spawn_status_fanout(status: Arc<Broadcaster>, sink: Arc<dyn StatusSink>) {
    tokio::spawn(async move {
        let mut rx = status.subscribe();
        loop {
            if rx.changed().await.is_err() {
                return;
            }
            sink.status_changed(&rx.borrow().clone()).await;
        }
    });
}

fn spawn_pairing_fanout(mut rx: mpsc::Receiver<PairingEvent>, sink: Arc<dyn PairingSink>) {
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            sink.pairing_event(&event).await;
        }
    });
}

/// Routes RF events through `keymap::route`, enqueuing the resulting
/// action onto the Task Queue (§4.9). The global scene-switch table is
/// loaded once from `keymap_scenes.json`; the per-scene command table is
/// whatever `engine` currently has active, published over its keymap
/// watch channel on every `start`/`stop`/`set_current` (§4.8, §4.9) —
/// no disk re-read needed per event.
fn spawn_input_router(
    mut rf_rx: mpsc::Receiver<ButtonEvent>,
    engine: Arc<Engine<FileStore>>,
    dispatcher: Arc<Dispatcher>,
    queue: TaskQueue,
    config_dir: String,
) {
    tokio::spawn(async move {
        let scene_bindings = load_scene_bindings(&config_dir);
        let command_bindings_rx = engine.subscribe_keymap();
        while let Some(event) = rf_rx.recv().await {
            let keymap = crate::model::Keymap {
                scene_bindings: scene_bindings.clone(),
                command_bindings: command_bindings_rx.borrow().command_bindings.clone(),
            };
            let action = keymap::route(&event, &keymap);
            let engine = engine.clone();
            let dispatcher = dispatcher.clone();
            match action {
                RoutedAction::StopCurrentScene => {
                    queue.enqueue_task(async move {
                        if let Err(e) = engine.stop().await {
                            log::debug!("stop-current-scene ignored: {e}");
                        }
                    }).await;
                }
                RoutedAction::StartScene(scene_id) => {
                    queue.enqueue_task(async move {
                        if let Err(e) = engine.start(scene_id).await {
                            log::warn!("failed to start scene {scene_id}: {e}");
                        }
                    }).await;
                }
                RoutedAction::Dispatch { command_id, press_without_release } => {
                    queue.enqueue_task(async move {
                        let modifiers = Modifiers { press_without_release, ..Default::default() };
                        if let Err(e) = dispatcher.dispatch_by_id(command_id, modifiers, |_| async { None }).await {
                            log::warn!("failed to dispatch routed command {command_id}: {e}");
                        }
                    }).await;
                }
                RoutedAction::ReleaseAll => {
                    let ble = dispatcher.ble().cloned();
                    queue.enqueue_task(async move {
                        if let Some(ble) = ble {
                            ble.release_all_remote().await;
                        }
                    }).await;
                }
                RoutedAction::None => {}
            }
        }
    });
}

fn load_scene_bindings(config_dir: &str) -> HashMap<String, SceneId> {
    let raw = std::fs::read_to_string(format!("{config_dir}/keymap_scenes.json")).unwrap_or_default();
    keymap::load_scene_bindings(&raw)
}

fn load_known_commands(config_dir: &str) -> HashMap<u32, String> {
    let raw = std::fs::read_to_string(format!("{config_dir}/remote_keymap.json")).unwrap_or_default();
    crate::rf::listener::load_known_commands(&raw)
}

fn parse_rf_addresses(addresses: &[String]) -> [[u8; 5]; 2] {
    let mut out = [[0u8; 5]; 2];
    for (i, slot) in out.iter_mut().enumerate() {
        let Some(hex) = addresses.get(i) else { continue };
        let bytes = hex_to_bytes(hex);
        for (j, b) in bytes.into_iter().take(5).enumerate() {
            slot[j] = b;
        }
    }
    out
}

fn hex_to_bytes(hex: &str) -> Vec<u8> {
    let hex = hex.trim_start_matches("0x").trim_start_matches("0X");
    (0..hex.len())
        .step_by(2)
        .filter_map(|i| hex.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}
