/// Command Dispatcher: sole entry point for emitting a `Command`,
/// applying §4.7's redundancy suppression, selecting a transport, and
/// keeping the command cache.
///
/// Grounded on `RemoteController.py::send_db_command`/`send_command`/
/// `send_ir_command`/`send_bt_command`/`send_network_command`/
/// `send_script_command`/`send_integration_command`. The Python's
/// dynamic-attribute transport selection (`command.ir_action`,
/// `command.bt_action`, ...) becomes an exhaustive match over
/// `CommandPayload` (REDESIGN FLAGS).
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::ble::peripheral::BlePeripheral;
use crate::error::{Error, Result};
use crate::integration::IntegrationClient;
use crate::ir::transceiver::Transceiver;
use crate::model::{BtAction, ButtonRole, Command, CommandGroup, CommandId, CommandPayload, IntegrationAction, NetworkRequest};
use crate::status::Broadcaster;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub press_without_release: bool,
    pub from_start: bool,
    pub from_stop: bool,
}

pub struct Dispatcher {
    commands: Mutex<HashMap<CommandId, Command>>,
    status: Arc<Broadcaster>,
    transceiver: Arc<Transceiver>,
    ble: Option<Arc<BlePeripheral>>,
    integration: Option<Arc<IntegrationClient>>,
}

impl Dispatcher {
    pub fn new(status: Arc<Broadcaster>, transceiver: Arc<Transceiver>, ble: Option<Arc<BlePeripheral>>, integration: Option<Arc<IntegrationClient>>) -> Self {
        Self { commands: Mutex::new(HashMap::new()), status, transceiver, ble, integration }
    }

    /// Populates the cache from a keymap load. Read-through, invalidated
    /// only by an explicit reload — never a TTL.
    pub async fn prime_cache(&self, commands: impl IntoIterator<Item = Command>) {
        let mut cache = self.commands.lock().await;
        for command in commands {
            cache.insert(command.id, command);
        }
    }

    pub async fn cache_command(&self, command: Command) {
        self.commands.lock().await.insert(command.id, command);
    }

    /// The BLE peripheral handle, if one is attached — used by the input
    /// router's `ReleaseAll` action, which has no `Command` to dispatch.
    pub fn ble(&self) -> Option<&Arc<BlePeripheral>> {
        self.ble.as_ref()
    }

    /// Looks the command up by id, via `lookup` on a cache miss (the
    /// read-through path from "first use").
    pub async fn dispatch_by_id<F, Fut>(&self, command_id: CommandId, modifiers: Modifiers, lookup: F) -> Result<()>
    where
        F: FnOnce(CommandId) -> Fut,
        Fut: std::future::Future<Output = Option<Command>>,
    {
        let cached = self.commands.lock().await.get(&command_id).cloned();
        let command = match cached {
            Some(c) => c,
            None => {
                log::debug!("command {command_id} is not cached, loading...");
                match lookup(command_id).await {
                    Some(c) => {
                        self.commands.lock().await.insert(command_id, c.clone());
                        c
                    }
                    None => {
                        log::error!("tried to dispatch command {command_id}, which does not exist");
                        return Err(Error::NotFound(format!("command {command_id}")));
                    }
                }
            }
        };
        self.dispatch(&command, modifiers).await
    }

    pub async fn dispatch(&self, command: &Command, modifiers: Modifiers) -> Result<()> {
        if let Some(device) = command.device {
            if modifiers.from_start {
                let state = self.status.device_state(device);
                let powers_on = matches!(command.button, ButtonRole::PowerOn | ButtonRole::PowerToggle);
                if powers_on && state.powered {
                    return Ok(());
                }
                if command.group == CommandGroup::Input && state.input == Some(command.id) {
                    return Ok(());
                }
            }
            if modifiers.from_stop {
                let state = self.status.device_state(device);
                let powers_off = matches!(command.button, ButtonRole::PowerOff | ButtonRole::PowerToggle);
                if powers_off && !state.powered {
                    return Ok(());
                }
            }
        }

        self.emit(command, modifiers.press_without_release).await?;

        if modifiers.from_start || modifiers.from_stop {
            self.apply_state_for_command(command);
        }
        Ok(())
    }

    async fn emit(&self, command: &Command, press_without_release: bool) -> Result<()> {
        match &command.payload {
            CommandPayload::Ir(pulses) => {
                if press_without_release {
                    self.transceiver.send_and_repeat(pulses.clone()).await
                } else {
                    self.transceiver.send(pulses).await
                }
            }
            CommandPayload::Bt(action) => self.emit_bt(action, press_without_release).await,
            CommandPayload::Network(request) => self.emit_network(request).await,
            CommandPayload::Integration(request) => {
                self.emit_integration(request.action, request.entity_id.as_deref()).await
            }
            CommandPayload::Script => Err(Error::InvalidRequest("script commands are not implemented".into())),
        }
    }

    async fn emit_bt(&self, action: &BtAction, press_without_release: bool) -> Result<()> {
        let Some(ble) = &self.ble else {
            return Err(Error::TransportUnavailable("no BLE peripheral active".into()));
        };
        match action {
            BtAction::Key(key) => {
                let code = crate::ble::reports::keyboard_key_code(key)
                    .ok_or_else(|| Error::InvalidRequest(format!("unknown keyboard key name: {key}")))?;
                if press_without_release {
                    ble.send_key(code).await
                } else {
                    ble.send_key(code).await?;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    ble.release_keys().await;
                    Ok(())
                }
            }
            BtAction::MediaKey(usage) => {
                let code = crate::ble::reports::media_key_code(usage)
                    .ok_or_else(|| Error::InvalidRequest(format!("unknown consumer key name: {usage}")))?;
                if press_without_release {
                    ble.send_media_key(code).await
                } else {
                    ble.send_media_key(code).await?;
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    ble.release_media_keys().await;
                    Ok(())
                }
            }
        }
    }

    async fn emit_network(&self, request: &NetworkRequest) -> Result<()> {
        let url = request.url.clone();
        let method = request.method;
        let body = request.body.clone();
        let result = tokio::task::spawn_blocking(move || {
            use crate::model::HttpMethod;
            let req = match method {
                HttpMethod::Get => ureq::get(&url),
                HttpMethod::Post => ureq::post(&url),
                HttpMethod::Put => ureq::put(&url),
                HttpMethod::Patch => ureq::patch(&url),
                HttpMethod::Delete => ureq::delete(&url),
                HttpMethod::Head => ureq::head(&url),
            };
            match body {
                Some(b) => req.send(b),
                None => req.call(),
            }
        })
        .await
        .map_err(|e| Error::Fatal(e.to_string()))?;

        match result {
            Ok(resp) => {
                log::debug!("network command sent, status {}", resp.status());
                Ok(())
            }
            Err(e) => {
                log::warn!("network command failed: {e}");
                Err(Error::TransportFailure(e.to_string()))
            }
        }
    }

    async fn emit_integration(&self, action: IntegrationAction, entity_id: Option<&str>) -> Result<()> {
        let Some(integration) = &self.integration else {
            log::error!("tried to send integration command but no integration is configured");
            return Err(Error::TransportUnavailable("integration client not configured".into()));
        };
        match action {
            IntegrationAction::ToggleLight => {
                let entity_id = entity_id.ok_or_else(|| Error::InvalidRequest("toggle_light requires entity_id".into()))?;
                integration.toggle_light(entity_id).await
            }
            IntegrationAction::BrightnessUp => integration.increase_brightness().await,
            IntegrationAction::BrightnessDown => integration.decrease_brightness().await,
        }
    }

    fn apply_state_for_command(&self, command: &Command) {
        let Some(device) = command.device else { return };
        if command.group == CommandGroup::Input {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::hardware::FakeIrHardware;
    use crate::model::{CommandGroup, DeviceId};

    fn ir_command(id: u64, device: u64, button: ButtonRole, group: CommandGroup) -> Command {
        Command {
            id: CommandId(id),
            name: "test".into(),
            device: Some(DeviceId(device)),
            button,
            group,
            payload: CommandPayload::Ir(vec![9000, 4500, 560, 560]),
        }
    }

    fn dispatcher() -> (Dispatcher, Arc<Broadcaster>, Arc<FakeIrHardware>) {
        let status = Arc::new(Broadcaster::new());
        let hw = Arc::new(FakeIrHardware::new());
        let transceiver = Arc::new(Transceiver::new(hw.clone(), 108, 100, 512));
        (Dispatcher::new(status.clone(), transceiver, None, None), status, hw)
    }

    #[tokio::test]
    async fn power_on_suppression_second_call_emits_nothing() {
        let (dispatcher, status, hw) = dispatcher();
        let command = ir_command(1, 17, ButtonRole::PowerOn, CommandGroup::Other);
        let modifiers = Modifiers { from_start: true, ..Default::default() };

        dispatcher.dispatch(&command, modifiers).await.unwrap();
        assert_eq!(hw.transmitted.lock().await.len(), 1);
        assert!(status.device_state(DeviceId(17)).powered);

        dispatcher.dispatch(&command, modifiers).await.unwrap();
        assert_eq!(hw.transmitted.lock().await.len(), 1, "second power-on should be suppressed");
        assert!(status.device_state(DeviceId(17)).powered);
    }

    #[tokio::test]
    async fn input_group_suppressed_when_already_selected() {
        let (dispatcher, status, hw) = dispatcher();
        let command = ir_command(2, 1, ButtonRole::Select, CommandGroup::Input);
        let modifiers = Modifiers { from_start: true, ..Default::default() };

        dispatcher.dispatch(&command, modifiers).await.unwrap();
        assert_eq!(hw.transmitted.lock().await.len(), 1);
        assert_eq!(status.device_state(DeviceId(1)).input, Some(CommandId(2)));

        dispatcher.dispatch(&command, modifiers).await.unwrap();
        assert_eq!(hw.transmitted.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn power_off_suppressed_when_already_off() {
        let (dispatcher, _status, hw) = dispatcher();
        let command = ir_command(3, 1, ButtonRole::PowerOff, CommandGroup::Other);
        let modifiers = Modifiers { from_stop: true, ..Default::default() };

        dispatcher.dispatch(&command, modifiers).await.unwrap();
        assert_eq!(hw.transmitted.lock().await.len(), 0, "device already off, no suppression bypass");
    }

    #[tokio::test]
    async fn script_command_fails() {
        let (dispatcher, _status, _hw) = dispatcher();
        let command = Command {
            id: CommandId(9),
            name: "script".into(),
            device: None,
            button: ButtonRole::Menu,
            group: CommandGroup::Other,
            payload: CommandPayload::Script,
        };
        let result = dispatcher.dispatch(&command, Modifiers::default()).await;
        assert!(matches!(result, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn cache_read_through_loads_on_miss() {
        let (dispatcher, _status, hw) = dispatcher();
        let command = ir_command(5, 1, ButtonRole::VolumeUp, CommandGroup::Other);
        let lookup_command = command.clone();
        dispatcher
            .dispatch_by_id(CommandId(5), Modifiers::default(), move |_| {
                let c = lookup_command.clone();
                async move { Some(c) }
            })
            .await
            .unwrap();
        assert_eq!(hw.transmitted.lock().await.len(), 1);

        // Second dispatch by id hits the cache; lookup is never invoked.
        dispatcher
            .dispatch_by_id(CommandId(5), Modifiers::default(), |_| async { panic!("should not be called") })
            .await
            .unwrap();
        assert_eq!(hw.transmitted.lock().await.len(), 2);
    }
}
