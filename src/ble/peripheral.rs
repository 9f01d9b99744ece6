/// BLE HID Peripheral: owns the platform Bluetooth adapter, registers the
/// Battery/DeviceInfo/HID GATT services, advertises, and maintains
/// adapter/peer state every 5s.
///
/// Grounded in `BluetoothManager.py` (adapter property assertion,
/// `_connection_monitor` 5s loop, `advertise`/`stop_advertising`,
/// `get_devices`/`pair_device`/`trust_device`/`remove_device`/`connect`/
/// `disconnect`) and `HidRemoteProfile.py` (two profiles selected at
/// runtime rather than two competing managers, per REDESIGN FLAGS). GATT
/// registration follows the `bluer::gatt::local` shape used throughout the
/// retrieved pack's own bluer-based peripheral.
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bluer::adv::{Advertisement, AdvertisementHandle, Type as AdvType};
use bluer::gatt::local::{
    Application, ApplicationHandle, Characteristic, CharacteristicNotify, CharacteristicNotifyMethod,
    CharacteristicRead, CharacteristicWrite, CharacteristicWriteMethod, Descriptor, DescriptorRead,
    Service,
};
use bluer::{Adapter, Uuid};
use tokio::sync::{broadcast, Mutex};

use crate::ble::reports;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BleProfileKind {
    Keyboard,
    Remote,
}

impl BleProfileKind {
    /// Appearance value advertised for this profile (§4.4).
    fn appearance(self) -> u16 {
        match self {
            BleProfileKind::Keyboard => 0x03C1,
            BleProfileKind::Remote => 0x0180,
        }
    }
}

const BATTERY_SERVICE: u16 = 0x180F;
const BATTERY_LEVEL_CHAR: u16 = 0x2A19;
const DEVICE_INFO_SERVICE: u16 = 0x180A;
const PNP_ID_CHAR: u16 = 0x2A50;
const HID_SERVICE: u16 = 0x1812;
const HID_INFORMATION_CHAR: u16 = 0x2A4A;
const REPORT_MAP_CHAR: u16 = 0x2A4B;
const HID_CONTROL_POINT_CHAR: u16 = 0x2A4C;
const REPORT_CHAR: u16 = 0x2A4D;
const PROTOCOL_MODE_CHAR: u16 = 0x2A4E;
const REPORT_REFERENCE_DESC: u16 = 0x2908;

/// Fixed 7-byte PnP ID: vendor-id-source=Bluetooth SIG (0x01), vendor id,
/// product id, product version — all zero-ish placeholders since this is a
/// generic peripheral, not a licensed USB/BT product.
const PNP_ID: [u8; 7] = [0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01];

fn short_uuid(value: u16) -> Uuid {
    Uuid::from_u128(0x0000_0000_0000_1000_8000_00805F9B34FB | ((value as u128) << 96))
}

/// Resolves a BlueZ-supplied `Device` into the agent's transport-agnostic
/// `DeviceInfo` (§4.5), falling back to the D-Bus object path/address if the
/// alias isn't available yet (common mid-pairing, before BlueZ has a name).
async fn device_info(device: &bluer::Device) -> crate::ble::agent::DeviceInfo {
    let address = device.address().to_string();
    let name = device.alias().await.unwrap_or_else(|_| address.clone());
    crate::ble::agent::DeviceInfo { path: device_path(device), address, name }
}

fn device_path(device: &bluer::Device) -> String {
    format!("/org/bluez/hci0/dev_{}", device.address().to_string().replace(':', "_"))
}

/// Shared mutable state for one report characteristic: its current bytes and
/// the broadcast channel `CharacteristicNotifyMethod::Fun` forwards from.
struct ReportState {
    bytes: Mutex<Vec<u8>>,
    tx: broadcast::Sender<Vec<u8>>,
}

impl ReportState {
    fn new(initial: Vec<u8>) -> Arc<Self> {
        let (tx, _) = broadcast::channel(16);
        Arc::new(Self { bytes: Mutex::new(initial), tx })
    }

    async fn set(&self, value: Vec<u8>) {
        *self.bytes.lock().await = value.clone();
        let _ = self.tx.send(value);
    }
}

fn notify_characteristic(uuid: Uuid, report_id: u8, state: Arc<ReportState>) -> Characteristic {
    let read_state = state.clone();
    Characteristic {
        uuid,
        read: Some(CharacteristicRead {
            read: true,
            fun: Box::new(move |_req| {
                let state = read_state.clone();
                Box::pin(async move { Ok(state.bytes.lock().await.clone()) })
            }),
            ..Default::default()
        }),
        notify: Some(CharacteristicNotify {
            notify: true,
            method: CharacteristicNotifyMethod::Fun(Box::new(move |mut notifier| {
                let mut rx = state.tx.subscribe();
                Box::pin(async move {
                    tokio::spawn(async move {
                        while let Ok(value) = rx.recv().await {
                            if notifier.notify(value).await.is_err() {
                                break;
                            }
                        }
                    });
                })
            })),
            ..Default::default()
        }),
        descriptors: vec![Descriptor {
            uuid: short_uuid(REPORT_REFERENCE_DESC),
            read: Some(DescriptorRead {
                read: true,
                fun: Box::new(move |_req| Box::pin(async move { Ok(vec![report_id, 0x01]) })),
                ..Default::default()
            }),
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub struct BlePeripheral {
    session: bluer::Session,
    adapter: Adapter,
    adapter_alias: String,
    maintenance_interval: Duration,
    connect_timeout: Duration,

    app_handle: Mutex<Option<ApplicationHandle>>,
    adv_handle: Mutex<Option<AdvertisementHandle>>,
    active_profile: Mutex<Option<BleProfileKind>>,

    battery: Arc<ReportState>,
    keyboard_report: Arc<ReportState>,
    consumer_report: Arc<ReportState>,
    remote_report: Arc<ReportState>,
    remote_bits: Mutex<u16>,
    keyboard_keys: Mutex<Vec<u8>>,
}

impl BlePeripheral {
    pub async fn new(adapter_alias: String, maintenance_interval: Duration, connect_timeout: Duration) -> Result<Arc<Self>> {
        let session = bluer::Session::new().await.map_err(|e| Error::Fatal(e.to_string()))?;
        let adapter = session.default_adapter().await.map_err(|e| Error::Fatal(e.to_string()))?;

        let peripheral = Arc::new(Self {
            session,
            adapter,
            adapter_alias,
            maintenance_interval,
            connect_timeout,
            app_handle: Mutex::new(None),
            adv_handle: Mutex::new(None),
            active_profile: Mutex::new(None),
            battery: ReportState::new(vec![100]),
            keyboard_report: ReportState::new(reports::keyboard_report(0, &[]).to_vec()),
            consumer_report: ReportState::new(reports::consumer_report(0).to_vec()),
            remote_report: ReportState::new(reports::remote_report(0).to_vec()),
            remote_bits: Mutex::new(0),
            keyboard_keys: Mutex::new(Vec::new()),
        });

        peripheral.assert_adapter_properties().await?;
        Ok(peripheral)
    }

    async fn assert_adapter_properties(&self) -> Result<()> {
        let a = &self.adapter;
        a.set_powered(true).await.map_err(|e| Error::TransportFailure(e.to_string()))?;
        a.set_alias(self.adapter_alias.clone()).await.map_err(|e| Error::TransportFailure(e.to_string()))?;
        a.set_discoverable(true).await.map_err(|e| Error::TransportFailure(e.to_string()))?;
        a.set_pairable(true).await.map_err(|e| Error::TransportFailure(e.to_string()))?;
        a.set_discoverable_timeout(0).await.map_err(|e| Error::TransportFailure(e.to_string()))?;
        a.set_pairable_timeout(0).await.map_err(|e| Error::TransportFailure(e.to_string()))?;
        Ok(())
    }

    fn report_map_for(profile: BleProfileKind) -> &'static [u8] {
        match profile {
            BleProfileKind::Keyboard => reports::KEYBOARD_REPORT_MAP,
            BleProfileKind::Remote => reports::REMOTE_REPORT_MAP,
        }
    }

    fn service_uuids() -> Vec<Uuid> {
        vec![short_uuid(BATTERY_SERVICE), short_uuid(DEVICE_INFO_SERVICE), short_uuid(HID_SERVICE)]
    }

    fn gatt_application(&self, profile: BleProfileKind) -> Application {
        let battery_char = Characteristic {
            uuid: short_uuid(BATTERY_LEVEL_CHAR),
            read: Some(CharacteristicRead {
                read: true,
                fun: {
                    let battery = self.battery.clone();
                    Box::new(move |_req| {
                        let battery = battery.clone();
                        Box::pin(async move { Ok(battery.bytes.lock().await.clone()) })
                    })
                },
                ..Default::default()
            }),
            notify: Some(CharacteristicNotify {
                notify: true,
                method: CharacteristicNotifyMethod::Fun({
                    let battery = self.battery.clone();
                    Box::new(move |mut notifier| {
                        let mut rx = battery.tx.subscribe();
                        Box::pin(async move {
                            tokio::spawn(async move {
                                while let Ok(value) = rx.recv().await {
                                    if notifier.notify(value).await.is_err() {
                                        break;
                                    }
                                }
                            });
                        })
                    })
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let pnp_id_char = Characteristic {
            uuid: short_uuid(PNP_ID_CHAR),
            read: Some(CharacteristicRead {
                read: true,
                fun: Box::new(|_req| Box::pin(async move { Ok(PNP_ID.to_vec()) })),
                ..Default::default()
            }),
            ..Default::default()
        };

        let hid_information_char = Characteristic {
            uuid: short_uuid(HID_INFORMATION_CHAR),
            read: Some(CharacteristicRead {
                read: true,
                fun: Box::new(|_req| {
                    // bcdHID=0x0111, country=0, flags=0x03 (RemoteWake|NormallyConnectable)
                    Box::pin(async move { Ok(vec![0x11, 0x01, 0x00, 0x03]) })
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let report_map_char = Characteristic {
            uuid: short_uuid(REPORT_MAP_CHAR),
            read: Some(CharacteristicRead {
                read: true,
                fun: Box::new(move |_req| {
                    let map = Self::report_map_for(profile).to_vec();
                    Box::pin(async move { Ok(map) })
                }),
                ..Default::default()
            }),
            ..Default::default()
        };

        let hid_control_point_char = Characteristic {
            uuid: short_uuid(HID_CONTROL_POINT_CHAR),
            write: Some(CharacteristicWrite {
                write_without_response: true,
                method: CharacteristicWriteMethod::Fun(Box::new(|_value, _req| Box::pin(async move { Ok(()) }))),
                ..Default::default()
            }),
            ..Default::default()
        };

        let protocol_mode_char = Characteristic {
            uuid: short_uuid(PROTOCOL_MODE_CHAR),
            read: Some(CharacteristicRead {
                read: true,
                fun: Box::new(|_req| Box::pin(async move { Ok(vec![0x01]) })),
                ..Default::default()
            }),
            ..Default::default()
        };

        let report_chars = match profile {
            BleProfileKind::Keyboard => vec![
                notify_characteristic(short_uuid(REPORT_CHAR), reports::KEYBOARD_REPORT_ID, self.keyboard_report.clone()),
                notify_characteristic(short_uuid(REPORT_CHAR), reports::CONSUMER_REPORT_ID, self.consumer_report.clone()),
            ],
            BleProfileKind::Remote => {
                vec![notify_characteristic(short_uuid(REPORT_CHAR), reports::REMOTE_REPORT_ID, self.remote_report.clone())]
            }
        };

        let mut hid_chars =
            vec![hid_information_char, report_map_char, hid_control_point_char, protocol_mode_char];
        hid_chars.extend(report_chars);

        Application {
            services: vec![
                Service { uuid: short_uuid(BATTERY_SERVICE), primary: true, characteristics: vec![battery_char], ..Default::default() },
                Service {
                    uuid: short_uuid(DEVICE_INFO_SERVICE),
                    primary: true,
                    characteristics: vec![pnp_id_char],
                    ..Default::default()
                },
                Service { uuid: short_uuid(HID_SERVICE), primary: true, characteristics: hid_chars, ..Default::default() },
            ],
            ..Default::default()
        }
    }

    /// Register GATT services and start advertising for `profile`.
    /// Deactivates and unregisters any previously active profile first.
    pub async fn activate_profile(&self, profile: BleProfileKind) -> Result<()> {
        self.stop_advertising().await;
        *self.app_handle.lock().await = None;

        let app = self.gatt_application(profile);
        let app_handle = self.adapter.serve_gatt_application(app).await.map_err(|e| Error::Fatal(e.to_string()))?;
        *self.app_handle.lock().await = Some(app_handle);
        *self.active_profile.lock().await = Some(profile);

        self.advertise(profile).await
    }

    async fn advertise(&self, profile: BleProfileKind) -> Result<()> {
        self.stop_advertising().await;
        let adv = Advertisement {
            advertisement_type: AdvType::Peripheral,
            service_uuids: Self::service_uuids().into_iter().collect(),
            appearance: Some(profile.appearance()),
            local_name: Some(self.adapter_alias.clone()),
            discoverable: Some(true),
            timeout: None, // permanent, matches spec.md timeout=0
            ..Default::default()
        };
        let handle = self.adapter.advertise(adv).await.map_err(|e| Error::TransportFailure(e.to_string()))?;
        *self.adv_handle.lock().await = Some(handle);
        Ok(())
    }

    pub async fn stop_advertising(&self) {
        self.adv_handle.lock().await.take();
    }

    /// Registers `agent` as the default BlueZ pairing agent (§4.4 step 3,
    /// §4.5), with capability `DisplayYesNo`. Each BlueZ callback is wired
    /// to the matching `PairingAgent` method; the returned `AgentHandle`
    /// unregisters the agent when dropped.
    pub async fn register_pairing_agent(&self, agent: Arc<crate::ble::agent::PairingAgent>) -> Result<bluer::agent::AgentHandle> {
        let a = agent.clone();
        let request_pin_code = move |req: bluer::agent::RequestPinCode| {
            let a = a.clone();
            Box::pin(async move {
                let _ = device_info(&req.device).await;
                Ok(a.request_pin_code())
            })
        };

        let a = agent.clone();
        let request_passkey = move |req: bluer::agent::RequestPasskey| {
            let a = a.clone();
            Box::pin(async move {
                let _ = device_info(&req.device).await;
                Ok(a.request_passkey())
            })
        };

        let a = agent.clone();
        let display_passkey = move |req: bluer::agent::DisplayPasskey| {
            let a = a.clone();
            Box::pin(async move {
                let device = device_info(&req.device).await;
                a.display_passkey(device, req.passkey).await;
                Ok(())
            })
        };

        let a = agent.clone();
        let request_confirmation = move |req: bluer::agent::RequestConfirmation| {
            let a = a.clone();
            Box::pin(async move {
                let device = device_info(&req.device).await;
                a.request_confirmation(device, req.passkey).await.map_err(|_| bluer::agent::ReqError::Rejected)
            })
        };

        let a = agent.clone();
        let request_authorization = move |req: bluer::agent::RequestAuthorization| {
            let a = a.clone();
            Box::pin(async move {
                let device = device_info(&req.device).await;
                a.request_authorization(device).await.map_err(|_| bluer::agent::ReqError::Rejected)
            })
        };

        let a = agent.clone();
        let authorize_service = move |req: bluer::agent::AuthorizeService| {
            let a = a.clone();
            Box::pin(async move {
                let device = device_info(&req.device).await;
                a.authorize_service(device, req.service.to_string()).await.map_err(|_| bluer::agent::ReqError::Rejected)
            })
        };

        let bluer_agent = bluer::agent::Agent {
            request_default: true,
            request_pin_code: Some(Box::new(request_pin_code)),
            display_pin_code: None,
            request_passkey: Some(Box::new(request_passkey)),
            display_passkey: Some(Box::new(display_passkey)),
            request_confirmation: Some(Box::new(request_confirmation)),
            request_authorization: Some(Box::new(request_authorization)),
            authorize_service: Some(Box::new(authorize_service)),
            ..Default::default()
        };

        self.session.register_agent(bluer_agent).await.map_err(|e| Error::Fatal(e.to_string()))
    }

    /// Re-assert adapter properties, auto-trust paired-but-untrusted peers,
    /// restart advertising on a connected→disconnected transition, and start
    /// advertising if nothing is connected and none is live. Runs every
    /// `maintenance_interval`; intended to be spawned once and looped.
    pub async fn run_maintenance_loop(self: Arc<Self>) {
        let mut known: HashMap<String, bool> = HashMap::new();
        loop {
            tokio::time::sleep(self.maintenance_interval).await;
            if let Err(e) = self.assert_adapter_properties().await {
                log::debug!("adapter property maintenance failed: {e}");
            }

            let devices = match self.list_devices().await {
                Ok(d) => d,
                Err(e) => {
                    log::debug!("failed to list devices during maintenance: {e}");
                    continue;
                }
            };

            let mut any_connected = false;
            for device in &devices {
                any_connected |= device.connected;
                if device.paired && !device.trusted {
                    if let Err(e) = self.trust(&device.address).await {
                        log::debug!("failed to trust {}: {e}", device.address);
                    }
                }

                let was_connected = known.insert(device.address.clone(), device.connected).unwrap_or(false);
                if was_connected && !device.connected {
                    log::info!("BLE peer {} disconnected, restarting advertising", device.address);
                    if let Some(profile) = *self.active_profile.lock().await {
                        if let Err(e) = self.advertise(profile).await {
                            log::warn!("failed to restart advertising: {e}");
                        }
                    }
                }
            }

            let advertising = self.adv_handle.lock().await.is_some();
            if !any_connected && !advertising {
                if let Some(profile) = *self.active_profile.lock().await {
                    if let Err(e) = self.advertise(profile).await {
                        log::warn!("failed to ensure advertising: {e}");
                    }
                }
            }
        }
    }

    pub async fn list_devices(&self) -> Result<Vec<PeerInfo>> {
        let addresses = self.adapter.device_addresses().await.map_err(|e| Error::TransportFailure(e.to_string()))?;
        let mut out = Vec::new();
        for addr in addresses {
            let device = self.adapter.device(addr).map_err(|e| Error::TransportFailure(e.to_string()))?;
            let name = device.alias().await.unwrap_or_else(|_| addr.to_string());
            let paired = device.is_paired().await.unwrap_or(false);
            let connected = device.is_connected().await.unwrap_or(false);
            let trusted = device.is_trusted().await.unwrap_or(false);
            out.push(PeerInfo { address: addr.to_string(), name, paired, connected, trusted });
        }
        Ok(out)
    }

    async fn find_device(&self, address: &str) -> Result<bluer::Device> {
        let addr: bluer::Address =
            address.parse().map_err(|_| Error::InvalidRequest(format!("invalid address: {address}")))?;
        self.adapter.device(addr).map_err(|e| Error::NotFound(e.to_string()))
    }

    pub async fn trust(&self, address: &str) -> Result<()> {
        let device = self.find_device(address).await?;
        device.set_trusted(true).await.map_err(|e| Error::TransportFailure(e.to_string()))
    }

    pub async fn pair(&self, address: &str, trust: bool) -> Result<()> {
        let device = self.find_device(address).await?;
        device.pair().await.map_err(|e| Error::TransportFailure(e.to_string()))?;
        if trust {
            device.set_trusted(true).await.map_err(|e| Error::TransportFailure(e.to_string()))?;
        }
        Ok(())
    }

    pub async fn remove(&self, address: &str) -> Result<()> {
        let addr: bluer::Address =
            address.parse().map_err(|_| Error::InvalidRequest(format!("invalid address: {address}")))?;
        self.adapter.remove_device(addr).await.map_err(|e| Error::TransportFailure(e.to_string()))
    }

    /// Cannot truly initiate a connection from a peripheral role: refreshes
    /// advertising then polls the managed device tree for up to `timeout`.
    pub async fn connect(&self, address: &str, timeout: Option<Duration>) -> Result<bool> {
        if let Some(profile) = *self.active_profile.lock().await {
            let _ = self.advertise(profile).await;
        }
        let deadline = tokio::time::Instant::now() + timeout.unwrap_or(self.connect_timeout);
        loop {
            if self.is_connected(address).await {
                return Ok(true);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }

    pub async fn disconnect(&self, address: &str) -> Result<()> {
        let device = self.find_device(address).await?;
        device.disconnect().await.map_err(|e| Error::TransportFailure(e.to_string()))
    }

    pub async fn is_bonded(&self, address: &str) -> bool {
        match self.find_device(address).await {
            Ok(device) => device.is_paired().await.unwrap_or(false) && device.is_trusted().await.unwrap_or(false),
            Err(_) => false,
        }
    }

    pub async fn is_connected(&self, address: &str) -> bool {
        match self.find_device(address).await {
            Ok(device) => device.is_connected().await.unwrap_or(false),
            Err(_) => false,
        }
    }

    // --- Keyboard profile report mutation ---

    pub async fn send_key(&self, key_code: u8) -> Result<()> {
        *self.keyboard_keys.lock().await = vec![key_code];
        let report = reports::keyboard_report(0, &[key_code]);
        self.keyboard_report.set(report.to_vec()).await;
        Ok(())
    }

    pub async fn release_keys(&self) {
        *self.keyboard_keys.lock().await = Vec::new();
        self.keyboard_report.set(reports::keyboard_report(0, &[]).to_vec()).await;
    }

    pub async fn send_media_key(&self, usage: u16) -> Result<()> {
        self.consumer_report.set(reports::consumer_report(usage).to_vec()).await;
        Ok(())
    }

    pub async fn release_media_keys(&self) {
        self.consumer_report.set(reports::consumer_report(0).to_vec()).await;
    }

    // --- Remote profile bit mutation ---

    pub async fn press_button(&self, bit: u16) -> Result<()> {
        let mut bits = self.remote_bits.lock().await;
        *bits |= bit;
        self.remote_report.set(reports::remote_report(*bits).to_vec()).await;
        Ok(())
    }

    pub async fn release_button(&self, bit: u16) -> Result<()> {
        let mut bits = self.remote_bits.lock().await;
        *bits &= !bit;
        self.remote_report.set(reports::remote_report(*bits).to_vec()).await;
        Ok(())
    }

    pub async fn release_all_remote(&self) {
        *self.remote_bits.lock().await = 0;
        self.remote_report.set(reports::remote_report(0).to_vec()).await;
    }

    pub async fn click_button(&self, bit: u16, duration: Duration) -> Result<()> {
        self.press_button(bit).await?;
        tokio::time::sleep(duration).await;
        self.release_button(bit).await
    }

    pub async fn update_battery_level(&self, level: u8) {
        self.battery.set(vec![level.min(100)]).await;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub address: String,
    pub name: String,
    pub paired: bool,
    pub connected: bool,
    pub trusted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn appearance_matches_profile() {
        assert_eq!(BleProfileKind::Keyboard.appearance(), 0x03C1);
        assert_eq!(BleProfileKind::Remote.appearance(), 0x0180);
    }

    #[test]
    fn service_uuids_are_fixed() {
        let uuids = BlePeripheral::service_uuids();
        assert_eq!(uuids.len(), 3);
        assert_eq!(uuids[0], short_uuid(0x180F));
        assert_eq!(uuids[2], short_uuid(0x1812));
    }

    #[test]
    fn report_map_selection() {
        assert_eq!(BlePeripheral::report_map_for(BleProfileKind::Keyboard), reports::KEYBOARD_REPORT_MAP);
        assert_eq!(BlePeripheral::report_map_for(BleProfileKind::Remote), reports::REMOTE_REPORT_MAP);
    }
}
