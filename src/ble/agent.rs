/// Pairing Agent: responds to BlueZ's out-of-band pairing callbacks by
/// emitting a pairing event and awaiting a user verdict delivered from the
/// HTTP/WS facade via `confirm`.
///
/// Grounded in `SecurePairingAgent` (capability DisplayYesNo, fixed PIN
/// "0000"/passkey 123456, 30s confirm/authorize timeout, 15s service-auth
/// timeout with HID auto-approve). The Python agent keeps one
/// `asyncio.Future` per device path in a plain dict and deletes it in a
/// `finally` block after `wait_for` returns — a window exists where
/// `confirm_from_api` can still observe the key between resolution and
/// deletion. Here each verdict is a `oneshot::Sender<bool>` removed from the
/// map inside the same lock that resolves it, closing that window.
use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};

use crate::error::{Error, Result};

pub const HID_SERVICE_UUID: &str = "00001812-0000-1000-8000-00805f9b34fb";

const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(30);
const CONFIRM_TIMEOUT: Duration = Duration::from_secs(30);
const SERVICE_AUTH_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub path: String,
    pub address: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    AuthorizationRequest { device: DeviceInfo },
    DisplayPasskey { device: DeviceInfo, pin: String },
    ConfirmPasskey { device: DeviceInfo, pin: String },
    AuthorizeService { device: DeviceInfo, service_uuid: String },
    PairingTimeout { device_path: String },
    PairingCancelled,
}

/// One-shot verdict channels keyed by device path. A device path never has
/// more than one pending verdict: a new callback for the same path replaces
/// (and thereby drops/cancels) any prior one.
pub struct PairingAgent {
    pending: Mutex<HashMap<String, oneshot::Sender<bool>>>,
    events: mpsc::Sender<PairingEvent>,
}

impl PairingAgent {
    pub fn new(events: mpsc::Sender<PairingEvent>) -> Self {
        Self { pending: Mutex::new(HashMap::new()), events }
    }

    async fn wait_for_verdict(&self, device_path: &str, timeout: Duration) -> bool {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(device_path.to_string(), tx);

        let verdict = tokio::time::timeout(timeout, rx).await;

        // Remove regardless of outcome: a timed-out verdict must not be
        // resolvable by a later `confirm` call racing in after this point.
        self.pending.lock().await.remove(device_path);

        match verdict {
            Ok(Ok(confirmed)) => confirmed,
            Ok(Err(_)) => false, // sender dropped without a verdict (cancel)
            Err(_) => {
                let _ = self
                    .events
                    .send(PairingEvent::PairingTimeout { device_path: device_path.to_string() })
                    .await;
                false
            }
        }
    }

    /// Called by `RequestAuthorization`.
    pub async fn request_authorization(&self, device: DeviceInfo) -> Result<()> {
        let _ = self
            .events
            .send(PairingEvent::AuthorizationRequest { device: device.clone() })
            .await;
        if self.wait_for_verdict(&device.path, AUTHORIZATION_TIMEOUT).await {
            Ok(())
        } else {
            Err(Error::PairingRejected)
        }
    }

    /// Called by `RequestPinCode`. Fixed PIN for all devices.
    pub fn request_pin_code(&self) -> String {
        "0000".to_string()
    }

    /// Called by `RequestPasskey`. Fixed passkey for all devices.
    pub fn request_passkey(&self) -> u32 {
        123456
    }

    /// Called by `DisplayPasskey`. Informational only, no verdict awaited.
    pub async fn display_passkey(&self, device: DeviceInfo, passkey: u32) {
        let pin = format!("{passkey:06}");
        let _ = self.events.send(PairingEvent::DisplayPasskey { device, pin }).await;
    }

    /// Called by `RequestConfirmation`.
    pub async fn request_confirmation(&self, device: DeviceInfo, passkey: u32) -> Result<()> {
        let pin = format!("{passkey:06}");
        let _ = self
            .events
            .send(PairingEvent::ConfirmPasskey { device: device.clone(), pin })
            .await;
        if self.wait_for_verdict(&device.path, CONFIRM_TIMEOUT).await {
            Ok(())
        } else {
            Err(Error::PairingRejected)
        }
    }

    /// Called by `AuthorizeService`. HID is auto-approved; everything else
    /// needs a verdict.
    pub async fn authorize_service(&self, device: DeviceInfo, service_uuid: String) -> Result<()> {
        if service_uuid.eq_ignore_ascii_case(HID_SERVICE_UUID) {
            return Ok(());
        }
        let _ = self
            .events
            .send(PairingEvent::AuthorizeService { device: device.clone(), service_uuid })
            .await;
        if self.wait_for_verdict(&device.path, SERVICE_AUTH_TIMEOUT).await {
            Ok(())
        } else {
            Err(Error::PairingRejected)
        }
    }

    /// Called by `Cancel`. Fails every pending verdict and clears the map.
    pub async fn cancel(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(false);
        }
        drop(pending);
        let _ = self.events.send(PairingEvent::PairingCancelled).await;
    }

    /// Delivered out-of-band from the HTTP/WS facade's `confirm` endpoint.
    /// Returns `NotFound` if no verdict is pending for `device_path`
    /// (already resolved or timed out).
    pub async fn confirm(&self, device_path: &str, verdict: bool) -> Result<()> {
        let mut pending = self.pending.lock().await;
        match pending.remove(device_path) {
            Some(tx) => {
                let _ = tx.send(verdict);
                Ok(())
            }
            None => Err(Error::NotFound(format!("no pending pairing for {device_path}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(path: &str) -> DeviceInfo {
        DeviceInfo { path: path.to_string(), address: "AA:BB:CC:DD:EE:FF".into(), name: "Remote".into() }
    }

    #[tokio::test]
    async fn confirm_path_resolves_pending_verdict() {
        let (tx, mut rx) = mpsc::channel(8);
        let agent = std::sync::Arc::new(PairingAgent::new(tx));

        let agent2 = agent.clone();
        let handle = tokio::spawn(async move { agent2.request_confirmation(device("/dev/aa"), 42).await });

        // Drain the emitted event before confirming.
        let ev = rx.recv().await.unwrap();
        assert!(matches!(ev, PairingEvent::ConfirmPasskey { pin, .. } if pin == "000042"));

        agent.confirm("/dev/aa", true).await.unwrap();
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn second_confirm_for_same_path_is_not_found() {
        let (tx, mut rx) = mpsc::channel(8);
        let agent = std::sync::Arc::new(PairingAgent::new(tx));
        let agent2 = agent.clone();
        let handle = tokio::spawn(async move { agent2.request_confirmation(device("/dev/bb"), 1).await });
        let _ = rx.recv().await.unwrap();

        agent.confirm("/dev/bb", true).await.unwrap();
        let _ = handle.await.unwrap();

        let second = agent.confirm("/dev/bb", true).await;
        assert!(matches!(second, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn rejection_surfaces_as_pairing_rejected() {
        let (tx, mut rx) = mpsc::channel(8);
        let agent = std::sync::Arc::new(PairingAgent::new(tx));
        let agent2 = agent.clone();
        let handle = tokio::spawn(async move { agent2.request_authorization(device("/dev/cc")).await });
        let _ = rx.recv().await.unwrap();
        agent.confirm("/dev/cc", false).await.unwrap();
        assert!(matches!(handle.await.unwrap(), Err(Error::PairingRejected)));
    }

    #[tokio::test]
    async fn hid_service_auto_approved_without_event() {
        let (tx, mut rx) = mpsc::channel(8);
        let agent = PairingAgent::new(tx);
        let result = agent.authorize_service(device("/dev/dd"), HID_SERVICE_UUID.to_string()).await;
        assert!(result.is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn cancel_rejects_all_pending() {
        let (tx, mut rx) = mpsc::channel(8);
        let agent = std::sync::Arc::new(PairingAgent::new(tx));
        let agent2 = agent.clone();
        let handle = tokio::spawn(async move { agent2.request_confirmation(device("/dev/ee"), 7).await });
        let _ = rx.recv().await.unwrap();

        agent.cancel().await;
        assert!(matches!(handle.await.unwrap(), Err(Error::PairingRejected)));
    }
}
