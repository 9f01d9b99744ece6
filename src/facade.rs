/// Thin seams for the out-of-scope HTTP/WebSocket facade (component L) and
/// persistence layer (component M): spec.md §1 names both as "external
/// collaborators, only their interfaces are specified." The Control Plane
/// holds these as trait objects; a real facade/store plugs in by
/// implementing them.
use async_trait::async_trait;

use crate::ble::agent::PairingEvent;
use crate::model::Status;

/// The WebSocket status fan-out (§4.11, §6): pushed the full `Status` JSON
/// whenever it changes.
#[async_trait]
pub trait StatusSink: Send + Sync {
    async fn status_changed(&self, status: &Status);
}

/// The pairing WebSocket channel (§6): pushed pairing-agent events so a
/// human can answer `RequestConfirmation`/`RequestAuthorization` prompts.
#[async_trait]
pub trait PairingSink: Send + Sync {
    async fn pairing_event(&self, event: &PairingEvent);
}

/// A sink that drops everything it's given — the default when no real
/// facade (component L) is attached, so the control plane can still run
/// headless.
pub struct NullSink;

#[async_trait]
impl StatusSink for NullSink {
    async fn status_changed(&self, _status: &Status) {}
}

#[async_trait]
impl PairingSink for NullSink {
    async fn pairing_event(&self, _event: &PairingEvent) {}
}
