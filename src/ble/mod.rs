pub mod agent;
pub mod peripheral;
pub mod reports;

pub use agent::{DeviceInfo, PairingAgent, PairingEvent};
pub use peripheral::{BlePeripheral, BleProfileKind, PeerInfo};
