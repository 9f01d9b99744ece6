pub mod codec;
pub mod hardware;
pub mod transceiver;

pub use codec::{DecodedCode, DetectResult, Protocol};
pub use hardware::IrHardware;
pub use transceiver::{RecordEvent, Transceiver};
