/// RF Receiver: owns the blocking OS thread polling the radio, decodes the
/// fixed opcode table into button press/repeat/release events, and hands
/// them to the cooperative scheduler over a channel — the only shared state
/// between the blocking thread and the async world is that channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::Sender;

use crate::rf::radio::RfRadio;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ButtonEvent {
    Press(String),
    Repeat(Option<String>),
    Release(Option<String>),
}

const OP_REPEAT: u32 = 0x400028;
const OP_RELEASE: u32 = 0x4f0004;
const OP_IDLE: u32 = 0x40044c;
const OP_SLEEP: u32 = 0x4f0300;
const OP_WAKE: u32 = 0x4f0700;
const OP_MULTI_RELEASE_A: u32 = 0xc10000;
const OP_MULTI_RELEASE_B: u32 = 0xc30000;

fn decode_payload(payload: &[u8], known_commands: &HashMap<u32, String>) -> Option<DecodedOp> {
    if payload.len() < 5 {
        log::warn!("Received unexpectedly short RF payload: {payload:02x?}");
        return None;
    }
    let cmd = ((payload[1] as u32) << 16) | ((payload[2] as u32) << 8) | payload[3] as u32;

    if let Some(name) = known_commands.get(&cmd) {
        return Some(DecodedOp::Press(name.clone()));
    }
    match cmd {
        OP_IDLE => None,
        OP_SLEEP => {
            log::debug!("Remote going to sleep");
            None
        }
        OP_WAKE => {
            log::debug!("Remote woke up");
            None
        }
        OP_REPEAT => Some(DecodedOp::Repeat),
        OP_RELEASE => Some(DecodedOp::Release),
        OP_MULTI_RELEASE_A | OP_MULTI_RELEASE_B => None,
        other => {
            log::warn!("Unexpected RF payload opcode: 0x{other:06x}");
            None
        }
    }
}

enum DecodedOp {
    Press(String),
    Repeat,
    Release,
}

pub struct Listener {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl Listener {
    /// Spawns the blocking listener thread. `radio` must already be
    /// constructed (opened/configured) by the caller; this call binds the
    /// reading pipes, powers up, and starts the poll loop.
    pub fn spawn(
        mut radio: Box<dyn RfRadio>,
        addresses: [[u8; 5]; 2],
        known_commands: HashMap<u32, String>,
        poll_interval_ms: u64,
        tx: Sender<ButtonEvent>,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = Arc::clone(&shutdown);

        let handle = std::thread::Builder::new()
            .name("rf-listener".into())
            .spawn(move || {
                if let Err(e) = radio.open_reading_pipes(&addresses[0], &addresses[1]) {
                    log::error!("Failed to open RF reading pipes: {e}");
                    return;
                }
                if radio.power_up().is_err() {
                    log::warn!("RF hardware is not responding. Listener will not respond to commands.");
                    return;
                }
                if radio.start_listening().is_err() {
                    log::error!("Failed to start RF listening");
                    return;
                }

                let mut last_key: Option<String> = None;

                while !thread_shutdown.load(Ordering::Relaxed) {
                    if radio.available() {
                        let payload = radio.read();
                        match decode_payload(&payload, &known_commands) {
                            Some(DecodedOp::Press(name)) => {
                                log::debug!("Button {name} pressed!");
                                let _ = tx.blocking_send(ButtonEvent::Press(name.clone()));
                                last_key = Some(name);
                            }
                            Some(DecodedOp::Repeat) => {
                                let _ = tx.blocking_send(ButtonEvent::Repeat(last_key.clone()));
                            }
                            Some(DecodedOp::Release) => {
                                log::debug!("{last_key:?} released");
                                let _ = tx.blocking_send(ButtonEvent::Release(last_key.clone()));
                            }
                            None => {}
                        }
                    }
                    std::thread::sleep(Duration::from_millis(poll_interval_ms));
                }

                let _ = radio.power_down();
                log::debug!("RF listener thread exiting");
            })
            .expect("failed to spawn rf-listener thread");

        Self { shutdown, handle: Some(handle) }
    }

    /// Signals the listener thread to stop; it powers the radio down and
    /// exits within one poll interval.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

/// Parses `config/remote_keymap.json`'s `{button_name: {rf_command: "0x.."}}`
/// shape into the `opcode -> button_name` table the listener matches against.
pub fn load_known_commands(raw: &str) -> HashMap<u32, String> {
    #[derive(serde::Deserialize)]
    struct Entry {
        rf_command: String,
    }
    let parsed: HashMap<String, Entry> = match serde_json::from_str(raw) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Failed to parse remote_keymap.json: {e}");
            return HashMap::new();
        }
    };
    parsed
        .into_iter()
        .filter_map(|(name, entry)| {
            let hex = entry.rf_command.trim_start_matches("0x").trim_start_matches("0X");
            u32::from_str_radix(hex, 16).ok().map(|code| (code, name))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rf::radio::FakeRadio;

    fn commands() -> HashMap<u32, String> {
        let mut m = HashMap::new();
        m.insert(0x010203, "Play".to_string());
        m
    }

    #[test]
    fn decode_known_opcode_is_press() {
        let payload = [0x00, 0x01, 0x02, 0x03, 0x00];
        match decode_payload(&payload, &commands()) {
            Some(DecodedOp::Press(name)) => assert_eq!(name, "Play"),
            _ => panic!("expected a press"),
        }
    }

    #[test]
    fn decode_repeat_and_release() {
        let repeat = [0x00, 0x40, 0x00, 0x28, 0x00];
        assert!(matches!(decode_payload(&repeat, &commands()), Some(DecodedOp::Repeat)));
        let release = [0x00, 0x4f, 0x00, 0x04, 0x00];
        assert!(matches!(decode_payload(&release, &commands()), Some(DecodedOp::Release)));
    }

    #[test]
    fn decode_idle_and_multi_release_are_ignored() {
        let idle = [0x00, 0x40, 0x04, 0x4c, 0x00];
        assert!(decode_payload(&idle, &commands()).is_none());
        let multi = [0x00, 0xc1, 0x00, 0x00, 0x00];
        assert!(decode_payload(&multi, &commands()).is_none());
    }

    #[test]
    fn decode_short_payload_is_none() {
        assert!(decode_payload(&[0x00, 0x01], &commands()).is_none());
    }

    #[test]
    fn load_known_commands_parses_hex() {
        let json = r#"{"Play": {"button": "TRANSPORT_PLAY", "rf_command": "0x010203"}}"#;
        let table = load_known_commands(json);
        assert_eq!(table.get(&0x010203), Some(&"Play".to_string()));
    }

    #[tokio::test]
    async fn listener_emits_press_repeat_release_in_order() {
        let mut radio = FakeRadio::new();
        radio.push(vec![0x00, 0x01, 0x02, 0x03, 0x00]);
        radio.push(vec![0x00, 0x40, 0x00, 0x28, 0x00]);
        radio.push(vec![0x00, 0x4f, 0x00, 0x04, 0x00]);

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let mut listener = Listener::spawn(
            Box::new(radio),
            [[0; 5], [0; 5]],
            commands(),
            5,
            tx,
        );

        let mut events = Vec::new();
        for _ in 0..3 {
            events.push(rx.recv().await.expect("event"));
        }
        listener.shutdown();

        assert_eq!(events[0], ButtonEvent::Press("Play".into()));
        assert_eq!(events[1], ButtonEvent::Repeat(Some("Play".into())));
        assert_eq!(events[2], ButtonEvent::Release(Some("Play".into())));
    }
}
