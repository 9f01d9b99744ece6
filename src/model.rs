/// Core data model: Command, Device, Macro, Scene, Keymap, DeviceState, Status,
/// PulseArray, and the small `Copy` newtype ids used as map keys throughout.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

macro_rules! newtype_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub u64);

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

newtype_id!(DeviceId);
newtype_id!(CommandId);
newtype_id!(MacroId);
newtype_id!(SceneId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    Ir,
    Bt,
    Network,
    Script,
    Integration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ButtonRole {
    PowerOn,
    PowerOff,
    PowerToggle,
    VolumeUp,
    VolumeDown,
    Mute,
    DirectionUp,
    DirectionDown,
    DirectionLeft,
    DirectionRight,
    Select,
    Back,
    Home,
    Menu,
    ColorRed,
    ColorGreen,
    ColorYellow,
    ColorBlue,
    TransportPlay,
    TransportPause,
    TransportStop,
    TransportRewind,
    TransportFastForward,
    Number0,
    Number1,
    Number2,
    Number3,
    Number4,
    Number5,
    Number6,
    Number7,
    Number8,
    Number9,
    ChannelUp,
    ChannelDown,
}

/// Opaque for anything outside the one closed value the dispatcher inspects
/// (`Input`); other group names round-trip unexamined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandGroup {
    Input,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkRequest {
    pub method: HttpMethod,
    pub url: String,
    pub body: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntegrationAction {
    ToggleLight,
    BrightnessUp,
    BrightnessDown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationRequest {
    pub action: IntegrationAction,
    /// Required iff `action == ToggleLight`.
    pub entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BtAction {
    Key(String),
    MediaKey(String),
}

/// Tagged transport payload — replaces dynamic attribute access on the
/// original command record (REDESIGN FLAGS) with a closed enum matched
/// exhaustively by the Dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandPayload {
    Ir(PulseArray),
    Bt(BtAction),
    Network(NetworkRequest),
    Integration(IntegrationRequest),
    Script,
}

impl CommandPayload {
    pub fn command_type(&self) -> CommandType {
        match self {
            CommandPayload::Ir(_) => CommandType::Ir,
            CommandPayload::Bt(_) => CommandType::Bt,
            CommandPayload::Network(_) => CommandType::Network,
            CommandPayload::Integration(_) => CommandType::Integration,
            CommandPayload::Script => CommandType::Script,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    pub name: String,
    pub device: Option<DeviceId>,
    pub button: ButtonRole,
    pub group: CommandGroup,
    pub payload: CommandPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    Display,
    Amplifier,
    Player,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub device_type: DeviceType,
    pub commands: Vec<CommandId>,
}

/// `len(delays) ∈ {len(commands)-1, len(commands)}`; a trailing delay, if
/// present, is a tail pause after the last step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Macro {
    pub id: MacroId,
    pub name: String,
    pub commands: Vec<CommandId>,
    pub delays_ms: Vec<u64>,
}

impl Macro {
    pub fn is_valid(&self) -> bool {
        let n = self.commands.len();
        self.delays_ms.len() + 1 == n || self.delays_ms.len() == n
    }

    /// Delay to sleep after dispatching `commands[i]`, or `None` to proceed
    /// without pause (index out of range for `delays_ms`).
    pub fn delay_after(&self, i: usize) -> Option<u64> {
        self.delays_ms.get(i).copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub name: String,
    pub bluetooth_peer: Option<String>,
    pub keymap_name: Option<String>,
    pub start_macro: Option<MacroId>,
    pub stop_macro: Option<MacroId>,
    pub devices: Vec<DeviceId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Keymap {
    pub scene_bindings: HashMap<String, SceneId>,
    pub command_bindings: HashMap<String, CommandId>,
}

/// Per-device observed state. Created lazily on first observation, mutated
/// only by the Status Broadcaster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceState {
    pub powered: bool,
    pub input: Option<CommandId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SceneStatus {
    Starting,
    Active,
    Stopping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub devices: HashMap<DeviceId, DeviceState>,
    pub current_scene: Option<SceneId>,
    pub scene_status: Option<SceneStatus>,
}

impl Status {
    /// `scene_status == null ⇔ current_scene == null` (§8 universal invariant).
    pub fn invariant_holds(&self) -> bool {
        self.scene_status.is_none() == self.current_scene.is_none()
    }
}

/// `[mark, space, mark, space, …]` in microseconds, starting with a mark.
pub type PulseArray = Vec<u32>;

pub fn pulse_array_is_valid(pulses: &[u32]) -> bool {
    pulses.len() >= 4 && pulses.iter().all(|&p| p > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macro_delay_arity() {
        let m = Macro {
            id: MacroId(1),
            name: "m".into(),
            commands: vec![CommandId(1), CommandId(2), CommandId(3)],
            delays_ms: vec![100, 200],
        };
        assert!(m.is_valid());
        assert_eq!(m.delay_after(0), Some(100));
        assert_eq!(m.delay_after(2), None);

        let with_tail = Macro { delays_ms: vec![100, 200, 300], ..m.clone() };
        assert!(with_tail.is_valid());

        let invalid = Macro { delays_ms: vec![100], ..m };
        assert!(!invalid.is_valid());
    }

    #[test]
    fn status_invariant() {
        let mut s = Status::default();
        assert!(s.invariant_holds());
        s.current_scene = Some(SceneId(1));
        assert!(!s.invariant_holds());
        s.scene_status = Some(SceneStatus::Active);
        assert!(s.invariant_holds());
    }

    #[test]
    fn pulse_array_validity() {
        assert!(pulse_array_is_valid(&[1, 2, 3, 4]));
        assert!(!pulse_array_is_valid(&[1, 2, 3]));
        assert!(!pulse_array_is_valid(&[1, 0, 3, 4]));
    }
}
