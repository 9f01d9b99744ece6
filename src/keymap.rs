/// Keymap + Input Router: two on-disk tables (scene switch, per-scene
/// command) plus RF-event routing into the Task Queue, plus the
/// keymap-suggestion supplement.
///
/// Grounded on `RemoteController.py::load_key_map`/`suggest_keymap`/
/// `handle_button_press`/`handle_button_release`/`_release_all`.
use std::collections::HashMap;

use crate::model::{ButtonRole, Command, CommandId, Device, DeviceType, Keymap, Scene, SceneId};
use crate::rf::listener::ButtonEvent;

/// Loads the fixed scene-switch table from `config/keymap_scenes.json`
/// (`button_name -> scene_id`).
pub fn load_scene_bindings(raw: &str) -> HashMap<String, SceneId> {
    let parsed: HashMap<String, u64> = match serde_json::from_str(raw) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Failed to parse keymap_scenes.json: {e}");
            return HashMap::new();
        }
    };
    parsed.into_iter().map(|(button, id)| (button, SceneId(id))).collect()
}

/// Loads a per-scene command table from `config/keymap_{name}.json`
/// (`button_name -> command_id`).
pub fn load_command_bindings(raw: &str) -> HashMap<String, CommandId> {
    let parsed: HashMap<String, u64> = match serde_json::from_str(raw) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Failed to parse keymap file: {e}");
            return HashMap::new();
        }
    };
    parsed.into_iter().map(|(button, id)| (button, CommandId(id))).collect()
}

/// Given a scene's devices and the remote's available buttons (from
/// `config/remote_keymap.json`, `button_name -> RemoteButton`), suggest a
/// command table: amplifier gets volume/mute, the player (falling back to
/// the display) gets navigation/transport/number/channel buttons.
///
/// `remote_keymap`'s value is the button role it represents on the
/// physical remote.
pub fn suggest(scene: &Scene, devices: &[Device], commands: &HashMap<CommandId, Command>, remote_keymap: &HashMap<String, ButtonRole>) -> Keymap {
    let mut available_buttons: HashMap<ButtonRole, String> = HashMap::new();
    let mut suggestion: HashMap<String, CommandId> = HashMap::new();
    for (remote_button, role) in remote_keymap {
        available_buttons.insert(*role, remote_button.clone());
    }

    let mut assign = |device: &Device, role: ButtonRole| {
        let Some(remote_button) = available_buttons.get(&role) else { return };
        if suggestion.contains_key(remote_button) {
            return;
        }
        let matching = device.commands.iter().find_map(|cid| {
            let command = commands.get(cid)?;
            (command.button == role).then_some(*cid)
        });
        if let Some(command_id) = matching {
            suggestion.insert(remote_button.clone(), command_id);
        }
    };

    let scene_devices: Vec<&Device> = scene.devices.iter().filter_map(|id| devices.iter().find(|d| d.id == *id)).collect();

    if let Some(amplifier) = scene_devices.iter().find(|d| d.device_type == DeviceType::Amplifier) {
        assign(amplifier, ButtonRole::VolumeUp);
        assign(amplifier, ButtonRole::VolumeDown);
        assign(amplifier, ButtonRole::Mute);
    }

    let player = scene_devices
        .iter()
        .find(|d| d.device_type == DeviceType::Player)
        .or_else(|| scene_devices.iter().find(|d| d.device_type == DeviceType::Display));

    if let Some(player) = player {
        for role in [
            ButtonRole::ColorRed,
            ButtonRole::ColorGreen,
            ButtonRole::ColorYellow,
            ButtonRole::ColorBlue,
            ButtonRole::Menu,
            ButtonRole::DirectionUp,
            ButtonRole::DirectionDown,
            ButtonRole::DirectionLeft,
            ButtonRole::DirectionRight,
            ButtonRole::Select,
            ButtonRole::Back,
            ButtonRole::VolumeUp,
            ButtonRole::VolumeDown,
            ButtonRole::Mute,
            ButtonRole::ChannelUp,
            ButtonRole::ChannelDown,
            ButtonRole::TransportRewind,
            ButtonRole::TransportFastForward,
            ButtonRole::TransportPlay,
            ButtonRole::TransportPause,
            ButtonRole::TransportStop,
            ButtonRole::Number0,
            ButtonRole::Number1,
            ButtonRole::Number2,
            ButtonRole::Number3,
            ButtonRole::Number4,
            ButtonRole::Number5,
            ButtonRole::Number6,
            ButtonRole::Number7,
            ButtonRole::Number8,
            ButtonRole::Number9,
        ] {
            assign(player, role);
        }
    }

    Keymap { scene_bindings: HashMap::new(), command_bindings: suggestion }
}

/// The action the input router wants the control plane to take for one RF
/// event, resolved against the currently-loaded bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutedAction {
    StopCurrentScene,
    StartScene(SceneId),
    Dispatch { command_id: CommandId, press_without_release: bool },
    ReleaseAll,
    None,
}

/// Resolves one RF button event into the action the control plane should
/// enqueue. `repeat` carries no action of its own in the core (§4.9): the
/// held-command state is already covered by the original press.
pub fn route(event: &ButtonEvent, keymap: &Keymap) -> RoutedAction {
    match event {
        ButtonEvent::Press(button) if button == "Off" => RoutedAction::StopCurrentScene,
        ButtonEvent::Press(button) => {
            if let Some(scene_id) = keymap.scene_bindings.get(button) {
                RoutedAction::StartScene(*scene_id)
            } else if let Some(command_id) = keymap.command_bindings.get(button) {
                RoutedAction::Dispatch { command_id: *command_id, press_without_release: true }
            } else {
                RoutedAction::None
            }
        }
        ButtonEvent::Release(_) => RoutedAction::ReleaseAll,
        ButtonEvent::Repeat(_) => RoutedAction::None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceId;

    #[test]
    fn off_press_routes_to_stop() {
        let keymap = Keymap::default();
        let action = route(&ButtonEvent::Press("Off".into()), &keymap);
        assert_eq!(action, RoutedAction::StopCurrentScene);
    }

    #[test]
    fn scene_button_routes_to_start_scene() {
        let mut keymap = Keymap::default();
        keymap.scene_bindings.insert("Watch".into(), SceneId(3));
        let action = route(&ButtonEvent::Press("Watch".into()), &keymap);
        assert_eq!(action, RoutedAction::StartScene(SceneId(3)));
    }

    #[test]
    fn command_button_routes_to_dispatch_with_press_without_release() {
        let mut keymap = Keymap::default();
        keymap.command_bindings.insert("Play".into(), CommandId(42));
        let action = route(&ButtonEvent::Press("Play".into()), &keymap);
        assert_eq!(action, RoutedAction::Dispatch { command_id: CommandId(42), press_without_release: true });
    }

    #[test]
    fn unknown_button_routes_to_none() {
        let keymap = Keymap::default();
        let action = route(&ButtonEvent::Press("Unbound".into()), &keymap);
        assert_eq!(action, RoutedAction::None);
    }

    #[test]
    fn release_routes_to_release_all_and_repeat_is_ignored() {
        let keymap = Keymap::default();
        assert_eq!(route(&ButtonEvent::Release(None), &keymap), RoutedAction::ReleaseAll);
        assert_eq!(route(&ButtonEvent::Repeat(None), &keymap), RoutedAction::None);
    }

    #[test]
    fn suggest_assigns_amplifier_and_player_roles() {
        let amp = Device { id: DeviceId(1), name: "Amp".into(), device_type: DeviceType::Amplifier, commands: vec![CommandId(1), CommandId(2)] };
        let player = Device { id: DeviceId(2), name: "Player".into(), device_type: DeviceType::Player, commands: vec![CommandId(3)] };
        let scene = Scene {
            id: SceneId(1),
            name: "Movie".into(),
            bluetooth_peer: None,
            keymap_name: None,
            start_macro: None,
            stop_macro: None,
            devices: vec![DeviceId(1), DeviceId(2)],
        };

        let mut commands = HashMap::new();
        commands.insert(
            CommandId(1),
            Command { id: CommandId(1), name: "vol up".into(), device: Some(DeviceId(1)), button: ButtonRole::VolumeUp, group: crate::model::CommandGroup::Other, payload: crate::model::CommandPayload::Script },
        );
        commands.insert(
            CommandId(3),
            Command { id: CommandId(3), name: "select".into(), device: Some(DeviceId(2)), button: ButtonRole::Select, group: crate::model::CommandGroup::Other, payload: crate::model::CommandPayload::Script },
        );

        let mut remote_keymap = HashMap::new();
        remote_keymap.insert("VolUp".to_string(), ButtonRole::VolumeUp);
        remote_keymap.insert("Ok".to_string(), ButtonRole::Select);

        let suggestion = suggest(&scene, &[amp, player], &commands, &remote_keymap);
        assert_eq!(suggestion.command_bindings.get("VolUp"), Some(&CommandId(1)));
        assert_eq!(suggestion.command_bindings.get("Ok"), Some(&CommandId(3)));
    }
}
