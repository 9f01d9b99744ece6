/// Minimal file-backed stand-in for the relational store (component M),
/// which spec.md §6 explicitly places out of scope beyond its interface.
/// Loads `devices.json`/`commands.json`/`macros.json`/`scenes.json` from the
/// configured directory at startup — enough for the Scene Engine and
/// Dispatcher to resolve ids without a real database dependency.
use std::collections::HashMap;

use crate::keymap;
use crate::model::{Command, CommandId, Device, DeviceId, Keymap, Macro, MacroId, Scene, SceneId};
use crate::scene::SceneStore;

pub struct FileStore {
    devices: HashMap<DeviceId, Device>,
    commands: HashMap<CommandId, Command>,
    macros: HashMap<MacroId, Macro>,
    scenes: HashMap<SceneId, Scene>,
    config_dir: String,
}

impl FileStore {
    pub fn load(config_dir: &str) -> Self {
        let devices = load_list::<Device>(config_dir, "devices.json").into_iter().map(|d| (d.id, d)).collect();
        let commands = load_list::<Command>(config_dir, "commands.json").into_iter().map(|c| (c.id, c)).collect();
        let macros = load_list::<Macro>(config_dir, "macros.json").into_iter().map(|m| (m.id, m)).collect();
        let scenes = load_list::<Scene>(config_dir, "scenes.json").into_iter().map(|s| (s.id, s)).collect();
        Self { devices, commands, macros, scenes, config_dir: config_dir.to_string() }
    }

    pub fn devices(&self) -> Vec<Device> {
        self.devices.values().cloned().collect()
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.values().cloned().collect()
    }
}

fn load_list<T: serde::de::DeserializeOwned>(config_dir: &str, file_name: &str) -> Vec<T> {
    let path = format!("{config_dir}/{file_name}");
    match std::fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str(&raw) {
            Ok(list) => list,
            Err(e) => {
                log::warn!("failed to parse {path}: {e}");
                Vec::new()
            }
        },
        Err(_) => {
            log::debug!("no {file_name} found in {config_dir}, starting empty");
            Vec::new()
        }
    }
}

#[async_trait::async_trait]
impl SceneStore for FileStore {
    async fn get_scene(&self, id: SceneId) -> Option<Scene> {
        self.scenes.get(&id).cloned()
    }
    async fn get_macro(&self, id: MacroId) -> Option<Macro> {
        self.macros.get(&id).cloned()
    }
    async fn get_command(&self, id: CommandId) -> Option<Command> {
        self.commands.get(&id).cloned()
    }

    /// Loads `keymap_{name}.json` from the config directory (§4.9, §6); a
    /// missing or unparsable file yields an empty command table rather than
    /// an error, matching the neutral "no scene active" state.
    async fn load_keymap(&self, name: &str) -> Keymap {
        let raw = std::fs::read_to_string(format!("{}/keymap_{name}.json", self.config_dir)).unwrap_or_default();
        let command_bindings = keymap::load_command_bindings(&raw);
        Keymap { scene_bindings: HashMap::new(), command_bindings }
    }
}
