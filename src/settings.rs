use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_DISPLAY_NAME: &str = "Aether";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are Aether, an assistant living inside a chat interface you can reshape. \
You may call generate_image and generate_video to create media, update_mind to rewrite your own instruction or name, \
modify_interface to restyle the page with CSS, inject_code to hand a script to the sandboxed page, \
install_module to add a widget to the module list, and hardware_control to trigger a visual effect. \
Narrate what you do in plain text.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SafetyLevel {
    #[default]
    Default,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub display_name: String,
    pub model: String,
    pub system_instruction: String,
    pub safety_level: SafetyLevel,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_name: DEFAULT_DISPLAY_NAME.into(),
            model: DEFAULT_MODEL.into(),
            system_instruction: DEFAULT_SYSTEM_INSTRUCTION.into(),
            safety_level: SafetyLevel::Default,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SettingsPatch {
    pub display_name: Option<String>,
    pub model: Option<String>,
    pub system_instruction: Option<String>,
    pub safety_level: Option<SafetyLevel>,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("invalid settings file {path}: {source}")]
    Parse { path: String, source: serde_json::Error },
}

impl Settings {
    pub fn apply_patch(&mut self, patch: SettingsPatch) {
        if let Some(name) = patch.display_name { self.display_name = name; }
        if let Some(model) = patch.model { self.model = model; }
        if let Some(instruction) = patch.system_instruction { self.system_instruction = instruction; }
        if let Some(level) = patch.safety_level { self.safety_level = level; }
    }

    /// Rewrites the assistant's own instruction; the display name only changes when one is given.
    pub fn update_mind(&mut self, instruction: String, name: Option<String>) {
        self.system_instruction = instruction;
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            self.display_name = name;
        }
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| SettingsError::Read { path: display.clone(), source })?;
        serde_json::from_str(&raw).map_err(|source| SettingsError::Parse { path: display, source })
    }
}
