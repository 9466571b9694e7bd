use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const TRANSPORT_FAILURE_TEXT: &str = "Connection error. Please try again.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TurnMedia {
    Image(InlineImage),
    Video { uri: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub id: Uuid,
    pub role: Role,
    pub text: String,
    pub media: Option<TurnMedia>,
    pub is_error: bool,
    pub is_system_event: bool,
    pub code_snippet: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            media: None,
            is_error: false,
            is_system_event: false,
            code_snippet: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>, image: Option<InlineImage>) -> Self {
        let mut turn = Self::new(Role::User, text);
        turn.media = image.map(TurnMedia::Image);
        turn
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self::new(Role::Model, text)
    }

    pub fn media(media: TurnMedia) -> Self {
        let mut turn = Self::new(Role::Model, "");
        turn.media = Some(media);
        turn
    }

    pub fn system_event(text: impl Into<String>) -> Self {
        let mut turn = Self::new(Role::Model, text);
        turn.is_system_event = true;
        turn
    }

    pub fn system_error(text: impl Into<String>) -> Self {
        let mut turn = Self::system_event(text);
        turn.is_error = true;
        turn
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code_snippet = Some(code.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ModuleIcon {
    Cpu,
    Shield,
    Globe,
    Zap,
    #[default]
    Generic,
}

impl ModuleIcon {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "cpu" => Self::Cpu,
            "shield" => Self::Shield,
            "globe" => Self::Globe,
            "zap" => Self::Zap,
            _ => Self::Generic,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstalledModule {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub icon: ModuleIcon,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum VisualEffect {
    #[default]
    None,
    Glitch,
    Invert,
    Blur,
    Pulse,
}

impl VisualEffect {
    /// Unrecognized actions normalize to `None`, clearing any active effect.
    pub fn from_action(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "glitch" => Self::Glitch,
            "invert" => Self::Invert,
            "blur" => Self::Blur,
            "pulse" => Self::Pulse,
            _ => Self::None,
        }
    }

    pub fn css_class(&self) -> Option<&'static str> {
        match self {
            Self::None => None,
            Self::Glitch => Some("fx-glitch"),
            Self::Invert => Some("fx-invert"),
            Self::Blur => Some("fx-blur"),
            Self::Pulse => Some("fx-pulse"),
        }
    }

    pub fn narration(&self) -> &'static str {
        match self {
            Self::None => "Visual systems back to normal.",
            Self::Glitch => "Signal corruption engaged.",
            Self::Invert => "Display polarity inverted.",
            Self::Blur => "Optics defocused.",
            Self::Pulse => "Core pulse initiated.",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TurnPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
    Completed,
    Errored,
}

/// Turn log plus the busy flag that serializes sends.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Conversation {
    pub turns: Vec<Turn>,
    pub is_loading: bool,
    pub phase: TurnPhase,
}

impl Conversation {
    pub fn push(&mut self, turn: Turn) -> Uuid {
        let id = turn.id;
        self.turns.push(turn);
        id
    }

    /// Full overwrite of a turn's text; a no-op when the turn is gone (history cleared mid-stream).
    pub fn set_text(&mut self, id: Uuid, text: &str) {
        if let Some(turn) = self.turns.iter_mut().find(|t| t.id == id) {
            turn.text.clear();
            turn.text.push_str(text);
        }
    }

    /// Rewrites the streaming turn `id` as failed. When that turn is gone (history cleared
    /// mid-stream) the latest plain model turn takes the marker; media turns and system events never do.
    pub fn mark_model_failed(&mut self, id: Uuid, text: &str) {
        let target = match self.turns.iter().position(|t| t.id == id) {
            Some(idx) => Some(idx),
            None => self
                .turns
                .iter()
                .rposition(|t| t.role == Role::Model && !t.is_system_event && t.media.is_none()),
        };
        match target {
            Some(idx) => {
                let turn = &mut self.turns[idx];
                turn.text = text.to_string();
                turn.is_error = true;
            }
            None => {
                let mut turn = Turn::model(text);
                turn.is_error = true;
                self.turns.push(turn);
            }
        }
    }

    /// Drops every turn. An in-flight send keeps the busy flag so no second send can start.
    pub fn clear(&mut self) {
        self.turns.clear();
        if !self.is_loading {
            self.phase = TurnPhase::Idle;
        }
    }
}
