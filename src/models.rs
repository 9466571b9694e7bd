use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::session::InlineImage;
use crate::settings::Settings;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_IMAGE_MODEL: &str = "imagen-4.0-generate-001";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-3.0-generate-preview";
pub const DEFAULT_SPEECH_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_VOICE: &str = "Kore";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub image_model: String,
    pub video_model: String,
    pub speech_model: String,
    pub voice_name: String,
}

impl ApiConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            image_model: DEFAULT_IMAGE_MODEL.into(),
            video_model: DEFAULT_VIDEO_MODEL.into(),
            speech_model: DEFAULT_SPEECH_MODEL.into(),
            voice_name: DEFAULT_VOICE.into(),
        }
    }

    pub fn from_env() -> Result<Self, ApiError> {
        let env = |key: &str, default: &str| std::env::var(key).unwrap_or_else(|_| default.into());
        let config = Self {
            image_model: env("GEMINI_IMAGE_MODEL", DEFAULT_IMAGE_MODEL),
            video_model: env("GEMINI_VIDEO_MODEL", DEFAULT_VIDEO_MODEL),
            speech_model: env("GEMINI_TTS_MODEL", DEFAULT_SPEECH_MODEL),
            voice_name: env("GEMINI_VOICE", DEFAULT_VOICE),
            ..Self::new(env("GEMINI_BASE_URL", DEFAULT_BASE_URL), std::env::var("GEMINI_API_KEY").ok().filter(|k| !k.is_empty()))
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| ApiError::InvalidConfig(format!("base url {}: {}", self.base_url, e)))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::InvalidConfig(format!("unsupported scheme {}", parsed.scheme())));
        }
        Ok(())
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("remote returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

/// A named operation the model asks the host to perform mid-stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub name: String,
    pub args: Value,
}

impl ToolInvocation {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self { name: name.into(), args }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseChunk {
    pub text: Option<String>,
    pub tool_calls: Vec<ToolInvocation>,
}

impl ResponseChunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), tool_calls: Vec::new() }
    }

    pub fn tools(tool_calls: Vec<ToolInvocation>) -> Self {
        Self { text: None, tool_calls }
    }
}

pub type ChunkStream = BoxStream<'static, Result<ResponseChunk, ApiError>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub text: String,
    pub image: Option<InlineImage>,
}

/// A live chat session with the remote model; owns the conversation history it sends.
#[async_trait]
pub trait ChatSession: Send + Sync {
    async fn send_message_stream(&self, message: OutgoingMessage) -> Result<ChunkStream, ApiError>;
    async fn record_reply(&self, text: &str);
}

pub trait ChatFactory: Send + Sync {
    fn start_chat(&self, settings: &Settings) -> Arc<dyn ChatSession>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoOperation {
    pub name: String,
    pub done: bool,
    pub video_uri: Option<String>,
}

#[async_trait]
pub trait MediaGenerator: Send + Sync {
    async fn generate_image(&self, prompt: &str) -> Result<Option<InlineImage>, ApiError>;
    async fn start_video(&self, prompt: &str) -> Result<VideoOperation, ApiError>;
    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation, ApiError>;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpeechClip {
    pub mime_type: String,
    pub data: String,
}

#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Option<SpeechClip>, ApiError>;
}
