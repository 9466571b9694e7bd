use std::sync::Arc;

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::models::{
    ApiConfig, ApiError, ChatFactory, ChatSession, ChunkStream, MediaGenerator, OutgoingMessage, ResponseChunk, SpeechClip,
    SpeechSynthesizer, ToolInvocation, VideoOperation,
};
use crate::session::InlineImage;
use crate::settings::{SafetyLevel, Settings};

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Content {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<Blob>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), ..Default::default() }
    }

    fn image(image: &InlineImage) -> Self {
        Self {
            inline_data: Some(Blob { mime_type: image.mime_type.clone(), data: image.data.clone() }),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Blob {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

#[derive(Debug, Deserialize, Default)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    error: Option<StreamError>,
}

/// Error object the API sends in place of a chunk when generation fails mid-stream.
#[derive(Debug, Deserialize)]
struct StreamError {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Prediction {
    bytes_base64_encoded: Option<String>,
    mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OperationResponse {
    name: String,
    #[serde(default)]
    done: bool,
    response: Option<Value>,
}

impl OperationResponse {
    fn into_operation(self) -> VideoOperation {
        let video_uri = self
            .response
            .as_ref()
            .and_then(|r| r.pointer("/generateVideoResponse/generatedSamples/0/video/uri"))
            .and_then(Value::as_str)
            .map(str::to_string);
        VideoOperation { name: self.name, done: self.done, video_uri }
    }
}

fn parse_chunk(data: &str) -> Result<ResponseChunk, ApiError> {
    let response: GenerateContentResponse = serde_json::from_str(data)?;
    if let Some(err) = response.error {
        return Err(ApiError::Stream(format!("{} {}: {}", err.code, err.status, err.message)));
    }
    let mut text: Option<String> = None;
    let mut tool_calls = Vec::new();
    let parts = response.candidates.into_iter().next().and_then(|c| c.content).map(|c| c.parts).unwrap_or_default();
    for part in parts {
        if let Some(t) = part.text {
            text.get_or_insert_with(String::new).push_str(&t);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(ToolInvocation::new(call.name, call.args));
        }
    }
    Ok(ResponseChunk { text, tool_calls })
}

pub fn function_declarations() -> Value {
    json!([
        {
            "name": "generate_image",
            "description": "Generate an image from a text prompt and show it in the chat.",
            "parameters": {"type": "OBJECT", "properties": {"prompt": {"type": "STRING"}}, "required": ["prompt"]}
        },
        {
            "name": "generate_video",
            "description": "Generate a short video from a text prompt and show it in the chat.",
            "parameters": {"type": "OBJECT", "properties": {"prompt": {"type": "STRING"}}, "required": ["prompt"]}
        },
        {
            "name": "update_mind",
            "description": "Replace your own system instruction and optionally your display name.",
            "parameters": {
                "type": "OBJECT",
                "properties": {"new_instruction": {"type": "STRING"}, "new_name": {"type": "STRING"}},
                "required": ["new_instruction"]
            }
        },
        {
            "name": "modify_interface",
            "description": "Replace the page's global stylesheet with the given CSS.",
            "parameters": {"type": "OBJECT", "properties": {"css": {"type": "STRING"}}, "required": ["css"]}
        },
        {
            "name": "inject_code",
            "description": "Hand a JavaScript snippet to the sandboxed page for deferred execution.",
            "parameters": {"type": "OBJECT", "properties": {"code": {"type": "STRING"}}, "required": ["code"]}
        },
        {
            "name": "install_module",
            "description": "Add a module card to the installed module list.",
            "parameters": {
                "type": "OBJECT",
                "properties": {
                    "name": {"type": "STRING"},
                    "description": {"type": "STRING"},
                    "icon": {"type": "STRING", "enum": ["cpu", "shield", "globe", "zap"]}
                },
                "required": ["name", "description"]
            }
        },
        {
            "name": "hardware_control",
            "description": "Trigger a visual effect on the whole interface.",
            "parameters": {
                "type": "OBJECT",
                "properties": {"action": {"type": "STRING", "enum": ["glitch", "invert", "blur", "pulse", "reset"]}},
                "required": ["action"]
            }
        }
    ])
}

fn safety_settings(level: SafetyLevel) -> Option<Value> {
    match level {
        SafetyLevel::Default => None,
        SafetyLevel::None => Some(Value::Array(
            HARM_CATEGORIES.iter().map(|c| json!({"category": c, "threshold": "BLOCK_NONE"})).collect(),
        )),
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    config: Arc<ApiConfig>,
}

impl GeminiClient {
    pub fn new(config: ApiConfig) -> Self {
        Self { http: reqwest::Client::new(), config: Arc::new(config) }
    }

    pub fn chat(&self, settings: &Settings) -> GeminiChat {
        GeminiChat {
            client: self.clone(),
            model: settings.model.clone(),
            system_instruction: settings.system_instruction.clone(),
            safety_level: settings.safety_level,
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    async fn post_json(&self, url: String, body: &Value) -> Result<reqwest::Response, ApiError> {
        let mut rb = self.http.post(url).json(body);
        if let Some(key) = &self.config.api_key {
            rb = rb.header("x-goog-api-key", key);
        }
        check_status(rb.send().await?).await
    }

    async fn get(&self, url: String) -> Result<reqwest::Response, ApiError> {
        let mut rb = self.http.get(url);
        if let Some(key) = &self.config.api_key {
            rb = rb.header("x-goog-api-key", key);
        }
        check_status(rb.send().await?).await
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ApiError::Status { status: status.as_u16(), body });
    }
    Ok(resp)
}

impl ChatFactory for GeminiClient {
    fn start_chat(&self, settings: &Settings) -> Arc<dyn ChatSession> {
        Arc::new(self.chat(settings))
    }
}

#[async_trait]
impl MediaGenerator for GeminiClient {
    async fn generate_image(&self, prompt: &str) -> Result<Option<InlineImage>, ApiError> {
        let url = self.config.endpoint(&format!("models/{}:predict", self.config.image_model));
        let body = json!({"instances": [{"prompt": prompt}], "parameters": {"sampleCount": 1}});
        let resp: PredictResponse = self.post_json(url, &body).await?.json().await?;
        let image = resp.predictions.into_iter().find_map(|p| {
            p.bytes_base64_encoded.map(|data| InlineImage { mime_type: p.mime_type.unwrap_or_else(|| "image/png".into()), data })
        });
        Ok(image)
    }

    async fn start_video(&self, prompt: &str) -> Result<VideoOperation, ApiError> {
        let url = self.config.endpoint(&format!("models/{}:predictLongRunning", self.config.video_model));
        let body = json!({"instances": [{"prompt": prompt}], "parameters": {"aspectRatio": "16:9"}});
        let op: OperationResponse = self.post_json(url, &body).await?.json().await?;
        Ok(op.into_operation())
    }

    async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation, ApiError> {
        let op: OperationResponse = self.get(self.config.endpoint(&operation.name)).await?.json().await?;
        Ok(op.into_operation())
    }
}

#[async_trait]
impl SpeechSynthesizer for GeminiClient {
    async fn synthesize(&self, text: &str) -> Result<Option<SpeechClip>, ApiError> {
        let url = self.config.endpoint(&format!("models/{}:generateContent", self.config.speech_model));
        let body = json!({
            "contents": [{"parts": [{"text": text}]}],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {"voiceConfig": {"prebuiltVoiceConfig": {"voiceName": self.config.voice_name}}}
            }
        });
        let resp: GenerateContentResponse = self.post_json(url, &body).await?.json().await?;
        let clip = resp
            .candidates
            .into_iter()
            .filter_map(|c| c.content)
            .flat_map(|c| c.parts)
            .find_map(|p| p.inline_data)
            .map(|blob| SpeechClip { mime_type: blob.mime_type, data: blob.data });
        Ok(clip)
    }
}

/// Chat session bound to the settings it was started with.
#[derive(Clone)]
pub struct GeminiChat {
    client: GeminiClient,
    model: String,
    system_instruction: String,
    safety_level: SafetyLevel,
    history: Arc<Mutex<Vec<Content>>>,
}

impl GeminiChat {
    fn request_body(&self, contents: &[Content]) -> Value {
        let mut body = json!({
            "contents": contents,
            "systemInstruction": {"parts": [{"text": self.system_instruction}]},
            "tools": [{"functionDeclarations": function_declarations()}],
        });
        if let Some(safety) = safety_settings(self.safety_level) {
            body["safetySettings"] = safety;
        }
        body
    }

    #[cfg(test)]
    async fn history_len(&self) -> usize {
        self.history.lock().await.len()
    }
}

#[async_trait]
impl ChatSession for GeminiChat {
    async fn send_message_stream(&self, message: OutgoingMessage) -> Result<ChunkStream, ApiError> {
        let mut parts = Vec::new();
        if let Some(image) = &message.image {
            parts.push(Part::image(image));
        }
        parts.push(Part::text(message.text));
        let body = {
            let mut history = self.history.lock().await;
            history.push(Content { role: "user".into(), parts });
            self.request_body(&history)
        };
        let url = self.client.config.endpoint(&format!("models/{}:streamGenerateContent?alt=sse", self.model));
        let resp = self.client.post_json(url, &body).await?;
        let stream = resp
            .bytes_stream()
            .eventsource()
            .filter_map(|event| async move {
                match event {
                    Ok(ev) if ev.data.trim().is_empty() => None,
                    Ok(ev) => Some(parse_chunk(&ev.data)),
                    Err(e) => Some(Err(ApiError::Stream(e.to_string()))),
                }
            });
        Ok(stream.boxed())
    }

    async fn record_reply(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.history.lock().await.push(Content { role: "model".into(), parts: vec![Part::text(text)] });
    }
}
