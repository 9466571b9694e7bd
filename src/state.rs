use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::agent::engine::{self, AudioOut, TurnContext, TurnLog, TurnReport};
use crate::agent::tools::{InterfaceSurface, MindStore, ModuleShelf, ScriptHost, ScriptSchedule, ToolContext, ToolTiming};
use crate::models::{ChatFactory, ChatSession, MediaGenerator, OutgoingMessage, SpeechClip, SpeechSynthesizer};
use crate::session::{Conversation, InlineImage, InstalledModule, Turn, TurnPhase, VisualEffect};
use crate::settings::{Settings, SettingsPatch};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScriptPolicy {
    #[default]
    Forward,
    Deny,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct InterfaceState {
    pub stylesheet: String,
    pub effect: VisualEffect,
    pub effect_class: Option<&'static str>,
    pub modules: Vec<InstalledModule>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingScript {
    pub id: Uuid,
    pub code: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Alert {
    pub id: Uuid,
    pub message: String,
    pub script_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    fn new(message: impl Into<String>, script_id: Option<Uuid>) -> Self {
        Self { id: Uuid::new_v4(), message: message.into(), script_id, created_at: Utc::now() }
    }
}

/// Most items any one inbox queue holds; the oldest are dropped when nobody drains it.
pub const INBOX_CAPACITY: usize = 64;

/// Things queued for the presentation layer to pick up.
#[derive(Debug, Default)]
pub struct Inbox {
    pub scripts: Vec<PendingScript>,
    pub alerts: Vec<Alert>,
    pub speech: Vec<SpeechClip>,
}

fn push_capped<T>(queue: &mut Vec<T>, item: T, kind: &'static str) {
    if queue.len() >= INBOX_CAPACITY {
        let overflow = queue.len() + 1 - INBOX_CAPACITY;
        queue.drain(..overflow);
        warn!(queue = kind, dropped = overflow, "inbox full, dropping oldest entries");
    }
    queue.push(item);
}

impl Inbox {
    pub fn push_script(&mut self, script: PendingScript) {
        push_capped(&mut self.scripts, script, "scripts");
    }

    pub fn push_alert(&mut self, alert: Alert) {
        push_capped(&mut self.alerts, alert, "alerts");
    }

    pub fn push_speech(&mut self, clip: SpeechClip) {
        push_capped(&mut self.speech, clip, "speech");
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SendError {
    #[error("no chat session")]
    NoSession,
    #[error("a turn is already in progress")]
    Busy,
    #[error("nothing to send")]
    Empty,
}

pub struct Backends {
    pub chats: Arc<dyn ChatFactory>,
    pub media: Arc<dyn MediaGenerator>,
    pub speech: Arc<dyn SpeechSynthesizer>,
}

#[derive(Clone)]
pub struct AppState {
    pub conversation: Arc<RwLock<Conversation>>,
    pub settings: Arc<RwLock<Settings>>,
    pub interface: Arc<RwLock<InterfaceState>>,
    pub inbox: Arc<RwLock<Inbox>>,
    voice_output: Arc<AtomicBool>,
    chat: Arc<RwLock<Option<Arc<dyn ChatSession>>>>,
    chats: Arc<dyn ChatFactory>,
    media: Arc<dyn MediaGenerator>,
    speech: Arc<dyn SpeechSynthesizer>,
    script_policy: ScriptPolicy,
    timing: ToolTiming,
}

impl AppState {
    pub fn new(backends: Backends, settings: Settings, script_policy: ScriptPolicy) -> Self {
        Self {
            conversation: Arc::new(RwLock::new(Conversation::default())),
            settings: Arc::new(RwLock::new(settings)),
            interface: Arc::new(RwLock::new(InterfaceState::default())),
            inbox: Arc::new(RwLock::new(Inbox::default())),
            voice_output: Arc::new(AtomicBool::new(false)),
            chat: Arc::new(RwLock::new(None)),
            chats: backends.chats,
            media: backends.media,
            speech: backends.speech,
            script_policy,
            timing: ToolTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: ToolTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Starts a fresh chat session from the current settings, dropping the old history.
    pub async fn initialize_session(&self) {
        let settings = self.settings.read().await.clone();
        let chat = self.chats.start_chat(&settings);
        *self.chat.write().await = Some(chat);
        info!(model = %settings.model, name = %settings.display_name, "chat session initialized");
    }

    async fn begin_send(&self, text: String, image: Option<InlineImage>) -> Result<(Uuid, Arc<dyn ChatSession>, OutgoingMessage), SendError> {
        let Some(chat) = self.chat.read().await.clone() else {
            warn!("send ignored: no chat session");
            return Err(SendError::NoSession);
        };
        if text.trim().is_empty() && image.is_none() {
            return Err(SendError::Empty);
        }
        let mut conv = self.conversation.write().await;
        if conv.is_loading {
            return Err(SendError::Busy);
        }
        conv.is_loading = true;
        conv.phase = TurnPhase::Sending;
        let user_turn = conv.push(Turn::user(text.clone(), image.clone()));
        Ok((user_turn, chat, OutgoingMessage { text, image }))
    }

    async fn finish_send(&self, chat: Arc<dyn ChatSession>, message: OutgoingMessage) -> TurnReport {
        let audio: Arc<dyn AudioOut> = Arc::new(self.clone());
        let ctx = TurnContext {
            session: chat.as_ref(),
            log: self,
            tools: ToolContext {
                media: self.media.as_ref(),
                mind: self,
                surface: self,
                shelf: self,
                scripts: self,
                timing: self.timing,
            },
            speech: Arc::clone(&self.speech),
            audio,
        };
        let report = engine::process_turn(ctx, message).await;
        self.conversation.write().await.is_loading = false;
        report
    }

    /// Sends and waits for the whole turn.
    pub async fn send(&self, text: String, image: Option<InlineImage>) -> Result<TurnReport, SendError> {
        let (_, chat, message) = self.begin_send(text, image).await?;
        Ok(self.finish_send(chat, message).await)
    }

    /// Sends in the background and returns the id of the new user turn.
    pub async fn submit(&self, text: String, image: Option<InlineImage>) -> Result<Uuid, SendError> {
        let (user_turn, chat, message) = self.begin_send(text, image).await?;
        let state = self.clone();
        tokio::spawn(async move {
            state.finish_send(chat, message).await;
        });
        Ok(user_turn)
    }

    pub async fn clear_history(&self) {
        self.conversation.write().await.clear();
        self.initialize_session().await;
    }

    pub async fn replace_settings(&self, settings: Settings) {
        *self.settings.write().await = settings;
        self.initialize_session().await;
    }

    pub async fn patch_settings(&self, patch: SettingsPatch) -> Settings {
        let updated = {
            let mut settings = self.settings.write().await;
            settings.apply_patch(patch);
            settings.clone()
        };
        self.initialize_session().await;
        updated
    }

    pub fn set_voice_output(&self, enabled: bool) {
        self.voice_output.store(enabled, Ordering::SeqCst);
    }

    pub fn voice_output(&self) -> bool {
        self.voice_output.load(Ordering::SeqCst)
    }

    pub async fn take_pending_scripts(&self) -> Vec<PendingScript> {
        std::mem::take(&mut self.inbox.write().await.scripts)
    }

    pub async fn report_script_failure(&self, script_id: Uuid, message: &str) {
        warn!(script = %script_id, error = %message, "sandboxed script failed");
        self.inbox.write().await.push_alert(Alert::new(format!("Script error: {}", message), Some(script_id)));
    }

    pub async fn take_alerts(&self) -> Vec<Alert> {
        std::mem::take(&mut self.inbox.write().await.alerts)
    }

    pub async fn take_speech_clips(&self) -> Vec<SpeechClip> {
        std::mem::take(&mut self.inbox.write().await.speech)
    }
}

#[async_trait]
impl TurnLog for AppState {
    async fn open_model_turn(&self) -> Uuid {
        self.conversation.write().await.push(Turn::model(""))
    }

    async fn set_turn_text(&self, id: Uuid, text: &str) {
        self.conversation.write().await.set_text(id, text);
    }

    async fn push_turn(&self, turn: Turn) {
        self.conversation.write().await.push(turn);
    }

    async fn fail_model_turn(&self, id: Uuid, text: &str) {
        self.conversation.write().await.mark_model_failed(id, text);
    }

    async fn set_phase(&self, phase: TurnPhase) {
        self.conversation.write().await.phase = phase;
    }
}

#[async_trait]
impl MindStore for AppState {
    // takes effect at the next session initialization
    async fn update_mind(&self, instruction: String, name: Option<String>) {
        self.settings.write().await.update_mind(instruction, name);
    }
}

#[async_trait]
impl InterfaceSurface for AppState {
    async fn replace_stylesheet(&self, css: String) {
        self.interface.write().await.stylesheet = css;
    }

    async fn set_effect(&self, effect: VisualEffect) {
        let mut ui = self.interface.write().await;
        ui.effect = effect;
        ui.effect_class = effect.css_class();
    }
}

#[async_trait]
impl ModuleShelf for AppState {
    async fn install(&self, module: InstalledModule) {
        self.interface.write().await.modules.push(module);
    }
}

#[async_trait]
impl ScriptHost for AppState {
    async fn schedule(&self, code: String, delay: Duration) -> ScriptSchedule {
        if self.script_policy == ScriptPolicy::Deny {
            self.inbox.write().await.push_alert(Alert::new("The assistant tried to run a script; script execution is disabled.", None));
            return ScriptSchedule::Refused("script execution is disabled".into());
        }
        let id = Uuid::new_v4();
        let inbox = Arc::clone(&self.inbox);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inbox.write().await.push_script(PendingScript { id, code, created_at: Utc::now() });
        });
        ScriptSchedule::Scheduled(id)
    }
}

#[async_trait]
impl AudioOut for AppState {
    fn voice_enabled(&self) -> bool {
        self.voice_output()
    }

    async fn play(&self, clip: SpeechClip) {
        self.inbox.write().await.push_speech(clip);
    }
}
