use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::{ApiError, MediaGenerator, ToolInvocation};
use crate::session::{InstalledModule, Turn, VisualEffect};

pub mod code_tools;
pub mod interface_tools;
pub mod media_tools;
pub mod mind_tools;
pub mod module_tools;

pub const VIDEO_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const SCRIPT_DEFER_DELAY: Duration = Duration::from_millis(100);

#[async_trait]
pub trait MindStore: Send + Sync {
    async fn update_mind(&self, instruction: String, name: Option<String>);
}

#[async_trait]
pub trait InterfaceSurface: Send + Sync {
    async fn replace_stylesheet(&self, css: String);
    async fn set_effect(&self, effect: VisualEffect);
}

#[async_trait]
pub trait ModuleShelf: Send + Sync {
    async fn install(&self, module: InstalledModule);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSchedule {
    Scheduled(Uuid),
    Refused(String),
}

/// Receives model-authored scripts. Implementations must never run them in-process;
/// they hand them to a sandbox owned by the presentation layer.
#[async_trait]
pub trait ScriptHost: Send + Sync {
    async fn schedule(&self, code: String, delay: Duration) -> ScriptSchedule;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolTiming {
    pub video_poll_interval: Duration,
    pub script_delay: Duration,
}

impl Default for ToolTiming {
    fn default() -> Self {
        Self { video_poll_interval: VIDEO_POLL_INTERVAL, script_delay: SCRIPT_DEFER_DELAY }
    }
}

#[derive(Clone, Copy)]
pub struct ToolContext<'a> {
    pub media: &'a dyn MediaGenerator,
    pub mind: &'a dyn MindStore,
    pub surface: &'a dyn InterfaceSurface,
    pub shelf: &'a dyn ModuleShelf,
    pub scripts: &'a dyn ScriptHost,
    pub timing: ToolTiming,
}

/// Turns a successful tool call adds to the conversation.
#[derive(Debug, Default)]
pub struct ToolOutcome {
    pub turns: Vec<Turn>,
}

impl ToolOutcome {
    pub fn turn(turn: Turn) -> Self {
        Self { turns: vec![turn] }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("missing argument {0}")]
    MissingArgument(&'static str),
    #[error("{0}")]
    GenerationFailed(String),
    #[error("refused: {0}")]
    Refused(String),
    #[error(transparent)]
    Remote(#[from] ApiError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolKind {
    GenerateImage,
    GenerateVideo,
    UpdateMind,
    ModifyInterface,
    InjectCode,
    InstallModule,
    HardwareControl,
}

impl ToolKind {
    pub const ALL: [ToolKind; 7] = [
        ToolKind::GenerateImage,
        ToolKind::GenerateVideo,
        ToolKind::UpdateMind,
        ToolKind::ModifyInterface,
        ToolKind::InjectCode,
        ToolKind::InstallModule,
        ToolKind::HardwareControl,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::GenerateImage => "generate_image",
            Self::GenerateVideo => "generate_video",
            Self::UpdateMind => "update_mind",
            Self::ModifyInterface => "modify_interface",
            Self::InjectCode => "inject_code",
            Self::InstallModule => "install_module",
            Self::HardwareControl => "hardware_control",
        }
    }

    fn failure_label(&self) -> &'static str {
        match self {
            Self::GenerateImage => "Image generation failed",
            Self::GenerateVideo => "Video generation failed",
            Self::UpdateMind => "Mind update failed",
            Self::ModifyInterface => "Interface update failed",
            Self::InjectCode => "Code injection failed",
            Self::InstallModule => "Module install failed",
            Self::HardwareControl => "Hardware control failed",
        }
    }
}

pub(crate) fn str_arg<'v>(args: &'v Value, key: &'static str) -> Result<&'v str, ToolError> {
    args.get(key).and_then(|v| v.as_str()).ok_or(ToolError::MissingArgument(key))
}

pub(crate) fn opt_str_arg<'v>(args: &'v Value, key: &str) -> Option<&'v str> {
    args.get(key).and_then(|v| v.as_str()).filter(|s| !s.trim().is_empty())
}

/// Runs one tool invocation. Unknown names yield no turns; failures become one error system event.
pub async fn dispatch(ctx: ToolContext<'_>, call: &ToolInvocation) -> Vec<Turn> {
    let Some(kind) = ToolKind::from_name(&call.name) else {
        debug!(tool = %call.name, "ignoring unknown tool call");
        return Vec::new();
    };
    counter!("turnstream_tool_calls_total", "tool" => kind.name()).increment(1);
    info!(tool = kind.name(), "dispatching tool call");

    let args = &call.args;
    let result = match kind {
        ToolKind::GenerateImage => media_tools::generate_image(ctx, args).await,
        ToolKind::GenerateVideo => media_tools::generate_video(ctx, args).await,
        ToolKind::UpdateMind => mind_tools::update_mind(ctx, args).await,
        ToolKind::ModifyInterface => interface_tools::modify_interface(ctx, args).await,
        ToolKind::InjectCode => code_tools::inject_code(ctx, args).await,
        ToolKind::InstallModule => module_tools::install_module(ctx, args).await,
        ToolKind::HardwareControl => interface_tools::hardware_control(ctx, args).await,
    };

    match result {
        Ok(outcome) => outcome.turns,
        Err(err) => {
            warn!(tool = kind.name(), error = %err, "tool call failed");
            counter!("turnstream_tool_failures_total", "tool" => kind.name()).increment(1);
            vec![Turn::system_error(format!("{}: {}", kind.failure_label(), err))]
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;
    use crate::session::InlineImage;
    use crate::models::VideoOperation;

    /// In-memory stand-in for every capability the dispatcher touches.
    #[derive(Default)]
    pub struct Recorder {
        pub image: Option<InlineImage>,
        pub video_polls_until_done: usize,
        pub fail_video_polls: bool,
        pub polls: Mutex<usize>,
        pub minds: Mutex<Vec<(String, Option<String>)>>,
        pub stylesheets: Mutex<Vec<String>>,
        pub effects: Mutex<Vec<VisualEffect>>,
        pub modules: Mutex<Vec<InstalledModule>>,
        pub scripts: Mutex<VecDeque<String>>,
        pub refuse_scripts: bool,
    }

    impl Recorder {
        pub fn ctx(&self) -> ToolContext<'_> {
            ToolContext {
                media: self,
                mind: self,
                surface: self,
                shelf: self,
                scripts: self,
                timing: ToolTiming { video_poll_interval: Duration::from_millis(5), script_delay: Duration::ZERO },
            }
        }
    }

    #[async_trait]
    impl MediaGenerator for Recorder {
        async fn generate_image(&self, _prompt: &str) -> Result<Option<InlineImage>, ApiError> {
            Ok(self.image.clone())
        }

        async fn start_video(&self, _prompt: &str) -> Result<VideoOperation, ApiError> {
            Ok(VideoOperation { name: "operations/test".into(), done: self.video_polls_until_done == 0, video_uri: None })
        }

        async fn poll_video(&self, operation: &VideoOperation) -> Result<VideoOperation, ApiError> {
            let mut polls = self.polls.lock().unwrap();
            *polls += 1;
            if self.fail_video_polls {
                return Err(ApiError::Status { status: 500, body: "operation lookup failed".into() });
            }
            let done = *polls >= self.video_polls_until_done;
            Ok(VideoOperation {
                name: operation.name.clone(),
                done,
                video_uri: done.then(|| "https://example.com/clip.mp4".to_string()),
            })
        }
    }

    #[async_trait]
    impl MindStore for Recorder {
        async fn update_mind(&self, instruction: String, name: Option<String>) {
            self.minds.lock().unwrap().push((instruction, name));
        }
    }

    #[async_trait]
    impl InterfaceSurface for Recorder {
        async fn replace_stylesheet(&self, css: String) {
            self.stylesheets.lock().unwrap().push(css);
        }

        async fn set_effect(&self, effect: VisualEffect) {
            self.effects.lock().unwrap().push(effect);
        }
    }

    #[async_trait]
    impl ModuleShelf for Recorder {
        async fn install(&self, module: InstalledModule) {
            self.modules.lock().unwrap().push(module);
        }
    }

    #[async_trait]
    impl ScriptHost for Recorder {
        async fn schedule(&self, code: String, _delay: Duration) -> ScriptSchedule {
            if self.refuse_scripts {
                return ScriptSchedule::Refused("scripts disabled".into());
            }
            self.scripts.lock().unwrap().push_back(code);
            ScriptSchedule::Scheduled(Uuid::new_v4())
        }
    }
}
