use serde_json::Value;
use tracing::info;

use super::{str_arg, ScriptSchedule, ToolContext, ToolError, ToolOutcome};
use crate::session::Turn;

/// Model-authored code is untrusted. It is only ever handed to the host's sandbox queue.
pub async fn inject_code(ctx: ToolContext<'_>, args: &Value) -> Result<ToolOutcome, ToolError> {
    let code = str_arg(args, "code")?;
    match ctx.scripts.schedule(code.to_string(), ctx.timing.script_delay).await {
        ScriptSchedule::Scheduled(id) => {
            info!(script = %id, bytes = code.len(), "script handed to sandbox");
            Ok(ToolOutcome::turn(Turn::system_event("Script handed to the sandbox.").with_code(code)))
        }
        ScriptSchedule::Refused(reason) => Err(ToolError::Refused(reason)),
    }
}
