use serde_json::Value;
use uuid::Uuid;

use super::{opt_str_arg, str_arg, ToolContext, ToolError, ToolOutcome};
use crate::session::{InstalledModule, ModuleIcon, Turn};

pub async fn install_module(ctx: ToolContext<'_>, args: &Value) -> Result<ToolOutcome, ToolError> {
    let name = str_arg(args, "name")?.to_string();
    let description = opt_str_arg(args, "description").unwrap_or_default().to_string();
    let icon = opt_str_arg(args, "icon").map(ModuleIcon::parse).unwrap_or_default();
    let narration = format!("Module installed: {}", name);
    ctx.shelf.install(InstalledModule { id: Uuid::new_v4(), name, description, icon, active: true }).await;
    Ok(ToolOutcome::turn(Turn::system_event(narration)))
}
