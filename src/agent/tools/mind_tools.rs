use serde_json::Value;

use super::{opt_str_arg, str_arg, ToolContext, ToolError, ToolOutcome};
use crate::session::Turn;

pub async fn update_mind(ctx: ToolContext<'_>, args: &Value) -> Result<ToolOutcome, ToolError> {
    let instruction = str_arg(args, "new_instruction")?.to_string();
    let name = opt_str_arg(args, "new_name").map(str::to_string);
    let narration = match &name {
        Some(name) => format!("Core directives rewritten. Now answering as {}.", name),
        None => "Core directives rewritten.".to_string(),
    };
    ctx.mind.update_mind(instruction, name).await;
    Ok(ToolOutcome::turn(Turn::system_event(narration)))
}

#[cfg(test)]
mod tests {
    use crate::agent::tools::dispatch;
    use crate::agent::tools::testing::Recorder;
    use crate::models::ToolInvocation;
    use serde_json::json;

    #[tokio::test]
    async fn instruction_without_name_passes_no_name() {
        let rec = Recorder::default();
        let turns = dispatch(rec.ctx(), &ToolInvocation::new("update_mind", json!({"new_instruction": "Be a pirate."}))).await;
        assert_eq!(turns.len(), 1);
        assert!(turns[0].is_system_event && !turns[0].is_error);
        assert_eq!(rec.minds.lock().unwrap().as_slice(), &[("Be a pirate.".to_string(), None)]);
    }

    #[tokio::test]
    async fn blank_name_is_treated_as_absent() {
        let rec = Recorder::default();
        dispatch(rec.ctx(), &ToolInvocation::new("update_mind", json!({"new_instruction": "x", "new_name": "  "}))).await;
        assert_eq!(rec.minds.lock().unwrap()[0].1, None);
    }
}
