use serde_json::Value;

use super::{str_arg, ToolContext, ToolError, ToolOutcome};
use crate::session::{Turn, VisualEffect};

pub async fn modify_interface(ctx: ToolContext<'_>, args: &Value) -> Result<ToolOutcome, ToolError> {
    let css = str_arg(args, "css")?;
    ctx.surface.replace_stylesheet(css.to_string()).await;
    Ok(ToolOutcome::turn(Turn::system_event("Interface restyled.")))
}

pub async fn hardware_control(ctx: ToolContext<'_>, args: &Value) -> Result<ToolOutcome, ToolError> {
    // a missing action clears the effect just like an unknown one
    let effect = args.get("action").and_then(|v| v.as_str()).map(VisualEffect::from_action).unwrap_or_default();
    ctx.surface.set_effect(effect).await;
    Ok(ToolOutcome::turn(Turn::system_event(effect.narration())))
}

#[cfg(test)]
mod tests {
    use crate::agent::tools::dispatch;
    use crate::agent::tools::testing::Recorder;
    use crate::models::ToolInvocation;
    use crate::session::VisualEffect;
    use serde_json::json;

    #[tokio::test]
    async fn stylesheet_is_replaced_with_the_given_css() {
        let rec = Recorder::default();
        dispatch(rec.ctx(), &ToolInvocation::new("modify_interface", json!({"css": "body{background:#000}"}))).await;
        assert_eq!(rec.stylesheets.lock().unwrap().as_slice(), &["body{background:#000}".to_string()]);
    }

    #[tokio::test]
    async fn unknown_action_normalizes_to_none() {
        let rec = Recorder::default();
        dispatch(rec.ctx(), &ToolInvocation::new("hardware_control", json!({"action": "glitch"}))).await;
        let turns = dispatch(rec.ctx(), &ToolInvocation::new("hardware_control", json!({"action": "overclock"}))).await;
        assert_eq!(rec.effects.lock().unwrap().as_slice(), &[VisualEffect::Glitch, VisualEffect::None]);
        assert_eq!(turns[0].text, VisualEffect::None.narration());
    }
}
