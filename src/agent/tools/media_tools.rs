use std::time::Duration;

use serde_json::Value;
use tracing::info;

use super::{str_arg, ToolContext, ToolError, ToolOutcome};
use crate::models::{ApiError, MediaGenerator, VideoOperation};
use crate::session::{Turn, TurnMedia};

pub async fn generate_image(ctx: ToolContext<'_>, args: &Value) -> Result<ToolOutcome, ToolError> {
    let prompt = str_arg(args, "prompt")?;
    let image = ctx.media.generate_image(prompt).await?.ok_or_else(|| ToolError::GenerationFailed("no image returned".into()))?;
    Ok(ToolOutcome::turn(Turn::media(TurnMedia::Image(image))))
}

pub async fn generate_video(ctx: ToolContext<'_>, args: &Value) -> Result<ToolOutcome, ToolError> {
    let prompt = str_arg(args, "prompt")?;
    let operation = ctx.media.start_video(prompt).await?;
    info!(operation = %operation.name, "video generation started");
    let finished = wait_for_video(ctx.media, operation, ctx.timing.video_poll_interval).await?;
    let uri = finished.video_uri.ok_or_else(|| ToolError::GenerationFailed("no video returned".into()))?;
    Ok(ToolOutcome::turn(Turn::media(TurnMedia::Video { uri })))
}

/// Polls until the operation reports done, sleeping one interval before every poll.
/// There is no iteration bound; the wait ends on completion or on the first error.
pub async fn wait_for_video(media: &dyn MediaGenerator, mut operation: VideoOperation, interval: Duration) -> Result<VideoOperation, ApiError> {
    while !operation.done {
        tokio::time::sleep(interval).await;
        operation = media.poll_video(&operation).await?;
    }
    Ok(operation)
}
