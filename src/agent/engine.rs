use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use metrics::counter;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::tools::{self, ToolContext};
use crate::models::{ApiError, ChatSession, OutgoingMessage, SpeechClip, SpeechSynthesizer};
use crate::session::{Turn, TurnPhase, TRANSPORT_FAILURE_TEXT};

pub const DEFAULT_IMAGE_PROMPT: &str = "Describe this image.";

/// Write access to the visible turn list.
#[async_trait]
pub trait TurnLog: Send + Sync {
    async fn open_model_turn(&self) -> Uuid;
    async fn set_turn_text(&self, id: Uuid, text: &str);
    async fn push_turn(&self, turn: Turn);
    async fn fail_model_turn(&self, id: Uuid, text: &str);
    async fn set_phase(&self, phase: TurnPhase);
}

#[async_trait]
pub trait AudioOut: Send + Sync {
    fn voice_enabled(&self) -> bool;
    async fn play(&self, clip: SpeechClip);
}

pub struct TurnContext<'a> {
    pub session: &'a dyn ChatSession,
    pub log: &'a dyn TurnLog,
    pub tools: ToolContext<'a>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub audio: Arc<dyn AudioOut>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub turn_id: Uuid,
    pub text: String,
    pub chunks: usize,
    pub phase: TurnPhase,
}

/// Substitutes the default prompt when an image is sent without text.
pub fn prepare_message(mut message: OutgoingMessage) -> OutgoingMessage {
    if message.image.is_some() && message.text.trim().is_empty() {
        message.text = DEFAULT_IMAGE_PROMPT.to_string();
    }
    message
}

pub async fn process_turn(ctx: TurnContext<'_>, message: OutgoingMessage) -> TurnReport {
    ctx.log.set_phase(TurnPhase::Sending).await;
    let turn_id = ctx.log.open_model_turn().await;
    info!(turn = %turn_id, has_image = message.image.is_some(), "turn started");

    let mut text = String::new();
    let mut chunks = 0usize;
    let result = consume_stream(&ctx, turn_id, prepare_message(message), &mut text, &mut chunks).await;

    let phase = match result {
        Ok(()) => {
            ctx.session.record_reply(&text).await;
            info!(turn = %turn_id, chunks, chars = text.len(), "turn completed");
            counter!("turnstream_turns_total", "outcome" => "completed").increment(1);
            if ctx.audio.voice_enabled() && !text.is_empty() {
                speak(Arc::clone(&ctx.speech), Arc::clone(&ctx.audio), text.clone());
            }
            TurnPhase::Completed
        }
        Err(err) => {
            error!(turn = %turn_id, chunks, error = %err, "stream failed");
            counter!("turnstream_stream_failures_total").increment(1);
            counter!("turnstream_turns_total", "outcome" => "errored").increment(1);
            ctx.log.fail_model_turn(turn_id, TRANSPORT_FAILURE_TEXT).await;
            TurnPhase::Errored
        }
    };
    ctx.log.set_phase(phase).await;
    TurnReport { turn_id, text, chunks, phase }
}

async fn consume_stream(
    ctx: &TurnContext<'_>,
    turn_id: Uuid,
    message: OutgoingMessage,
    text: &mut String,
    chunks: &mut usize,
) -> Result<(), ApiError> {
    let mut stream = ctx.session.send_message_stream(message).await?;
    ctx.log.set_phase(TurnPhase::Streaming).await;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        *chunks += 1;
        // calls in one chunk run strictly in order, each drained before the next
        for call in &chunk.tool_calls {
            for turn in tools::dispatch(ctx.tools, call).await {
                ctx.log.push_turn(turn).await;
            }
        }
        if let Some(fragment) = chunk.text {
            text.push_str(&fragment);
            ctx.log.set_turn_text(turn_id, text).await;
        }
    }
    Ok(())
}

fn speak(speech: Arc<dyn SpeechSynthesizer>, audio: Arc<dyn AudioOut>, text: String) {
    tokio::spawn(async move {
        match speech.synthesize(&text).await {
            Ok(Some(clip)) => audio.play(clip).await,
            Ok(None) => warn!("speech synthesis returned no audio"),
            Err(err) => warn!(error = %err, "speech synthesis failed"),
        }
    });
}


#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::testing::{MemoryLog, ScriptedChat, Speaker};
    use super::*;
    use crate::agent::tools::testing::Recorder;
    use crate::models::{ResponseChunk, ToolInvocation};
    use crate::session::{InlineImage, Role, TurnMedia, VisualEffect};

    fn speaker(enabled: bool) -> (Arc<Speaker>, mpsc::UnboundedReceiver<SpeechClip>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Speaker { enabled, clips: tx, requests: Mutex::new(Vec::new()) }), rx)
    }

    async fn run(chat: &ScriptedChat, rec: &Recorder, log: &MemoryLog, speaker: Arc<Speaker>, message: OutgoingMessage) -> TurnReport {
        let ctx = TurnContext {
            session: chat,
            log,
            tools: rec.ctx(),
            speech: speaker.clone(),
            audio: speaker,
        };
        process_turn(ctx, message).await
    }

    fn text(t: &str) -> OutgoingMessage {
        OutgoingMessage { text: t.into(), image: None }
    }

    #[tokio::test]
    async fn displayed_text_is_the_concatenation_of_fragments() {
        let chat = ScriptedChat::new(vec![
            ResponseChunk::text("При"),
            ResponseChunk::default(),
            ResponseChunk::text("вет"),
            ResponseChunk::text(", мир"),
        ]);
        let (rec, log) = (Recorder::default(), MemoryLog::default());
        let (spk, _rx) = speaker(false);
        let report = run(&chat, &rec, &log, spk, text("Привет")).await;

        assert_eq!(report.phase, TurnPhase::Completed);
        assert_eq!(report.chunks, 4);
        let conv = log.conversation.lock().await;
        assert_eq!(conv.turns.len(), 1);
        assert_eq!(conv.turns[0].text, "Привет, мир");
        assert_eq!(conv.turns[0].role, Role::Model);
        assert_eq!(conv.phase, TurnPhase::Completed);
        assert_eq!(chat.replies.lock().unwrap().as_slice(), &["Привет, мир".to_string()]);
    }

    #[tokio::test]
    async fn tool_calls_run_in_order_before_the_chunk_text() {
        let chat = ScriptedChat::new(vec![
            ResponseChunk {
                text: Some("Done.".into()),
                tool_calls: vec![
                    ToolInvocation::new("hardware_control", json!({"action": "invert"})),
                    ToolInvocation::new("nonexistent_tool", json!({})),
                    ToolInvocation::new("install_module", json!({"name": "Radar"})),
                    ToolInvocation::new("install_module", json!({"name": "Radar"})),
                ],
            },
        ]);
        let (rec, log) = (Recorder::default(), MemoryLog::default());
        let (spk, _rx) = speaker(false);
        run(&chat, &rec, &log, spk, text("go")).await;

        let conv = log.conversation.lock().await;
        // open turn, then one event per known call; same-name calls are not coalesced
        assert_eq!(conv.turns.len(), 4);
        assert_eq!(conv.turns[0].text, "Done.");
        assert_eq!(conv.turns[1].text, VisualEffect::Invert.narration());
        assert!(conv.turns[2..].iter().all(|t| t.is_system_event && t.text.contains("Radar")));
        assert_eq!(rec.modules.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_generation_does_not_abort_the_stream() {
        let chat = ScriptedChat::new(vec![
            ResponseChunk::tools(vec![ToolInvocation::new("generate_image", json!({"prompt": "x"}))]),
            ResponseChunk::text("still here"),
        ]);
        let (rec, log) = (Recorder::default(), MemoryLog::default());
        let (spk, _rx) = speaker(false);
        let report = run(&chat, &rec, &log, spk, text("draw")).await;

        assert_eq!(report.phase, TurnPhase::Completed);
        let conv = log.conversation.lock().await;
        assert_eq!(conv.turns.iter().filter(|t| t.is_error).count(), 1);
        assert!(conv.turns.iter().all(|t| t.media.is_none()));
        assert_eq!(conv.turns[0].text, "still here");
    }

    #[tokio::test]
    async fn failed_video_poll_does_not_abort_the_stream() {
        let chat = ScriptedChat::new(vec![
            ResponseChunk::tools(vec![ToolInvocation::new("generate_video", json!({"prompt": "rain"}))]),
            ResponseChunk::text("after video"),
        ]);
        let rec = Recorder { video_polls_until_done: 2, fail_video_polls: true, ..Default::default() };
        let log = MemoryLog::default();
        let (spk, _rx) = speaker(false);
        let report = run(&chat, &rec, &log, spk, text("film")).await;

        assert_eq!(report.phase, TurnPhase::Completed);
        assert_eq!(report.text, "after video");
        let conv = log.conversation.lock().await;
        assert_eq!(conv.turns.len(), 2);
        assert_eq!(conv.turns[0].text, "after video");
        assert!(conv.turns[1].is_error && conv.turns[1].is_system_event);
    }

    #[tokio::test]
    async fn transport_error_after_an_image_leaves_the_image_intact() {
        let mut chat = ScriptedChat::new(vec![
            ResponseChunk::tools(vec![ToolInvocation::new("generate_image", json!({"prompt": "fox"}))]),
            ResponseChunk::text("never arrives"),
        ]);
        chat.fail_after = Some(1);
        let rec = Recorder { image: Some(InlineImage { mime_type: "image/png".into(), data: "AAAA".into() }), ..Default::default() };
        let log = MemoryLog::default();
        let (spk, _rx) = speaker(false);
        let report = run(&chat, &rec, &log, spk, text("draw")).await;

        assert_eq!(report.phase, TurnPhase::Errored);
        let conv = log.conversation.lock().await;
        assert_eq!(conv.turns.len(), 2);
        assert_eq!(conv.turns[0].id, report.turn_id);
        assert_eq!(conv.turns[0].text, TRANSPORT_FAILURE_TEXT);
        assert!(conv.turns[0].is_error);
        assert!(matches!(conv.turns[1].media, Some(TurnMedia::Image(_))));
        assert!(conv.turns[1].text.is_empty() && !conv.turns[1].is_error);
    }

    #[tokio::test]
    async fn transport_error_marks_latest_model_turn() {
        let mut chat = ScriptedChat::new(vec![ResponseChunk::text("partial"), ResponseChunk::text(" more")]);
        chat.fail_after = Some(1);
        let (rec, log) = (Recorder::default(), MemoryLog::default());
        let (spk, _rx) = speaker(true);
        let report = run(&chat, &rec, &log, spk.clone(), text("hi")).await;

        assert_eq!(report.phase, TurnPhase::Errored);
        let conv = log.conversation.lock().await;
        assert_eq!(conv.turns.len(), 1);
        assert_eq!(conv.turns[0].text, TRANSPORT_FAILURE_TEXT);
        assert!(conv.turns[0].is_error);
        assert!(chat.replies.lock().unwrap().is_empty());
        assert!(spk.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn voice_mode_speaks_the_final_text() {
        let chat = ScriptedChat::new(vec![ResponseChunk::text("Hello"), ResponseChunk::text(" there")]);
        let (rec, log) = (Recorder::default(), MemoryLog::default());
        let (spk, mut rx) = speaker(true);
        run(&chat, &rec, &log, spk.clone(), text("hi")).await;

        let clip = rx.recv().await.unwrap();
        assert_eq!(clip.mime_type, "audio/pcm");
        assert_eq!(spk.requests.lock().unwrap().as_slice(), &["Hello there".to_string()]);
    }

    #[tokio::test]
    async fn voice_mode_skips_empty_replies() {
        let chat = ScriptedChat::new(vec![ResponseChunk::tools(vec![ToolInvocation::new("hardware_control", json!({"action": "blur"}))])]);
        let (rec, log) = (Recorder::default(), MemoryLog::default());
        let (spk, _rx) = speaker(true);
        run(&chat, &rec, &log, spk.clone(), text("blur")).await;
        tokio::task::yield_now().await;
        assert!(spk.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn image_without_text_gets_the_default_prompt() {
        let chat = ScriptedChat::new(vec![ResponseChunk::text("A cat.")]);
        let (rec, log) = (Recorder::default(), MemoryLog::default());
        let (spk, _rx) = speaker(false);
        let image = InlineImage { mime_type: "image/png".into(), data: "AAAA".into() };
        run(&chat, &rec, &log, spk, OutgoingMessage { text: "  ".into(), image: Some(image.clone()) }).await;

        let sent = chat.sent.lock().unwrap();
        assert_eq!(sent[0].text, DEFAULT_IMAGE_PROMPT);
        assert_eq!(sent[0].image.as_ref(), Some(&image));
    }

    #[tokio::test]
    async fn media_turns_follow_the_open_turn() {
        let chat = ScriptedChat::new(vec![
            ResponseChunk::text("Here it is:"),
            ResponseChunk::tools(vec![ToolInvocation::new("generate_image", json!({"prompt": "owl"}))]),
        ]);
        let rec = Recorder { image: Some(InlineImage { mime_type: "image/png".into(), data: "AAAA".into() }), ..Default::default() };
        let log = MemoryLog::default();
        let (spk, _rx) = speaker(false);
        run(&chat, &rec, &log, spk, text("owl")).await;

        let conv = log.conversation.lock().await;
        assert_eq!(conv.turns.len(), 2);
        assert_eq!(conv.turns[0].text, "Here it is:");
        assert!(matches!(conv.turns[1].media, Some(TurnMedia::Image(_))));
    }
}
