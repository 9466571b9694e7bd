use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use uuid::Uuid;

use crate::models::SpeechClip;
use crate::session::{InlineImage, Turn, TurnPhase};
use crate::settings::{Settings, SettingsPatch};
use crate::state::{Alert, AppState, InterfaceState, PendingScript, SendError};

#[derive(Debug, Deserialize)]
pub struct SendTurnBody {
    #[serde(default)]
    pub text: String,
    pub image: Option<InlineImage>,
}

#[derive(Debug, Serialize)]
pub struct SendTurnResponse {
    pub user_turn: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn reject(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: error.into() }))
}

pub fn validate_image(image: &InlineImage) -> Result<(), String> {
    if !image.mime_type.starts_with("image/") {
        return Err(format!("unsupported mime type {}", image.mime_type));
    }
    base64::engine::general_purpose::STANDARD
        .decode(image.data.as_bytes())
        .map(|_| ())
        .map_err(|e| format!("image data is not base64: {}", e))
}

async fn send_turn(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(body): Json<SendTurnBody>,
) -> Result<(StatusCode, Json<SendTurnResponse>), (StatusCode, Json<ErrorResponse>)> {
    if let Some(image) = &body.image {
        validate_image(image).map_err(|e| reject(StatusCode::BAD_REQUEST, e))?;
    }
    match state.submit(body.text, body.image).await {
        Ok(user_turn) => Ok((StatusCode::ACCEPTED, Json(SendTurnResponse { user_turn }))),
        Err(err @ SendError::NoSession) => Err(reject(StatusCode::SERVICE_UNAVAILABLE, err.to_string())),
        Err(err @ SendError::Busy) => Err(reject(StatusCode::CONFLICT, err.to_string())),
        Err(err @ SendError::Empty) => Err(reject(StatusCode::BAD_REQUEST, err.to_string())),
    }
}

#[derive(Debug, Serialize)]
pub struct TurnsResponse {
    pub turns: Vec<Turn>,
    pub is_loading: bool,
    pub phase: TurnPhase,
}

async fn list_turns(axum::extract::State(state): axum::extract::State<AppState>) -> Json<TurnsResponse> {
    let conv = state.conversation.read().await;
    Json(TurnsResponse { turns: conv.turns.clone(), is_loading: conv.is_loading, phase: conv.phase })
}

async fn clear_turns(axum::extract::State(state): axum::extract::State<AppState>) -> StatusCode {
    state.clear_history().await;
    StatusCode::NO_CONTENT
}

#[derive(Debug, Serialize)]
struct SettingsResponse {
    settings: Settings,
}

async fn get_settings(axum::extract::State(state): axum::extract::State<AppState>) -> Json<SettingsResponse> {
    Json(SettingsResponse { settings: state.settings.read().await.clone() })
}

async fn put_settings(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(settings): Json<Settings>,
) -> Json<SettingsResponse> {
    state.replace_settings(settings.clone()).await;
    Json(SettingsResponse { settings })
}

async fn patch_settings(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(patch): Json<SettingsPatch>,
) -> Json<SettingsResponse> {
    let settings = state.patch_settings(patch).await;
    Json(SettingsResponse { settings })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VoiceBody {
    pub enabled: bool,
}

async fn put_voice(
    axum::extract::State(state): axum::extract::State<AppState>,
    Json(body): Json<VoiceBody>,
) -> Json<VoiceBody> {
    state.set_voice_output(body.enabled);
    Json(VoiceBody { enabled: state.voice_output() })
}

async fn get_interface(axum::extract::State(state): axum::extract::State<AppState>) -> Json<InterfaceState> {
    Json(state.interface.read().await.clone())
}

async fn take_scripts(axum::extract::State(state): axum::extract::State<AppState>) -> Json<Vec<PendingScript>> {
    Json(state.take_pending_scripts().await)
}

#[derive(Debug, Deserialize)]
pub struct ScriptFailureBody {
    pub message: String,
}

async fn script_failure(
    axum::extract::State(state): axum::extract::State<AppState>,
    axum::extract::Path(id): axum::extract::Path<Uuid>,
    Json(body): Json<ScriptFailureBody>,
) -> StatusCode {
    state.report_script_failure(id, &body.message).await;
    StatusCode::NO_CONTENT
}

async fn take_alerts(axum::extract::State(state): axum::extract::State<AppState>) -> Json<Vec<Alert>> {
    Json(state.take_alerts().await)
}

async fn take_speech(axum::extract::State(state): axum::extract::State<AppState>) -> Json<Vec<SpeechClip>> {
    Json(state.take_speech_clips().await)
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/turns", post(send_turn).get(list_turns).delete(clear_turns))
        .route("/v1/settings", get(get_settings).put(put_settings).patch(patch_settings))
        .route("/v1/voice", put(put_voice))
        .route("/v1/interface", get(get_interface))
        .route("/v1/scripts/take", post(take_scripts))
        .route("/v1/scripts/:id/failure", post(script_failure))
        .route("/v1/alerts/take", post(take_alerts))
        .route("/v1/speech/take", post(take_speech))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
