use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router as AxumRouter};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use ptt_core::ids::{ChannelId, DeviceToken, SessionId};
use ptt_core::model::{
    AudioFormat, DeviceDescriptor, NetworkQuality, Participant, Permission, StartTransmissionParams,
    TransmissionSummary,
};
use ptt_core::CoreError;

use crate::error::ApiError;
use crate::state::{AppState, TransmissionContext};
use crate::ws::stream_handler;

pub fn build_router(state: Arc<AppState>) -> AxumRouter {
    AxumRouter::new()
        .route("/healthz", get(healthz))
        .route("/channels/{uuid}/join", post(join))
        .route("/channels/{uuid}/leave", post(leave))
        .route("/channels/{uuid}/stream", get(stream_handler))
        .route("/transmissions/start", post(start_transmission))
        .route("/transmissions/{session_id}/chunk", post(submit_chunk))
        .route("/transmissions/{session_id}/end", post(end_transmission))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Auth(anyhow::anyhow!("missing bearer token")))
}

fn device_token_header(headers: &HeaderMap) -> Result<DeviceToken, ApiError> {
    headers
        .get("x-device-token")
        .and_then(|v| v.to_str().ok())
        .map(DeviceToken::new)
        .ok_or_else(|| ApiError::BadRequest("missing x-device-token header".into()))
}

#[derive(Deserialize)]
struct JoinBody {
    ephemeral_push_token: String,
    #[serde(default)]
    device_info: DeviceDescriptor,
}

#[derive(Serialize)]
struct JoinResponse {
    participant: Participant,
    active_transmission: Option<SessionId>,
}

async fn join(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    Json(body): Json<JoinBody>,
) -> Result<Json<JoinResponse>, ApiError> {
    let principal = state
        .auth
        .authenticate(bearer_token(&headers)?)
        .await
        .map_err(ApiError::Auth)?;
    if !principal.has(Permission::Read) {
        return Err(CoreError::UnknownParticipant.into());
    }

    let channel_uuid = ChannelId::new(uuid);
    let coordinator = state.router.resolve(&channel_uuid).await?;
    let outcome = coordinator
        .join(
            principal.user_id,
            principal.username,
            DeviceToken::new(body.ephemeral_push_token),
            body.device_info,
        )
        .await?;

    state.gateway_metrics.auth_success();
    Ok(Json(JoinResponse {
        participant: outcome.participant,
        active_transmission: outcome.active_transmission,
    }))
}

#[derive(Deserialize)]
struct LeaveBody {
    ephemeral_push_token: String,
}

#[derive(Serialize)]
struct OkResponse {
    success: bool,
}

async fn leave(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<String>,
    headers: HeaderMap,
    Json(body): Json<LeaveBody>,
) -> Result<Json<OkResponse>, ApiError> {
    state.auth.authenticate(bearer_token(&headers)?).await.map_err(ApiError::Auth)?;

    let channel_uuid = ChannelId::new(uuid);
    let coordinator = state.router.resolve(&channel_uuid).await?;
    coordinator.leave(DeviceToken::new(body.ephemeral_push_token)).await?;
    Ok(Json(OkResponse { success: true }))
}

#[derive(Deserialize)]
struct StartBody {
    channel_uuid: String,
    audio_format: String,
    sample_rate: u32,
    bitrate: u32,
    network_quality: NetworkQuality,
    #[serde(default)]
    is_emergency: bool,
}

#[derive(Serialize)]
struct StartResponse {
    session_id: SessionId,
    max_duration_ms: u64,
    websocket_url: String,
}

async fn start_transmission(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<StartBody>,
) -> Result<Json<StartResponse>, ApiError> {
    let principal = state
        .auth
        .authenticate(bearer_token(&headers)?)
        .await
        .map_err(ApiError::Auth)?;
    if !principal.has(Permission::Write) {
        return Err(CoreError::UnknownParticipant.into());
    }
    if body.is_emergency && !principal.has(Permission::Emergency) {
        return Err(CoreError::ForbiddenEmergency.into());
    }
    let device_token = device_token_header(&headers)?;

    let audio_format = AudioFormat::parse(&body.audio_format)
        .ok_or_else(|| ApiError::BadRequest(format!("unknown audio_format: {}", body.audio_format)))?;

    let channel_uuid = ChannelId::new(body.channel_uuid);
    let coordinator = state.router.resolve(&channel_uuid).await?;

    let params = StartTransmissionParams {
        audio_format,
        sample_rate: body.sample_rate,
        bitrate: body.bitrate,
        network_quality: body.network_quality,
        is_emergency: body.is_emergency,
    };

    let result = coordinator
        .start_transmission(principal.user_id, device_token.clone(), params)
        .await;

    match &result {
        Ok(_) => state.coordinator_metrics.transmission_started(body.is_emergency),
        Err(CoreError::Busy) => state.coordinator_metrics.busy_rejected(),
        Err(_) => {}
    }
    let session_id = result?;

    state.transmissions.insert(
        session_id.clone(),
        TransmissionContext { channel_uuid, device_token },
    );

    Ok(Json(StartResponse {
        session_id: session_id.clone(),
        max_duration_ms: if body.is_emergency { 300_000 } else { 60_000 },
        websocket_url: format!("/channels/{}/stream", session_id.0),
    }))
}

#[derive(Deserialize)]
struct ChunkBody {
    chunk_sequence: u64,
    audio_data: String,
    chunk_size_bytes: usize,
}

#[derive(Serialize)]
struct ChunkResponse {
    chunk_received: bool,
    next_expected_sequence: u64,
}

async fn submit_chunk(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<ChunkBody>,
) -> Result<Json<ChunkResponse>, ApiError> {
    state.auth.authenticate(bearer_token(&headers)?).await.map_err(ApiError::Auth)?;

    let ctx = state
        .transmissions
        .get(&SessionId(session_id))
        .map(|e| e.clone())
        .ok_or(CoreError::NoSession)?;
    let coordinator = state.router.resolve(&ctx.channel_uuid).await?;

    let result = coordinator
        .submit_chunk(ctx.device_token, body.chunk_sequence, body.audio_data, body.chunk_size_bytes)
        .await;

    match &result {
        Ok(_) => state.coordinator_metrics.chunk_accepted(),
        Err(CoreError::Validation(_)) => state.coordinator_metrics.chunk_rejected("invalid"),
        Err(_) => {}
    }
    let ack = result?;

    Ok(Json(ChunkResponse {
        chunk_received: true,
        next_expected_sequence: ack.next_expected_sequence,
    }))
}

#[derive(Deserialize)]
struct EndBody {
    total_duration_ms: i64,
}

#[derive(Serialize)]
struct EndResponse {
    session_summary: TransmissionSummary,
}

async fn end_transmission(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<EndBody>,
) -> Result<Json<EndResponse>, ApiError> {
    state.auth.authenticate(bearer_token(&headers)?).await.map_err(ApiError::Auth)?;

    let session_id = SessionId(session_id);
    let ctx = state
        .transmissions
        .get(&session_id)
        .map(|e| e.clone())
        .ok_or(CoreError::NoSession)?;
    let coordinator = state.router.resolve(&ctx.channel_uuid).await?;

    let summary = coordinator
        .end_transmission(ctx.device_token, body.total_duration_ms)
        .await?;
    state.coordinator_metrics.transmission_ended("client_end");
    state.transmissions.remove(&session_id);

    Ok(Json(EndResponse { session_summary: summary }))
}
