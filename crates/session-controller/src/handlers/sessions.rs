//! Session handlers.
//!
//! - `POST /api/v1/sessions` - host a new session (body = data artifact,
//!   query = worker params)
//! - `GET /api/v1/sessions` - list live sessions
//! - `GET /api/v1/sessions/:token` - inspect one session
//! - `POST /api/v1/sessions/:token/resume` - resume from stored artifacts
//! - `POST /api/v1/sessions/:token/commands` - forward an operator message
//! - `DELETE /api/v1/sessions/:token` - end a session
//! - `POST /api/v1/artifacts/purge` - delete artifacts without a live session
//!
//! The acting user is taken from the `x-actor-id` header. It is optional;
//! whether anonymous callers may end or purge is up to the authorizer.

use crate::actors::{SessionEndpoint, SessionInfo};
use crate::errors::ScError;
use crate::routes::AppState;
use crate::supervisor::WorkerParams;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Path, Query, State},
    http::{request::Parts, StatusCode},
    Json,
};
use bytes::Bytes;
use common::UserId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::instrument;

/// Header carrying the platform user id of the caller.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// Caller identity extracted from [`ACTOR_HEADER`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub Option<UserId>);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ScError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parse_actor(parts.headers.get(ACTOR_HEADER).map(axum::http::HeaderValue::as_bytes))
            .map(Actor)
    }
}

fn parse_actor(raw: Option<&[u8]>) -> Result<Option<UserId>, ScError> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    std::str::from_utf8(raw)
        .ok()
        .and_then(|value| value.trim().parse::<UserId>().ok())
        .map(Some)
        .ok_or_else(|| ScError::InvalidRequest(format!("{ACTOR_HEADER} must be a numeric user id")))
}

#[derive(Debug, Deserialize)]
pub struct SendCommandRequest {
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub purged: usize,
}

#[instrument(skip_all, name = "sc.api.host", fields(actor = ?actor.0, bytes = data.len()))]
pub async fn host_session(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Query(params): Query<WorkerParams>,
    data: Bytes,
) -> Result<(StatusCode, Json<SessionEndpoint>), ScError> {
    let endpoint = state.commands.host(actor.0, data, params).await?;
    Ok((StatusCode::CREATED, Json(endpoint)))
}

#[instrument(skip_all, name = "sc.api.list")]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<Vec<SessionInfo>>, ScError> {
    Ok(Json(state.commands.list(actor.0).await?))
}

#[instrument(skip_all, name = "sc.api.get", fields(token = %token))]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(token): Path<String>,
) -> Result<Json<SessionInfo>, ScError> {
    Ok(Json(state.commands.get(actor.0, &token).await?))
}

#[instrument(skip_all, name = "sc.api.resume", fields(token = %token, actor = ?actor.0))]
pub async fn resume_session(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(token): Path<String>,
    Query(params): Query<WorkerParams>,
) -> Result<Json<SessionEndpoint>, ScError> {
    Ok(Json(state.commands.resume(actor.0, &token, params).await?))
}

#[instrument(skip_all, name = "sc.api.send", fields(token = %token))]
pub async fn send_command(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(token): Path<String>,
    Json(request): Json<SendCommandRequest>,
) -> Result<StatusCode, ScError> {
    state.commands.send(actor.0, &token, request.message).await?;
    Ok(StatusCode::ACCEPTED)
}

#[instrument(skip_all, name = "sc.api.end", fields(token = %token, actor = ?actor.0))]
pub async fn end_session(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Path(token): Path<String>,
) -> Result<StatusCode, ScError> {
    state.commands.end(actor.0, &token).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip_all, name = "sc.api.purge", fields(actor = ?actor.0))]
pub async fn purge_artifacts(
    State(state): State<Arc<AppState>>,
    actor: Actor,
) -> Result<Json<PurgeResponse>, ScError> {
    let purged = state.commands.purge(actor.0).await?;
    Ok(Json(PurgeResponse { purged }))
}
