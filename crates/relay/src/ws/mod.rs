// WebSocket entry point: `/ws/diagram/{key}`.
//
// The upgrade handler only extracts the route key and the optional access
// token; key validation, diagram resolution and the session loop live in
// `session`.

mod protocol;
mod session;

use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
    routing::get,
    Router,
};
use serde::Deserialize;
use tracing::info;

use crate::auth::resolve_actor;
use crate::error::{request_id_from_headers_or_generate, with_request_id_scope};
use crate::AppState;

pub(crate) const HEARTBEAT_INTERVAL_MS: u64 = 15_000;
pub(crate) const HEARTBEAT_TIMEOUT_MS: u64 = 10_000;
pub(crate) const MAX_FRAME_BYTES: usize = 262_144;

#[derive(Debug, Default, Deserialize)]
pub struct WsQuery {
    #[serde(default)]
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws/diagram/{key}", get(ws_upgrade))
        .route("/ws/diagram/{key}/", get(ws_upgrade))
        .with_state(state)
}

pub async fn ws_upgrade(
    Path(key): Path<String>,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let actor = resolve_actor(&state.jwt, query.token.as_deref());
    let request_id = request_id_from_headers_or_generate(&headers);
    info!(key = %key, authenticated = actor.is_some(), request_id = %request_id, "websocket upgrade");

    ws.max_frame_size(MAX_FRAME_BYTES).max_message_size(MAX_FRAME_BYTES).on_upgrade(
        move |socket| async move {
            with_request_id_scope(request_id, session::run_session(state, key, actor, socket))
                .await;
        },
    )
}
