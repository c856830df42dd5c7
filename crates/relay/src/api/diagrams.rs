// REST directory for diagrams: list, create, read, rename, delete, and a
// read-only view of each diagram's operation log.
//
// The directory never writes snapshots or versions; those change only through
// the sync controller.

use axum::{
    extract::{Json, Path, Query, State},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use diagram_sync_common::types::{Diagram, LogEntry, Snapshot};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::{ErrorCode, RelayError},
    store::{validate_name, StoreError},
    AppState,
};

const DEFAULT_OPS_PAGE_SIZE: usize = 100;
const MAX_OPS_PAGE_SIZE: usize = 500;

// ── Request / Response types ───────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateDiagramRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateDiagramRequest {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListOpsQuery {
    pub after: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DiagramView {
    pub id: Uuid,
    pub name: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
    pub snapshot: Snapshot,
    #[serde(rename = "wsUrl")]
    pub ws_url: String,
}

impl DiagramView {
    fn new(diagram: Diagram, ws_base_url: &str) -> Self {
        let ws_url = diagram_ws_url(ws_base_url, diagram.id);
        Self {
            id: diagram.id,
            name: diagram.name,
            version: diagram.version,
            updated_at: diagram.updated_at,
            snapshot: diagram.snapshot,
            ws_url,
        }
    }
}

#[derive(Serialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Serialize)]
struct OpsPage {
    data: Vec<LogEntry>,
    /// Pass as `after` to fetch the next page; `None` on the last page.
    next_after: Option<i64>,
}

// ── Error ──────────────────────────────────────────────────────────

#[derive(Debug)]
enum DirectoryError {
    BadRequest { message: String },
    NotFound,
    Conflict,
    Internal(anyhow::Error),
}

impl DirectoryError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest { message: message.into() }
    }
}

impl From<StoreError> for DirectoryError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound => Self::NotFound,
            StoreError::NameConflict => Self::Conflict,
            StoreError::Rejected(edit_error) => Self::bad_request(edit_error.to_string()),
            StoreError::Internal(source) => Self::Internal(source),
        }
    }
}

impl IntoResponse for DirectoryError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest { message } => {
                RelayError::new(ErrorCode::ValidationFailed, message).into_response()
            }
            Self::NotFound => {
                RelayError::new(ErrorCode::NotFound, "diagram not found").into_response()
            }
            Self::Conflict => RelayError::from_code(ErrorCode::NameConflict).into_response(),
            Self::Internal(error) => {
                tracing::error!(error = ?error, "diagram directory internal error");
                RelayError::from_code(ErrorCode::InternalError).into_response()
            }
        }
    }
}

// ── Router ─────────────────────────────────────────────────────────

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/diagrams", get(list_diagrams).post(create_diagram))
        .route(
            "/v1/diagrams/{id}",
            get(get_diagram).put(update_diagram).patch(update_diagram).delete(delete_diagram),
        )
        .route("/v1/diagrams/{id}/ops", get(list_ops))
        .with_state(state)
}

// ── Handlers ───────────────────────────────────────────────────────

async fn list_diagrams(
    State(state): State<AppState>,
) -> Result<Json<DataEnvelope<Vec<DiagramView>>>, DirectoryError> {
    let diagrams = state.controller.store().list().await?;
    let data = diagrams
        .into_iter()
        .map(|diagram| DiagramView::new(diagram, &state.ws_base_url))
        .collect();
    Ok(Json(DataEnvelope { data }))
}

async fn create_diagram(
    State(state): State<AppState>,
    Json(payload): Json<CreateDiagramRequest>,
) -> Result<(StatusCode, Json<DiagramView>), DirectoryError> {
    validate_name(&payload.name).map_err(DirectoryError::bad_request)?;

    let diagram = state.controller.store().create(payload.name.trim()).await?;
    tracing::info!(diagram_id = %diagram.id, name = %diagram.name, "diagram created");

    Ok((StatusCode::CREATED, Json(DiagramView::new(diagram, &state.ws_base_url))))
}

async fn get_diagram(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DiagramView>, DirectoryError> {
    let diagram = state.controller.store().get(id).await?.ok_or(DirectoryError::NotFound)?;
    Ok(Json(DiagramView::new(diagram, &state.ws_base_url)))
}

/// `PUT` requires a name; `PATCH` without one returns the diagram unchanged.
async fn update_diagram(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    method: Method,
    Json(payload): Json<UpdateDiagramRequest>,
) -> Result<Json<DiagramView>, DirectoryError> {
    let store = state.controller.store();

    let diagram = match payload.name {
        Some(name) => {
            validate_name(&name).map_err(DirectoryError::bad_request)?;
            store.rename(id, name.trim()).await?
        }
        None if method == Method::PUT => {
            return Err(DirectoryError::bad_request("name is required"));
        }
        None => store.get(id).await?.ok_or(DirectoryError::NotFound)?,
    };

    Ok(Json(DiagramView::new(diagram, &state.ws_base_url)))
}

async fn delete_diagram(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, DirectoryError> {
    state.controller.store().delete(id).await?;
    state.controller.forget(id).await;
    tracing::info!(diagram_id = %id, "diagram deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_ops(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<ListOpsQuery>,
) -> Result<Json<OpsPage>, DirectoryError> {
    let after = query.after.unwrap_or(0);
    if after < 0 {
        return Err(DirectoryError::bad_request("after must be >= 0"));
    }
    let limit = normalize_limit(query.limit);

    let data = state.controller.store().list_ops(id, after, limit).await?;
    let next_after =
        if data.len() == limit { data.last().map(|entry| entry.seq) } else { None };

    Ok(Json(OpsPage { data, next_after }))
}

// ── Helpers ────────────────────────────────────────────────────────

fn normalize_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_OPS_PAGE_SIZE).clamp(1, MAX_OPS_PAGE_SIZE)
}

pub fn diagram_ws_url(ws_base_url: &str, id: Uuid) -> String {
    format!("{}/ws/diagram/{id}/", ws_base_url.trim_end_matches('/'))
}
