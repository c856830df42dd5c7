pub mod diagrams;

use axum::Router;

use crate::AppState;

/// REST directory routes (`/v1/diagrams`).
pub fn router(state: AppState) -> Router {
    diagrams::router(state)
}
