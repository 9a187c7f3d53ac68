//! Operator endpoints.

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use purgeq_core::queue::QueueError;
use purgeq_sdk::objects::{DeadLetterEntry, DeadLetterList};
use serde::Deserialize;

use crate::api::extractors::BearerAuth;
use crate::state::AppState;

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct DeadLetterQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        tracing::error!(error = %self, "Admin request failed");
        (StatusCode::SERVICE_UNAVAILABLE, "queue unavailable").into_response()
    }
}

/// `GET /dead-letters` – most recently dead-lettered messages first.
pub async fn list_dead_letters(
    State(state): State<AppState>,
    _auth: BearerAuth,
    Query(query): Query<DeadLetterQuery>,
) -> Result<Json<DeadLetterList>, AdminError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let dead_letters = state.queue.dead_letters(limit).await?;
    Ok(Json(DeadLetterList {
        entries: dead_letters.iter().map(DeadLetterEntry::from).collect(),
    }))
}
