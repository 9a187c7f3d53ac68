//! `POST /webhook` – object change notifications from the storage service.
//!
//! Every changed object is normalized into a cache path and the whole
//! request is enqueued at once. A 202 means every event is in the queue;
//! any error means none of them is.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use purgeq_core::entities::InvalidationEvent;
use purgeq_core::path::NormalizeError;
use purgeq_core::queue::QueueError;
use purgeq_sdk::objects::{PayloadError, WebhookAccepted, WebhookPayload};
use time::OffsetDateTime;

use crate::api::extractors::BearerAuth;
use crate::state::AppState;

/// Errors that can occur while accepting a webhook.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("invalid object: {0}")]
    InvalidObject(#[from] NormalizeError),
    #[error("failed to enqueue events: {0}")]
    Enqueue(#[from] QueueError),
}

impl From<PayloadError> for WebhookError {
    fn from(err: PayloadError) -> Self {
        WebhookError::InvalidPayload(err.to_string())
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match self {
            WebhookError::InvalidPayload(_) | WebhookError::InvalidObject(_) => {
                tracing::debug!(error = %self, "Rejected webhook payload");
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            WebhookError::Enqueue(e) => {
                tracing::error!(error = %e, "Webhook events could not be enqueued");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "queue unavailable, retry later",
                )
                    .into_response()
            }
        }
    }
}

/// `POST /webhook` – normalize and enqueue changed objects.
pub async fn receive_webhook(
    State(state): State<AppState>,
    _auth: BearerAuth,
    body: Bytes,
) -> Result<impl IntoResponse, WebhookError> {
    let payload: WebhookPayload =
        serde_json::from_slice(&body).map_err(|e| WebhookError::InvalidPayload(e.to_string()))?;
    let objects = payload.into_changed_objects()?;

    let settings = state.webhook.snapshot();
    let received_at = OffsetDateTime::now_utc();
    let events = objects
        .iter()
        .map(|object| settings.normalizer.event(object, received_at))
        .collect::<Result<Vec<InvalidationEvent>, _>>()?;
    let paths: Vec<String> = events.iter().map(|e| e.path.clone()).collect();

    let ids = state.queue.enqueue_batch(events).await?;
    tracing::info!(events = ids.len(), "Accepted webhook");

    Ok((
        StatusCode::ACCEPTED,
        Json(WebhookAccepted {
            message_ids: ids.into_iter().map(|id| id.0).collect(),
            paths,
        }),
    ))
}
