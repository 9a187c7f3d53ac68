//! HTTP API.
//!
//! # Endpoints
//!
//! - `POST /webhook`      – report changed objects (bearer)
//! - `GET  /dead-letters` – list dead-lettered messages (bearer)

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

pub mod admin;
pub mod extractors;
pub mod webhook;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhook", post(webhook::receive_webhook))
        .route("/dead-letters", get(admin::list_dead_letters))
}
