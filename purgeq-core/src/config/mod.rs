//! Runtime configuration types for purgeq.
//!
//! These types represent the validated runtime configuration used by the
//! server and the processors. Loading and parsing is handled by the server
//! crate.

mod config_store;
mod consumer;
mod queue;
mod webhook;

pub use config_store::ConfigStore;
pub use consumer::ConsumerConfig;
pub use queue::QueueConfig;
pub use webhook::WebhookSettings;
