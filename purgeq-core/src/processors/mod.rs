//! Background processors.
//!
//! - `batch_plan`: turns a received batch into deduplicated, chunked calls
//! - `InvalidationConsumer`: drains the queue into CDN invalidation calls

pub mod batch_plan;
pub mod consumer;

pub use batch_plan::{DrainPlan, InvalidationBatch, PlanError};
pub use consumer::{ConsumerError, DrainReport, InvalidationConsumer};
