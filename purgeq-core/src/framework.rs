use sqlx::PgPool;

/// Executes the `Processor` query types of [`crate::entities`] against a pool.
#[derive(Debug, Clone)]
pub struct DatabaseProcessor {
    pub pool: PgPool,
}
