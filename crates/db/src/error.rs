//! Storage errors shared by the Postgres and in-memory stores.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// No workflow or execution with the requested id.
    #[error("record not found")]
    NotFound,

    #[error("schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}
