//! `db` crate: pure persistence layer.
//!
//! Provides a connection pool, typed row structs, repository functions for
//! every table, and the [`Store`] trait the engine persists through, with a
//! Postgres and an in-memory implementation. No business logic lives here.

pub mod error;
pub mod pool;
pub mod repository;
pub mod models;
pub mod store;
pub mod memory;

pub use pool::DbPool;
pub use error::DbError;
pub use store::{PgStore, Store};
pub use memory::MemoryStore;
