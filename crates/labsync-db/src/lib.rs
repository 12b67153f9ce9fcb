//! `PostgreSQL` persistence for labsync.
//!
//! Models expose associated async functions generic over [`sqlx::PgExecutor`],
//! so the same call works against the pool or inside a transaction.

pub mod error;
pub mod migrations;
pub mod models;
pub mod pool;

pub use error::{is_unique_violation, DbError};
pub use migrations::run_migrations;
pub use models::*;
pub use pool::DbPool;
