//! Job storage for the queue system.
//!
//! This crate provides the [`JobStore`] contract and two implementations:
//!
//! - [`repositories::JobRepository`]: SurrealDB-backed, survives restarts
//! - [`MemoryJobStore`]: process memory only, used by the fast tier and tests
//!
//! # Features
//!
//! - `memory` (default): Use in-memory SurrealDB storage for testing
//! - `rocksdb`: Use RocksDB for persistent file-based storage

mod connection;
mod memory;
mod schema;
mod store;
pub mod repositories;

pub use connection::{Database, DbConfig, connect};
pub use memory::MemoryJobStore;
pub use schema::init_schema;
pub use store::{JobStore, StoreError};

/// Connect with the given configuration and define the schema.
pub async fn init(config: &DbConfig) -> Result<Database, StoreError> {
    let db = connect(config).await?;
    init_schema(&db).await?;
    Ok(db)
}
