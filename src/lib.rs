//! PetCare backend core.
//!
//! Hierarchical path addressing for the document store plus the engine that keeps its
//! denormalized views (name indices, tag indices, memberships and subscriptions)
//! consistent across create, rename, delete and tag updates.

pub mod audit;
pub mod batch;
pub mod config;
pub mod engine;
pub mod errors;
pub mod identity;
pub mod index;
pub mod membership;
pub mod models;
pub mod paths;
pub mod store;

use std::sync::Arc;

pub use audit::{IndexAuditor, Inconsistency};
pub use config::Config;
pub use engine::{ConsistencyEngine, EntityScope};
pub use errors::{AppError, CommitFailure, Result};
pub use paths::{resolve_path, EntityKind};

use store::{SharedStore, SqliteDocumentStore};

/// Open the SQLite document store named by the configuration.
pub async fn open_store(config: &Config) -> Result<SharedStore> {
    let store = SqliteDocumentStore::open(&config.db_path).await?;
    Ok(Arc::new(store))
}

/// Build an engine over `store` honouring the configured batch limit.
pub fn engine(config: &Config, store: SharedStore) -> ConsistencyEngine {
    ConsistencyEngine::new(store).with_write_limit(config.batch_write_limit)
}
