//! Write batching.
//!
//! A [`BatchCoordinator`] collects every write of one cascade and hands them to the store
//! in a single atomic commit. Reads never go through it.

use serde_json::Value;

use crate::errors::{AppError, CommitFailure, Result};
use crate::paths::DocPath;
use crate::store::{FieldUpdate, Fields, SharedStore, WriteOp};

/// Default cap on writes per batch, matching the hosted store's limit.
pub const DEFAULT_WRITE_LIMIT: usize = 500;

/// Accumulates writes for one atomic commit.
pub struct BatchCoordinator {
    store: SharedStore,
    writes: Vec<WriteOp>,
    limit: usize,
}

impl BatchCoordinator {
    pub fn new(store: SharedStore, limit: usize) -> Self {
        Self {
            store,
            writes: Vec::new(),
            limit,
        }
    }

    pub fn create(&mut self, path: DocPath, fields: Fields) {
        self.writes.push(WriteOp::Create { path, fields });
    }

    pub fn update(&mut self, path: DocPath, updates: Vec<FieldUpdate>) {
        if updates.is_empty() {
            return;
        }
        self.writes.push(WriteOp::Update { path, updates });
    }

    pub fn update_field(&mut self, path: DocPath, field: &str, value: impl Into<Value>) {
        self.update(path, vec![FieldUpdate::set(field, value)]);
    }

    pub fn delete(&mut self, path: DocPath) {
        self.writes.push(WriteOp::Delete { path });
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commit every staged write at once and return the new store revision.
    ///
    /// An oversized batch is refused rather than split, and nothing reaches the store.
    pub async fn commit(self) -> Result<u64> {
        if self.writes.len() > self.limit {
            tracing::warn!(writes = self.writes.len(), limit = self.limit, "batch over write limit");
            return Err(AppError::CommitFailed(CommitFailure::Oversize {
                writes: self.writes.len(),
                limit: self.limit,
            }));
        }
        if self.writes.is_empty() {
            return Ok(self.store.revision().await?);
        }

        let count = self.writes.len();
        match self.store.commit(self.writes).await {
            Ok(revision) => {
                tracing::debug!(writes = count, revision, "batch committed");
                Ok(revision)
            }
            Err(err) => {
                tracing::warn!(writes = count, error = %err, "batch commit failed");
                Err(err.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::paths::{resolve_path, EntityKind};
    use crate::store::{DocumentStore, MemoryDocumentStore};

    #[tokio::test]
    async fn test_commit_applies_all_writes() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut batch = BatchCoordinator::new(store.clone(), DEFAULT_WRITE_LIMIT);
        let group = resolve_path(EntityKind::Group, &["g"]).unwrap();
        let name = resolve_path(EntityKind::GroupName, &["Dogs"]).unwrap();

        batch.create(group.clone(), Fields::new());
        batch.create(name.clone(), Fields::new());
        batch.update(group.clone(), Vec::new());
        assert_eq!(batch.len(), 2);

        let revision = batch.commit().await.unwrap();
        assert_eq!(revision, 1);
        assert!(store.get(&group).await.unwrap().is_some());
        assert!(store.get(&name).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_oversized_batch_is_refused() {
        let store = Arc::new(MemoryDocumentStore::new());
        let mut batch = BatchCoordinator::new(store.clone(), 1);
        batch.create(resolve_path(EntityKind::Group, &["a"]).unwrap(), Fields::new());
        batch.create(resolve_path(EntityKind::Group, &["b"]).unwrap(), Fields::new());

        let err = batch.commit().await.unwrap_err();
        assert!(matches!(
            err,
            AppError::CommitFailed(CommitFailure::Oversize {
                writes: 2,
                limit: 1
            })
        ));
        assert!(err.is_oversize());
        assert!(!err.is_transient());
        assert!(store.is_empty().await);
        assert_eq!(store.revision().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_commit_failure_is_typed() {
        let store = Arc::new(MemoryDocumentStore::new());
        store.fail_next_commits(1);
        let mut batch = BatchCoordinator::new(store.clone(), DEFAULT_WRITE_LIMIT);
        batch.delete(resolve_path(EntityKind::Group, &["a"]).unwrap());

        let err = batch.commit().await.unwrap_err();
        assert!(err.is_transient());
    }
}
