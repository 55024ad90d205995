//! In-memory document store.
//!
//! Used by tests and tooling that need a store without a database file. Batches are
//! applied to a copy of the document map and swapped in only when every write succeeds.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{apply_updates, split_path, Document, DocumentStore, Fields, StoreError, WriteOp};
use crate::paths::{CollectionPath, DocPath};

#[derive(Default)]
struct MemoryState {
    docs: BTreeMap<String, Fields>,
    revision: u64,
}

/// Document store backed by a `BTreeMap` keyed by path.
#[derive(Default)]
pub struct MemoryDocumentStore {
    state: RwLock<MemoryState>,
    failing_commits: AtomicUsize,
    failing_reads: AtomicBool,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail without applying anything.
    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    /// Make every read fail until switched off again.
    pub fn fail_reads(&self, failing: bool) {
        self.failing_reads.store(failing, Ordering::SeqCst);
    }

    /// Number of stored documents, nested ones included.
    pub async fn len(&self) -> usize {
        self.state.read().await.docs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every stored path, sorted.
    pub async fn paths(&self) -> Vec<String> {
        self.state.read().await.docs.keys().cloned().collect()
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.failing_reads.load(Ordering::SeqCst) {
            return Err(StoreError::RetrievalFailed(
                "read interrupted (injected)".to_string(),
            ));
        }
        Ok(())
    }

    fn take_commit_failure(&self) -> bool {
        self.failing_commits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        self.check_reads()?;
        let state = self.state.read().await;
        Ok(state.docs.get(path.as_str()).map(|fields| Document {
            id: split_path(path.as_str()).1.to_string(),
            fields: fields.clone(),
        }))
    }

    async fn list_collection(
        &self,
        collection: &CollectionPath,
    ) -> Result<Vec<Document>, StoreError> {
        self.check_reads()?;
        let prefix = format!("{}/", collection.as_str());
        let state = self.state.read().await;
        Ok(state
            .docs
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| !path[prefix.len()..].contains('/'))
            .map(|(path, fields)| Document {
                id: path[prefix.len()..].to_string(),
                fields: fields.clone(),
            })
            .collect())
    }

    async fn commit(&self, writes: Vec<WriteOp>) -> Result<u64, StoreError> {
        if self.take_commit_failure() {
            return Err(StoreError::CommitFailed(
                "batch cancelled (injected)".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let mut docs = state.docs.clone();
        for op in &writes {
            apply(&mut docs, op)?;
        }
        state.docs = docs;
        state.revision += 1;
        Ok(state.revision)
    }

    async fn revision(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().await.revision)
    }
}

fn apply(docs: &mut BTreeMap<String, Fields>, op: &WriteOp) -> Result<(), StoreError> {
    match op {
        WriteOp::Set { path, fields } => {
            docs.insert(path.to_string(), fields.clone());
        }
        WriteOp::Create { path, fields } => {
            if docs.contains_key(path.as_str()) {
                return Err(StoreError::CommitFailed(format!(
                    "document {path} already exists"
                )));
            }
            docs.insert(path.to_string(), fields.clone());
        }
        WriteOp::Update { path, updates } => {
            let fields = docs.get_mut(path.as_str()).ok_or_else(|| {
                StoreError::CommitFailed(format!("document {path} does not exist"))
            })?;
            apply_updates(fields, updates);
        }
        WriteOp::Delete { path } => {
            let nested = format!("{path}/");
            docs.retain(|key, _| key != path.as_str() && !key.starts_with(&nested));
        }
    }
    Ok(())
}
