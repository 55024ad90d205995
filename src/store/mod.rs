//! Document store interface.
//!
//! The rest of the crate talks to persistence only through [`DocumentStore`], handed in
//! as an `Arc<dyn DocumentStore>` at construction. Writes are grouped into batches of
//! [`WriteOp`]s which a store applies all-or-nothing.

mod memory;
mod sqlite;

pub use memory::MemoryDocumentStore;
pub use sqlite::{init_database, SqliteDocumentStore};

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::paths::{CollectionPath, DocPath};

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

pub type SharedStore = Arc<dyn DocumentStore>;

/// A document returned by a read.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Last path segment.
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    /// String elements of an array field; missing or non-array fields read as empty.
    pub fn string_list(&self, field: &str) -> Vec<String> {
        string_list(&self.fields, field)
    }
}

/// Failures reported by a store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    RetrievalFailed(String),
    #[error("{0}")]
    CommitFailed(String),
}

/// Transform applied to one field of an existing document.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set(String, Value),
    /// Append each value not already present.
    ArrayUnion(String, Vec<Value>),
    /// Drop every element equal to one of the values.
    ArrayRemove(String, Vec<Value>),
    Delete(String),
}

impl FieldUpdate {
    pub fn set(field: &str, value: impl Into<Value>) -> Self {
        FieldUpdate::Set(field.to_string(), value.into())
    }

    pub fn union_str(field: &str, value: &str) -> Self {
        FieldUpdate::ArrayUnion(field.to_string(), vec![Value::from(value)])
    }

    pub fn remove_str(field: &str, value: &str) -> Self {
        FieldUpdate::ArrayRemove(field.to_string(), vec![Value::from(value)])
    }
}

/// One staged write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Create or overwrite.
    Set { path: DocPath, fields: Fields },
    /// Fails the batch if the document exists.
    Create { path: DocPath, fields: Fields },
    /// Fails the batch if the document is missing.
    Update {
        path: DocPath,
        updates: Vec<FieldUpdate>,
    },
    /// Removes the document and everything nested under it.
    Delete { path: DocPath },
}

impl WriteOp {
    pub fn path(&self) -> &DocPath {
        match self {
            WriteOp::Set { path, .. }
            | WriteOp::Create { path, .. }
            | WriteOp::Update { path, .. }
            | WriteOp::Delete { path } => path,
        }
    }
}

/// Capability set of the underlying document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document, `None` when absent.
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError>;

    /// All documents directly inside a collection, ordered by id.
    async fn list_collection(&self, collection: &CollectionPath)
        -> Result<Vec<Document>, StoreError>;

    /// Apply every write atomically and return the new store revision.
    async fn commit(&self, writes: Vec<WriteOp>) -> Result<u64, StoreError>;

    /// Number of successful commits so far.
    async fn revision(&self) -> Result<u64, StoreError>;

    async fn query_equals(
        &self,
        collection: &CollectionPath,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.list_collection(collection).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| doc.fields.get(field) == Some(value))
            .collect())
    }

    async fn query_array_contains(
        &self,
        collection: &CollectionPath,
        field: &str,
        value: &Value,
    ) -> Result<Vec<Document>, StoreError> {
        let docs = self.list_collection(collection).await?;
        Ok(docs
            .into_iter()
            .filter(|doc| {
                doc.fields
                    .get(field)
                    .and_then(Value::as_array)
                    .is_some_and(|items| items.contains(value))
            })
            .collect())
    }

    async fn set(&self, path: &DocPath, fields: Fields) -> Result<u64, StoreError> {
        self.commit(vec![WriteOp::Set {
            path: path.clone(),
            fields,
        }])
        .await
    }

    async fn create(&self, path: &DocPath, fields: Fields) -> Result<u64, StoreError> {
        self.commit(vec![WriteOp::Create {
            path: path.clone(),
            fields,
        }])
        .await
    }

    async fn update(&self, path: &DocPath, updates: Vec<FieldUpdate>) -> Result<u64, StoreError> {
        self.commit(vec![WriteOp::Update {
            path: path.clone(),
            updates,
        }])
        .await
    }

    async fn delete(&self, path: &DocPath) -> Result<u64, StoreError> {
        self.commit(vec![WriteOp::Delete { path: path.clone() }])
            .await
    }
}

/// Apply field transforms in order.
pub(crate) fn apply_updates(fields: &mut Fields, updates: &[FieldUpdate]) {
    for update in updates {
        match update {
            FieldUpdate::Set(field, value) => {
                fields.insert(field.clone(), value.clone());
            }
            FieldUpdate::ArrayUnion(field, values) => {
                let entry = fields
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                if !entry.is_array() {
                    *entry = Value::Array(Vec::new());
                }
                if let Value::Array(items) = entry {
                    for value in values {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }
                }
            }
            FieldUpdate::ArrayRemove(field, values) => {
                let entry = fields
                    .entry(field.clone())
                    .or_insert_with(|| Value::Array(Vec::new()));
                match entry {
                    Value::Array(items) => items.retain(|item| !values.contains(item)),
                    other => *other = Value::Array(Vec::new()),
                }
            }
            FieldUpdate::Delete(field) => {
                fields.remove(field);
            }
        }
    }
}

pub(crate) fn string_list(fields: &Fields, field: &str) -> Vec<String> {
    fields
        .get(field)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

/// Split a document path into its collection path and id.
pub(crate) fn split_path(path: &str) -> (&str, &str) {
    path.rsplit_once('/').unwrap_or(("", path))
}
