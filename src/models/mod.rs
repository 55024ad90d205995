//! Document shapes stored by the pet-care backend.
//!
//! Field names are camelCase on the wire, matching the documents the mobile clients read.

mod entity;
mod index;
mod user;

pub use entity::*;
pub use index::*;
pub use user::*;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::errors::{AppError, CommitFailure, Result};
use crate::store::{Document, Fields};

/// Field names shared between documents and the field updates that target them.
pub mod field {
    pub const NAME: &str = "name";
    pub const TAGS: &str = "tags";
    pub const ENTITIES: &str = "entities";
    pub const GROUPS: &str = "groups";
    pub const FORUMS: &str = "forums";
    pub const USERNAME: &str = "username";
}

/// Serialize a document shape into store fields.
pub fn to_fields<T: Serialize>(doc: &T) -> Result<Fields> {
    match serde_json::to_value(doc) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(other) => Err(AppError::CommitFailed(CommitFailure::Cancelled(format!(
            "document must serialize to an object, got {other}"
        )))),
        Err(e) => Err(AppError::CommitFailed(CommitFailure::Cancelled(format!(
            "JSON error: {}",
            e
        )))),
    }
}

/// Deserialize a stored document into its shape.
pub fn from_document<T: DeserializeOwned>(doc: &Document) -> Result<T> {
    serde_json::from_value(Value::Object(doc.fields.clone())).map_err(|e| {
        tracing::error!("Malformed document {}: {:?}", doc.id, e);
        AppError::RetrievalFailed(format!("malformed document {}: {}", doc.id, e))
    })
}
