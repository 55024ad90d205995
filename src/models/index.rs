//! Denormalized index documents.

use serde::{Deserialize, Serialize};

/// Name-index entry: human-readable name to internal id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NameIndexDoc {
    pub id: String,
}

/// Reverse tag index: names of the entities currently carrying the tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagDoc {
    #[serde(default)]
    pub entities: Vec<String>,
}
