//! Group, forum and message documents.

use serde::{Deserialize, Serialize};

/// Canonical group document at `groups/{groupId}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupDoc {
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String,
}

/// Canonical forum document at `groups/{groupId}/forums/{forumId}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ForumDoc {
    pub name: String,
    pub group_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: String,
}

/// Leaf message document under a forum.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MessageDoc {
    pub author_id: String,
    pub author_name: String,
    pub body: String,
    pub posted_at: String,
}
