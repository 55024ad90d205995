//! User and membership documents.

use serde::{Deserialize, Serialize};

/// Canonical user document at `users/{userId}`.
///
/// `groups` holds group names; `forums` holds forum subscription keys
/// (see [`crate::membership::forum_subscription_key`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UserDoc {
    pub username: String,
    pub display_name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub forums: Vec<String>,
    pub created_at: String,
}

/// Join metadata stored in a group's or forum's `members` subcollection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberDoc {
    pub display_name: String,
    pub joined_at: String,
}
