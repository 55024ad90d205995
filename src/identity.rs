//! Username resolution.
//!
//! Callers address users by username; cascades need the internal id. The lookup sits
//! behind a trait so an external auth provider can stand in for the local index.

use async_trait::async_trait;

use crate::errors::Result;
use crate::index::{NameIndexManager, NameScope};

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Internal id for `username`, or `NotFound`.
    async fn user_id(&self, username: &str) -> Result<String>;
}

/// Resolves usernames through the `usernames/{username}` name index.
pub struct NameIndexIdentity {
    names: NameIndexManager,
}

impl NameIndexIdentity {
    pub fn new(names: NameIndexManager) -> Self {
        Self { names }
    }
}

#[async_trait]
impl IdentityProvider for NameIndexIdentity {
    async fn user_id(&self, username: &str) -> Result<String> {
        self.names.resolve(&NameScope::Usernames, username).await
    }
}
