//! Name index: unique human-readable names to opaque ids.
//!
//! Group names are unique globally, forum names within their group, usernames globally.
//! Uniqueness is checked with a plain read before the create is staged; the staged
//! `Create` makes a concurrent duplicate fail at commit rather than overwrite.

use crate::batch::BatchCoordinator;
use crate::errors::{AppError, Result};
use crate::models::{from_document, to_fields, NameIndexDoc};
use crate::paths::{resolve_path, DocPath, EntityKind};
use crate::store::SharedStore;

/// Namespace a name is unique in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameScope {
    Groups,
    Forums { group_id: String },
    Usernames,
}

impl NameScope {
    /// Kind of the canonical entity the names point at.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            NameScope::Groups => EntityKind::Group,
            NameScope::Forums { .. } => EntityKind::Forum,
            NameScope::Usernames => EntityKind::User,
        }
    }

    fn entry_path(&self, name: &str) -> Result<DocPath> {
        let path = match self {
            NameScope::Groups => resolve_path(EntityKind::GroupName, &[name])?,
            NameScope::Forums { group_id } => {
                resolve_path(EntityKind::ForumName, &[group_id.as_str(), name])?
            }
            NameScope::Usernames => resolve_path(EntityKind::Username, &[name])?,
        };
        Ok(path)
    }
}

/// Reads and stages name-index entries.
#[derive(Clone)]
pub struct NameIndexManager {
    store: SharedStore,
}

impl NameIndexManager {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Id registered under `name`, if any.
    pub async fn lookup(&self, scope: &NameScope, name: &str) -> Result<Option<String>> {
        let path = scope.entry_path(name)?;
        match self.store.get(&path).await? {
            Some(doc) => Ok(Some(from_document::<NameIndexDoc>(&doc)?.id)),
            None => Ok(None),
        }
    }

    /// Id registered under `name`, or `NotFound`.
    pub async fn resolve(&self, scope: &NameScope, name: &str) -> Result<String> {
        self.lookup(scope, name).await?.ok_or_else(|| {
            AppError::NotFound(format!("{} {:?}", scope.entity_kind(), name))
        })
    }

    pub async fn exists(&self, scope: &NameScope, name: &str) -> Result<bool> {
        Ok(self.lookup(scope, name).await?.is_some())
    }

    /// Fail with `NameInUse` if `name` is taken.
    pub async fn ensure_available(&self, scope: &NameScope, name: &str) -> Result<()> {
        if self.exists(scope, name).await? {
            return Err(AppError::NameInUse {
                kind: scope.entity_kind(),
                name: name.to_string(),
            });
        }
        Ok(())
    }

    /// Check `name` is free, then stage its entry.
    pub(crate) async fn reserve(
        &self,
        batch: &mut BatchCoordinator,
        scope: &NameScope,
        name: &str,
        id: &str,
    ) -> Result<()> {
        self.ensure_available(scope, name).await?;
        self.stage_entry(batch, scope, name, id)
    }

    /// Stage an entry without checking availability; the staged `Create` still fails the
    /// commit if the name was taken meanwhile.
    pub(crate) fn stage_entry(
        &self,
        batch: &mut BatchCoordinator,
        scope: &NameScope,
        name: &str,
        id: &str,
    ) -> Result<()> {
        let path = scope.entry_path(name)?;
        batch.create(path, to_fields(&NameIndexDoc { id: id.to_string() })?);
        Ok(())
    }

    /// Stage removal of the entry for a name the caller knows exists.
    pub(crate) fn release(
        &self,
        batch: &mut BatchCoordinator,
        scope: &NameScope,
        name: &str,
    ) -> Result<()> {
        batch.delete(scope.entry_path(name)?);
        Ok(())
    }
}
