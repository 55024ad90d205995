//! Reverse tag index: tag string to the names of the entities carrying it.
//!
//! A tag document is created on first use and never deleted. Removing the last name
//! leaves it in place with an empty list; the next add updates that same document.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::batch::BatchCoordinator;
use crate::errors::Result;
use crate::models::{field, from_document, to_fields, TagDoc};
use crate::paths::{resolve_collection, resolve_path, CollectionPath, DocPath, EntityKind};
use crate::store::{FieldUpdate, SharedStore};

/// Which tag corpus: group tags are global, forum tags live under their group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagScope {
    Groups,
    Forums { group_id: String },
}

impl TagScope {
    fn tag_path(&self, tag: &str) -> Result<DocPath> {
        let path = match self {
            TagScope::Groups => resolve_path(EntityKind::GroupTag, &[tag])?,
            TagScope::Forums { group_id } => {
                resolve_path(EntityKind::ForumTag, &[group_id.as_str(), tag])?
            }
        };
        Ok(path)
    }

    fn collection(&self) -> Result<CollectionPath> {
        let path = match self {
            TagScope::Groups => resolve_collection::<&str>(EntityKind::GroupTag, &[])?,
            TagScope::Forums { group_id } => {
                resolve_collection(EntityKind::ForumTag, &[group_id.as_str()])?
            }
        };
        Ok(path)
    }
}

/// Reads and stages reverse tag index documents.
#[derive(Clone)]
pub struct TagIndexManager {
    store: SharedStore,
}

impl TagIndexManager {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Names listed under `tag`, `None` if the tag document was never created.
    pub async fn entities(&self, scope: &TagScope, tag: &str) -> Result<Option<Vec<String>>> {
        let path = scope.tag_path(tag)?;
        match self.store.get(&path).await? {
            Some(doc) => Ok(Some(from_document::<TagDoc>(&doc)?.entities)),
            None => Ok(None),
        }
    }

    /// Every tag whose list contains `name`. A reverse scan, since tags are not indexed
    /// by entity.
    pub async fn all_tags_containing(&self, scope: &TagScope, name: &str) -> Result<BTreeSet<String>> {
        let docs = self
            .store
            .query_array_contains(&scope.collection()?, field::ENTITIES, &Value::from(name))
            .await?;
        tracing::debug!(name, tags = docs.len(), "tags containing entity");
        Ok(docs.into_iter().map(|doc| doc.id).collect())
    }

    /// Every tag document in the scope with its names.
    pub async fn all_tags(&self, scope: &TagScope) -> Result<Vec<(String, Vec<String>)>> {
        let docs = self.store.list_collection(&scope.collection()?).await?;
        docs.iter()
            .map(|doc| Ok((doc.id.clone(), from_document::<TagDoc>(doc)?.entities)))
            .collect()
    }

    /// Which of `tags` already have a tag document.
    pub async fn existing(&self, scope: &TagScope, tags: &[String]) -> Result<BTreeSet<String>> {
        let mut found = BTreeSet::new();
        for tag in tags {
            if self.store.get(&scope.tag_path(tag)?).await?.is_some() {
                found.insert(tag.clone());
            }
        }
        Ok(found)
    }

    /// Stage `name` into `tag`: a fresh single-element document when the tag does not exist
    /// yet, a duplicate-safe union otherwise.
    pub(crate) fn add_entity_to_tag(
        &self,
        batch: &mut BatchCoordinator,
        scope: &TagScope,
        tag: &str,
        name: &str,
        tag_exists: bool,
    ) -> Result<()> {
        let path = scope.tag_path(tag)?;
        if tag_exists {
            batch.update(path, vec![FieldUpdate::union_str(field::ENTITIES, name)]);
        } else {
            let doc = TagDoc {
                entities: vec![name.to_string()],
            };
            batch.create(path, to_fields(&doc)?);
        }
        Ok(())
    }

    /// Stage removal of `name` from `tag`. Nothing is staged for a tag that does not exist.
    pub(crate) fn remove_entity_from_tag(
        &self,
        batch: &mut BatchCoordinator,
        scope: &TagScope,
        tag: &str,
        name: &str,
        tag_exists: bool,
    ) -> Result<()> {
        if tag_exists {
            batch.update(
                scope.tag_path(tag)?,
                vec![FieldUpdate::remove_str(field::ENTITIES, name)],
            );
        }
        Ok(())
    }

    /// Stage a remove-old/add-new pair on each tag found by [`Self::all_tags_containing`].
    pub(crate) fn rename_entity_in_all_tags(
        &self,
        batch: &mut BatchCoordinator,
        scope: &TagScope,
        tags: &BTreeSet<String>,
        old_name: &str,
        new_name: &str,
    ) -> Result<()> {
        for tag in tags {
            batch.update(
                scope.tag_path(tag)?,
                vec![
                    FieldUpdate::remove_str(field::ENTITIES, old_name),
                    FieldUpdate::union_str(field::ENTITIES, new_name),
                ],
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::batch::DEFAULT_WRITE_LIMIT;
    use crate::store::MemoryDocumentStore;

    fn setup() -> (TagIndexManager, SharedStore) {
        let store: SharedStore = Arc::new(MemoryDocumentStore::new());
        (TagIndexManager::new(store.clone()), store)
    }

    async fn add(tags: &TagIndexManager, store: &SharedStore, tag: &str, name: &str) {
        let exists = tags
            .existing(&TagScope::Groups, &[tag.to_string()])
            .await
            .unwrap()
            .contains(tag);
        let mut batch = BatchCoordinator::new(store.clone(), DEFAULT_WRITE_LIMIT);
        tags.add_entity_to_tag(&mut batch, &TagScope::Groups, tag, name, exists)
            .unwrap();
        batch.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_add_creates_then_unions() {
        let (tags, store) = setup();
        add(&tags, &store, "pets", "Dogs").await;
        add(&tags, &store, "pets", "Cats").await;
        add(&tags, &store, "pets", "Dogs").await;

        assert_eq!(
            tags.entities(&TagScope::Groups, "pets").await.unwrap(),
            Some(vec!["Dogs".to_string(), "Cats".to_string()])
        );
    }

    #[tokio::test]
    async fn test_orphaned_tag_is_kept_and_reused() {
        let (tags, store) = setup();
        add(&tags, &store, "pets", "Dogs").await;

        let mut batch = BatchCoordinator::new(store.clone(), DEFAULT_WRITE_LIMIT);
        tags.remove_entity_from_tag(&mut batch, &TagScope::Groups, "pets", "Dogs", true)
            .unwrap();
        batch.commit().await.unwrap();
        assert_eq!(
            tags.entities(&TagScope::Groups, "pets").await.unwrap(),
            Some(Vec::new())
        );

        add(&tags, &store, "pets", "Birds").await;
        assert_eq!(
            tags.entities(&TagScope::Groups, "pets").await.unwrap(),
            Some(vec!["Birds".to_string()])
        );
        assert_eq!(tags.all_tags(&TagScope::Groups).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_from_missing_tag_is_noop() {
        let (tags, store) = setup();
        let mut batch = BatchCoordinator::new(store.clone(), DEFAULT_WRITE_LIMIT);
        tags.remove_entity_from_tag(&mut batch, &TagScope::Groups, "ghost", "Dogs", false)
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_rename_in_all_tags() {
        let (tags, store) = setup();
        add(&tags, &store, "pets", "Dogs").await;
        add(&tags, &store, "loud", "Dogs").await;
        add(&tags, &store, "quiet", "Cats").await;

        let touched = tags
            .all_tags_containing(&TagScope::Groups, "Dogs")
            .await
            .unwrap();
        assert_eq!(
            touched.iter().cloned().collect::<Vec<_>>(),
            vec!["loud".to_string(), "pets".to_string()]
        );

        let mut batch = BatchCoordinator::new(store.clone(), DEFAULT_WRITE_LIMIT);
        tags.rename_entity_in_all_tags(&mut batch, &TagScope::Groups, &touched, "Dogs", "Canines")
            .unwrap();
        assert_eq!(batch.len(), 2);
        batch.commit().await.unwrap();

        assert!(tags
            .all_tags_containing(&TagScope::Groups, "Dogs")
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            tags.all_tags_containing(&TagScope::Groups, "Canines")
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_forum_tags_are_scoped_to_their_group() {
        let (tags, store) = setup();
        let scope = TagScope::Forums {
            group_id: "g1".to_string(),
        };
        let mut batch = BatchCoordinator::new(store.clone(), DEFAULT_WRITE_LIMIT);
        tags.add_entity_to_tag(&mut batch, &scope, "pets", "Walks", false)
            .unwrap();
        batch.commit().await.unwrap();

        assert!(tags.entities(&TagScope::Groups, "pets").await.unwrap().is_none());
        assert_eq!(
            tags.entities(&scope, "pets").await.unwrap(),
            Some(vec!["Walks".to_string()])
        );
    }
}
