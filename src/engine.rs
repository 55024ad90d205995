//! Consistency engine.
//!
//! Every structural change to a group or forum touches several denormalized views: the
//! canonical document, its name-index entry, the reverse tag index and the subscription
//! lists of its members. Each cascade here runs in three phases:
//!
//! 1. discovery reads (name checks, reverse tag and subscription scans),
//! 2. staging every write into one [`BatchCoordinator`],
//! 3. a single commit.
//!
//! A failed read aborts before anything is committed, and the commit is all-or-nothing.
//! The reads are not part of the atomic unit: a tag or subscription written by someone
//! else between discovery and commit is not picked up. No locking is attempted.
//!
//! This is the only place that writes reverse indices.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::batch::{BatchCoordinator, DEFAULT_WRITE_LIMIT};
use crate::errors::{AppError, Result};
use crate::identity::{IdentityProvider, NameIndexIdentity};
use crate::index::{NameIndexManager, NameScope, TagIndexManager, TagScope};
use crate::membership::{
    forum_subscription_key, parse_forum_subscription_key, MembershipManager, MembershipScope,
};
use crate::models::{
    field, from_document, to_fields, ForumDoc, GroupDoc, MemberDoc, MessageDoc, UserDoc,
};
use crate::paths::{resolve_collection, resolve_path, DocPath, EntityKind};
use crate::store::{Document, FieldUpdate, Fields, SharedStore};

/// Which named entity a cascade addresses. Forums are addressed through their group's name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityScope {
    Group,
    Forum { group: String },
}

impl EntityScope {
    pub fn forum(group: &str) -> Self {
        EntityScope::Forum {
            group: group.to_string(),
        }
    }
}

/// An [`EntityScope`] with the group name resolved to its id.
#[derive(Debug, Clone)]
enum Target {
    Group,
    Forum { group_id: String },
}

impl Target {
    fn kind(&self) -> EntityKind {
        match self {
            Target::Group => EntityKind::Group,
            Target::Forum { .. } => EntityKind::Forum,
        }
    }

    fn names(&self) -> NameScope {
        match self {
            Target::Group => NameScope::Groups,
            Target::Forum { group_id } => NameScope::Forums {
                group_id: group_id.clone(),
            },
        }
    }

    fn tags(&self) -> TagScope {
        match self {
            Target::Group => TagScope::Groups,
            Target::Forum { group_id } => TagScope::Forums {
                group_id: group_id.clone(),
            },
        }
    }

    fn entity_path(&self, id: &str) -> Result<DocPath> {
        let path = match self {
            Target::Group => resolve_path(EntityKind::Group, &[id])?,
            Target::Forum { group_id } => resolve_path(EntityKind::Forum, &[group_id.as_str(), id])?,
        };
        Ok(path)
    }

    fn membership(&self, id: &str, name: &str) -> MembershipScope {
        match self {
            Target::Group => MembershipScope::Group {
                group_id: id.to_string(),
                group_name: name.to_string(),
            },
            Target::Forum { group_id } => MembershipScope::Forum {
                group_id: group_id.clone(),
                forum_id: id.to_string(),
                forum_name: name.to_string(),
            },
        }
    }

    fn subscription_field(&self) -> &'static str {
        match self {
            Target::Group => field::GROUPS,
            Target::Forum { .. } => field::FORUMS,
        }
    }

    fn subscription_key(&self, name: &str) -> String {
        match self {
            Target::Group => name.to_string(),
            Target::Forum { group_id } => forum_subscription_key(group_id, name),
        }
    }

    fn document(&self, name: &str, tags: &[String]) -> Result<Fields> {
        let created_at = Utc::now().to_rfc3339();
        match self {
            Target::Group => to_fields(&GroupDoc {
                name: name.to_string(),
                tags: tags.to_vec(),
                created_at,
            }),
            Target::Forum { group_id } => to_fields(&ForumDoc {
                name: name.to_string(),
                group_id: group_id.clone(),
                tags: tags.to_vec(),
                created_at,
            }),
        }
    }
}

/// Orchestrates the create, rename, delete and tag-update cascades.
pub struct ConsistencyEngine {
    store: SharedStore,
    names: NameIndexManager,
    tags: TagIndexManager,
    members: MembershipManager,
    identity: Arc<dyn IdentityProvider>,
    write_limit: usize,
}

impl ConsistencyEngine {
    /// Engine resolving usernames through the local username index.
    pub fn new(store: SharedStore) -> Self {
        let names = NameIndexManager::new(store.clone());
        let identity = Arc::new(NameIndexIdentity::new(names.clone()));
        Self {
            tags: TagIndexManager::new(store.clone()),
            members: MembershipManager::new(store.clone()),
            names,
            store,
            identity,
            write_limit: DEFAULT_WRITE_LIMIT,
        }
    }

    pub fn with_identity(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = identity;
        self
    }

    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = limit;
        self
    }

    pub fn names(&self) -> &NameIndexManager {
        &self.names
    }

    pub fn tags(&self) -> &TagIndexManager {
        &self.tags
    }

    pub fn members(&self) -> &MembershipManager {
        &self.members
    }

    fn batch(&self) -> BatchCoordinator {
        BatchCoordinator::new(self.store.clone(), self.write_limit)
    }

    async fn target(&self, scope: &EntityScope) -> Result<Target> {
        match scope {
            EntityScope::Group => Ok(Target::Group),
            EntityScope::Forum { group } => {
                let group_id = self.names.resolve(&NameScope::Groups, group).await?;
                Ok(Target::Forum { group_id })
            }
        }
    }

    async fn load(&self, path: &DocPath, what: impl FnOnce() -> String) -> Result<Document> {
        self.store
            .get(path)
            .await?
            .ok_or_else(|| AppError::NotFound(what()))
    }

    /// Internal id of a named group or forum.
    pub async fn resolve(&self, scope: &EntityScope, name: &str) -> Result<String> {
        let target = self.target(scope).await?;
        self.names.resolve(&target.names(), name).await
    }

    /// Current tag list of a named group or forum.
    pub async fn entity_tags(&self, scope: &EntityScope, name: &str) -> Result<Vec<String>> {
        let target = self.target(scope).await?;
        let id = self.names.resolve(&target.names(), name).await?;
        let doc = self
            .load(&target.entity_path(&id)?, || format!("{} {name:?}", target.kind()))
            .await?;
        Ok(doc.string_list(field::TAGS))
    }

    /// Create a group or forum with its name-index entry and initial tags.
    pub async fn create(&self, scope: &EntityScope, name: &str, tags: &[String]) -> Result<String> {
        let target = self.target(scope).await?;
        let names = target.names();
        let tag_scope = target.tags();
        let tags = dedupe(tags);

        let existing = self.tags.existing(&tag_scope, &tags).await?;

        let id = Uuid::new_v4().to_string();
        let mut batch = self.batch();
        self.names.reserve(&mut batch, &names, name, &id).await?;
        batch.create(target.entity_path(&id)?, target.document(name, &tags)?);
        for tag in &tags {
            self.tags
                .add_entity_to_tag(&mut batch, &tag_scope, tag, name, existing.contains(tag))?;
        }

        let writes = batch.len();
        let revision = batch.commit().await?;
        tracing::info!(kind = %target.kind(), name, id = %id, writes, revision, "entity created");
        Ok(id)
    }

    /// Rename a group or forum and rewrite every tag and subscription that names it.
    pub async fn rename(&self, scope: &EntityScope, old_name: &str, new_name: &str) -> Result<()> {
        let target = self.target(scope).await?;
        let names = target.names();
        let tag_scope = target.tags();

        self.names.ensure_available(&names, new_name).await?;
        let id = self.names.resolve(&names, old_name).await?;
        let entity_path = target.entity_path(&id)?;
        self.load(&entity_path, || format!("{} {old_name:?}", target.kind()))
            .await?;

        let tags = self.tags.all_tags_containing(&tag_scope, old_name).await?;
        let sub_field = target.subscription_field();
        let old_key = target.subscription_key(old_name);
        let new_key = target.subscription_key(new_name);
        let subscribers = self.members.subscribers(sub_field, &old_key).await?;

        let mut batch = self.batch();
        batch.update_field(entity_path, field::NAME, new_name);
        self.tags
            .rename_entity_in_all_tags(&mut batch, &tag_scope, &tags, old_name, new_name)?;
        self.members
            .rename_subscription(&mut batch, &subscribers, sub_field, &old_key, &new_key)?;
        // New entry before releasing the old one
        self.names.stage_entry(&mut batch, &names, new_name, &id)?;
        self.names.release(&mut batch, &names, old_name)?;

        let writes = batch.len();
        let revision = batch.commit().await?;
        tracing::info!(
            kind = %target.kind(),
            old_name,
            new_name,
            tags = tags.len(),
            subscribers = subscribers.len(),
            writes,
            revision,
            "entity renamed"
        );
        Ok(())
    }

    /// Delete a group or forum, everything nested under it, and every reference to its name.
    pub async fn delete(&self, scope: &EntityScope, name: &str) -> Result<()> {
        let target = self.target(scope).await?;
        let names = target.names();
        let tag_scope = target.tags();

        let id = self.names.resolve(&names, name).await?;
        let tags = self.tags.all_tags_containing(&tag_scope, name).await?;
        let sub_field = target.subscription_field();
        let key = target.subscription_key(name);
        let subscribers = self.members.subscribers(sub_field, &key).await?;

        // A group takes its forums with it, so their subscriptions go too
        let mut forum_subscriptions = Vec::new();
        if let Target::Group = target {
            let forums = self
                .store
                .list_collection(&resolve_collection(EntityKind::Forum, &[id.as_str()])?)
                .await?;
            for forum in &forums {
                let forum: ForumDoc = from_document(forum)?;
                let forum_key = forum_subscription_key(&id, &forum.name);
                let users = self.members.subscribers(field::FORUMS, &forum_key).await?;
                forum_subscriptions.push((forum_key, users));
            }
        }

        let mut batch = self.batch();
        for tag in &tags {
            self.tags
                .remove_entity_from_tag(&mut batch, &tag_scope, tag, name, true)?;
        }
        self.members
            .drop_subscription(&mut batch, &subscribers, sub_field, &key)?;
        for (forum_key, users) in &forum_subscriptions {
            self.members
                .drop_subscription(&mut batch, users, field::FORUMS, forum_key)?;
        }
        batch.delete(target.entity_path(&id)?);
        self.names.release(&mut batch, &names, name)?;

        let writes = batch.len();
        let revision = batch.commit().await?;
        tracing::info!(
            kind = %target.kind(),
            name,
            tags = tags.len(),
            subscribers = subscribers.len(),
            forums = forum_subscriptions.len(),
            writes,
            revision,
            "entity deleted"
        );
        Ok(())
    }

    /// Add and remove tags on a group or forum, keeping the reverse index in step.
    ///
    /// A tag listed in both `added` and `removed` ends up removed. Returns the new tag list.
    pub async fn update_tag_set(
        &self,
        scope: &EntityScope,
        name: &str,
        added: &[String],
        removed: &[String],
    ) -> Result<Vec<String>> {
        let target = self.target(scope).await?;
        let tag_scope = target.tags();
        let removed = dedupe(removed);
        let added: Vec<String> = dedupe(added)
            .into_iter()
            .filter(|tag| !removed.contains(tag))
            .collect();

        let id = self.names.resolve(&target.names(), name).await?;
        let entity_path = target.entity_path(&id)?;
        let doc = self
            .load(&entity_path, || format!("{} {name:?}", target.kind()))
            .await?;

        let mut tags = doc.string_list(field::TAGS);
        tags.retain(|tag| !removed.contains(tag));
        for tag in &added {
            if !tags.contains(tag) {
                tags.push(tag.clone());
            }
        }
        if added.is_empty() && removed.is_empty() {
            return Ok(tags);
        }

        let touched: Vec<String> = added.iter().chain(removed.iter()).cloned().collect();
        let existing = self.tags.existing(&tag_scope, &touched).await?;

        let mut batch = self.batch();
        batch.update(
            entity_path,
            vec![
                FieldUpdate::ArrayRemove(field::TAGS.to_string(), to_values(&removed)),
                FieldUpdate::ArrayUnion(field::TAGS.to_string(), to_values(&added)),
            ],
        );
        for tag in &removed {
            self.tags
                .remove_entity_from_tag(&mut batch, &tag_scope, tag, name, existing.contains(tag))?;
        }
        for tag in &added {
            self.tags
                .add_entity_to_tag(&mut batch, &tag_scope, tag, name, existing.contains(tag))?;
        }

        let writes = batch.len();
        let revision = batch.commit().await?;
        tracing::info!(
            kind = %target.kind(),
            name,
            added = added.len(),
            removed = removed.len(),
            writes,
            revision,
            "tag set updated"
        );
        Ok(tags)
    }

    /// Add a user to a group or forum. Returns `false` if they already were a member.
    pub async fn add_member(&self, scope: &EntityScope, name: &str, username: &str) -> Result<bool> {
        let target = self.target(scope).await?;
        let id = self.names.resolve(&target.names(), name).await?;
        let user_id = self.identity.user_id(username).await?;
        let user = self.load_user(&user_id, username).await?;

        let membership = target.membership(&id, name);
        if self.members.member(&membership, &user_id).await?.is_some() {
            return Ok(false);
        }

        let mut batch = self.batch();
        self.members
            .add_member(&mut batch, &membership, &user_id, &user.display_name)?;
        let revision = batch.commit().await?;
        tracing::info!(kind = %target.kind(), name, username, revision, "member added");
        Ok(true)
    }

    /// Remove a user from a group or forum. Returns `false` if they were not a member.
    pub async fn remove_member(
        &self,
        scope: &EntityScope,
        name: &str,
        username: &str,
    ) -> Result<bool> {
        let target = self.target(scope).await?;
        let id = self.names.resolve(&target.names(), name).await?;
        let user_id = self.identity.user_id(username).await?;

        let membership = target.membership(&id, name);
        if self.members.member(&membership, &user_id).await?.is_none() {
            return Ok(false);
        }

        let mut batch = self.batch();
        self.members.remove_member(&mut batch, &membership, &user_id)?;
        let revision = batch.commit().await?;
        tracing::info!(kind = %target.kind(), name, username, revision, "member removed");
        Ok(true)
    }

    /// Members of a group or forum keyed by user id.
    pub async fn list_members(
        &self,
        scope: &EntityScope,
        name: &str,
    ) -> Result<BTreeMap<String, MemberDoc>> {
        let target = self.target(scope).await?;
        let id = self.names.resolve(&target.names(), name).await?;
        self.members.list_members(&target.membership(&id, name)).await
    }

    async fn load_user(&self, user_id: &str, username: &str) -> Result<UserDoc> {
        let path = resolve_path(EntityKind::User, &[user_id])?;
        let doc = self.load(&path, || format!("User {username:?}")).await?;
        from_document(&doc)
    }

    /// Create a user with a unique username.
    pub async fn register_user(&self, username: &str, display_name: &str) -> Result<String> {
        let names = NameScope::Usernames;
        let id = Uuid::new_v4().to_string();
        let mut batch = self.batch();
        self.names.reserve(&mut batch, &names, username, &id).await?;

        let user = UserDoc {
            username: username.to_string(),
            display_name: display_name.to_string(),
            groups: Vec::new(),
            forums: Vec::new(),
            created_at: Utc::now().to_rfc3339(),
        };

        batch.create(resolve_path(EntityKind::User, &[id.as_str()])?, to_fields(&user)?);
        let revision = batch.commit().await?;
        tracing::info!(username, id = %id, revision, "user registered");
        Ok(id)
    }

    /// Change a username. Memberships are keyed by id and need no rewrite.
    pub async fn rename_user(&self, old_username: &str, new_username: &str) -> Result<()> {
        let names = NameScope::Usernames;
        self.names.ensure_available(&names, new_username).await?;
        let id = self.names.resolve(&names, old_username).await?;
        let path = resolve_path(EntityKind::User, &[id.as_str()])?;
        self.load(&path, || format!("User {old_username:?}")).await?;

        let mut batch = self.batch();
        batch.update_field(path, field::USERNAME, new_username);
        self.names.stage_entry(&mut batch, &names, new_username, &id)?;
        self.names.release(&mut batch, &names, old_username)?;
        let revision = batch.commit().await?;
        tracing::info!(old_username, new_username, revision, "user renamed");
        Ok(())
    }

    /// Delete a user, their memberships everywhere, and their pets with all records.
    pub async fn delete_user(&self, username: &str) -> Result<()> {
        let names = NameScope::Usernames;
        let user_id = self.names.resolve(&names, username).await?;
        let user = self.load_user(&user_id, username).await?;

        let mut memberships = Vec::new();
        for group_name in &user.groups {
            match self.names.lookup(&NameScope::Groups, group_name).await? {
                Some(group_id) => memberships.push(MembershipScope::Group {
                    group_id,
                    group_name: group_name.clone(),
                }),
                None => tracing::warn!(username, group = %group_name, "subscribed group has no name entry"),
            }
        }
        for key in &user.forums {
            let Some((group_id, forum_name)) = parse_forum_subscription_key(key) else {
                tracing::warn!(username, key = %key, "malformed forum subscription");
                continue;
            };
            let scope = NameScope::Forums {
                group_id: group_id.to_string(),
            };
            match self.names.lookup(&scope, forum_name).await? {
                Some(forum_id) => memberships.push(MembershipScope::Forum {
                    group_id: group_id.to_string(),
                    forum_id,
                    forum_name: forum_name.to_string(),
                }),
                None => tracing::warn!(username, key = %key, "subscribed forum has no name entry"),
            }
        }

        let mut batch = self.batch();
        for membership in &memberships {
            self.members
                .remove_member_doc(&mut batch, membership, &user_id)?;
        }
        batch.delete(resolve_path(EntityKind::User, &[user_id.as_str()])?);
        self.names.release(&mut batch, &names, username)?;

        let writes = batch.len();
        let revision = batch.commit().await?;
        tracing::info!(
            username,
            memberships = memberships.len(),
            writes,
            revision,
            "user deleted"
        );
        Ok(())
    }

    /// Post a message to a forum. Returns the message id.
    pub async fn post_message(
        &self,
        group: &str,
        forum: &str,
        username: &str,
        body: &str,
    ) -> Result<String> {
        let group_id = self.names.resolve(&NameScope::Groups, group).await?;
        let forum_scope = NameScope::Forums {
            group_id: group_id.clone(),
        };
        let forum_id = self.names.resolve(&forum_scope, forum).await?;
        let user_id = self.identity.user_id(username).await?;
        let user = self.load_user(&user_id, username).await?;

        let id = Uuid::new_v4().to_string();
        let message = MessageDoc {
            author_id: user_id,
            author_name: user.display_name,
            body: body.to_string(),
            posted_at: Utc::now().to_rfc3339(),
        };

        let mut batch = self.batch();
        batch.create(
            resolve_path(
                EntityKind::Message,
                &[group_id.as_str(), forum_id.as_str(), id.as_str()],
            )?,
            to_fields(&message)?,
        );
        let revision = batch.commit().await?;
        tracing::debug!(group, forum, username, revision, "message posted");
        Ok(id)
    }
}

/// Drop repeats, keeping first occurrences in order.
fn dedupe(items: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    items
        .iter()
        .filter(|item| seen.insert(item.as_str()))
        .cloned()
        .collect()
}

fn to_values(items: &[String]) -> Vec<Value> {
    items.iter().map(|item| Value::from(item.as_str())).collect()
}
