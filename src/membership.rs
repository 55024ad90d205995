//! Membership subcollections and the inverse per-user subscription lists.
//!
//! A member document under `groups/{g}/members/{userId}` (or the forum equivalent) is always
//! paired with an entry in the user's own list: the group name in `groups`, or a forum
//! subscription key in `forums`. Subscriptions are stored by name so clients can render them
//! without a join, which is why renames have to rewrite them.

use std::collections::BTreeMap;

use chrono::Utc;
use serde_json::Value;

use crate::batch::BatchCoordinator;
use crate::errors::Result;
use crate::models::{field, from_document, to_fields, MemberDoc};
use crate::paths::{resolve_collection, resolve_path, CollectionPath, DocPath, EntityKind};
use crate::store::{FieldUpdate, SharedStore};

/// Subscription entry for a forum: the owning group's id plus the forum name.
///
/// Forum names are only unique within a group, and group ids never change, so the key is
/// unique and survives group renames.
pub fn forum_subscription_key(group_id: &str, forum_name: &str) -> String {
    format!("{group_id}:{forum_name}")
}

/// Split a forum subscription key back into group id and forum name.
pub fn parse_forum_subscription_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(':')
        .filter(|(group_id, name)| !group_id.is_empty() && !name.is_empty())
}

/// The group or forum whose members are being managed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipScope {
    Group {
        group_id: String,
        group_name: String,
    },
    Forum {
        group_id: String,
        forum_id: String,
        forum_name: String,
    },
}

impl MembershipScope {
    fn member_path(&self, user_id: &str) -> Result<DocPath> {
        let path = match self {
            MembershipScope::Group { group_id, .. } => {
                resolve_path(EntityKind::GroupMember, &[group_id.as_str(), user_id])?
            }
            MembershipScope::Forum {
                group_id, forum_id, ..
            } => resolve_path(
                EntityKind::ForumMember,
                &[group_id.as_str(), forum_id.as_str(), user_id],
            )?,
        };
        Ok(path)
    }

    fn members_collection(&self) -> Result<CollectionPath> {
        let path = match self {
            MembershipScope::Group { group_id, .. } => {
                resolve_collection(EntityKind::GroupMember, &[group_id.as_str()])?
            }
            MembershipScope::Forum {
                group_id, forum_id, ..
            } => resolve_collection(
                EntityKind::ForumMember,
                &[group_id.as_str(), forum_id.as_str()],
            )?,
        };
        Ok(path)
    }

    /// User document field holding subscriptions of this scope's kind.
    pub fn subscription_field(&self) -> &'static str {
        match self {
            MembershipScope::Group { .. } => field::GROUPS,
            MembershipScope::Forum { .. } => field::FORUMS,
        }
    }

    /// The entry this scope occupies in a subscriber's list.
    pub fn subscription_key(&self) -> String {
        match self {
            MembershipScope::Group { group_name, .. } => group_name.clone(),
            MembershipScope::Forum {
                group_id,
                forum_name,
                ..
            } => forum_subscription_key(group_id, forum_name),
        }
    }
}

fn user_path(user_id: &str) -> Result<DocPath> {
    Ok(resolve_path(EntityKind::User, &[user_id])?)
}

fn users_collection() -> Result<CollectionPath> {
    Ok(resolve_collection::<&str>(EntityKind::User, &[])?)
}

/// Reads and stages membership pairs.
#[derive(Clone)]
pub struct MembershipManager {
    store: SharedStore,
}

impl MembershipManager {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn member(&self, scope: &MembershipScope, user_id: &str) -> Result<Option<MemberDoc>> {
        match self.store.get(&scope.member_path(user_id)?).await? {
            Some(doc) => Ok(Some(from_document(&doc)?)),
            None => Ok(None),
        }
    }

    /// Members keyed by user id.
    pub async fn list_members(&self, scope: &MembershipScope) -> Result<BTreeMap<String, MemberDoc>> {
        let docs = self.store.list_collection(&scope.members_collection()?).await?;
        docs.iter()
            .map(|doc| Ok((doc.id.clone(), from_document::<MemberDoc>(doc)?)))
            .collect()
    }

    /// Ids of users whose `field` list contains `key`.
    pub async fn subscribers(&self, field: &str, key: &str) -> Result<Vec<String>> {
        let docs = self
            .store
            .query_array_contains(&users_collection()?, field, &Value::from(key))
            .await?;
        tracing::debug!(field, key, subscribers = docs.len(), "subscription scan");
        Ok(docs.into_iter().map(|doc| doc.id).collect())
    }

    /// Stage the member document and the matching subscription entry.
    pub(crate) fn add_member(
        &self,
        batch: &mut BatchCoordinator,
        scope: &MembershipScope,
        user_id: &str,
        display_name: &str,
    ) -> Result<()> {
        let member = MemberDoc {
            display_name: display_name.to_string(),
            joined_at: Utc::now().to_rfc3339(),
        };
        batch.create(scope.member_path(user_id)?, to_fields(&member)?);
        batch.update(
            user_path(user_id)?,
            vec![FieldUpdate::union_str(
                scope.subscription_field(),
                &scope.subscription_key(),
            )],
        );
        Ok(())
    }

    /// Stage removal of both halves of a membership.
    pub(crate) fn remove_member(
        &self,
        batch: &mut BatchCoordinator,
        scope: &MembershipScope,
        user_id: &str,
    ) -> Result<()> {
        self.remove_member_doc(batch, scope, user_id)?;
        self.remove_subscription(batch, user_id, scope.subscription_field(), &scope.subscription_key())
    }

    /// Stage removal of the member document only, for a user being deleted outright.
    pub(crate) fn remove_member_doc(
        &self,
        batch: &mut BatchCoordinator,
        scope: &MembershipScope,
        user_id: &str,
    ) -> Result<()> {
        batch.delete(scope.member_path(user_id)?);
        Ok(())
    }

    /// Stage removal of one entry from a user's subscription list only.
    pub(crate) fn remove_subscription(
        &self,
        batch: &mut BatchCoordinator,
        user_id: &str,
        field: &str,
        key: &str,
    ) -> Result<()> {
        batch.update(user_path(user_id)?, vec![FieldUpdate::remove_str(field, key)]);
        Ok(())
    }

    /// Stage a remove-old/add-new pair on each subscriber found by [`Self::subscribers`].
    pub(crate) fn rename_subscription(
        &self,
        batch: &mut BatchCoordinator,
        users: &[String],
        field: &str,
        old_key: &str,
        new_key: &str,
    ) -> Result<()> {
        for user_id in users {
            batch.update(
                user_path(user_id)?,
                vec![
                    FieldUpdate::remove_str(field, old_key),
                    FieldUpdate::union_str(field, new_key),
                ],
            );
        }
        Ok(())
    }

    /// Stage removal of `key` from each subscriber found by [`Self::subscribers`].
    pub(crate) fn drop_subscription(
        &self,
        batch: &mut BatchCoordinator,
        users: &[String],
        field: &str,
        key: &str,
    ) -> Result<()> {
        for user_id in users {
            self.remove_subscription(batch, user_id, field, key)?;
        }
        Ok(())
    }
}
