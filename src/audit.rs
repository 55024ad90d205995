//! Read-only audit of the denormalized indices.
//!
//! Cascades leave a window between their discovery reads and their commit in which a
//! concurrent edit can slip through unrewritten. The auditor walks the whole store and
//! reports every pair of views that disagree, without changing anything.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::de::DeserializeOwned;

use crate::errors::Result;
use crate::membership::forum_subscription_key;
use crate::models::{from_document, ForumDoc, GroupDoc, NameIndexDoc, TagDoc, UserDoc};
use crate::paths::{resolve_collection, CollectionPath, EntityKind};
use crate::store::SharedStore;

/// One violated invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inconsistency {
    /// A name-index entry points at no entity, or at one with a different name.
    DanglingNameEntry {
        kind: EntityKind,
        name: String,
        id: String,
    },
    /// An entity has no name-index entry pointing back at it.
    MissingNameEntry {
        kind: EntityKind,
        name: String,
        id: String,
    },
    /// An entity lists a tag whose reverse index does not list the entity.
    TagNotIndexed {
        kind: EntityKind,
        entity: String,
        tag: String,
    },
    /// A reverse tag index lists an entity that does not carry the tag.
    StaleTagEntry {
        kind: EntityKind,
        tag: String,
        entity: String,
    },
    /// A member document without the matching subscription entry.
    MemberWithoutSubscription {
        kind: EntityKind,
        entity: String,
        user_id: String,
    },
    /// A subscription entry without the matching member document.
    SubscriptionWithoutMember { user_id: String, key: String },
}

impl fmt::Display for Inconsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Inconsistency::DanglingNameEntry { kind, name, id } => {
                write!(f, "{kind} name {name:?} points at missing or renamed id {id}")
            }
            Inconsistency::MissingNameEntry { kind, name, id } => {
                write!(f, "{kind} {id} named {name:?} has no name entry")
            }
            Inconsistency::TagNotIndexed { kind, entity, tag } => {
                write!(f, "{kind} {entity:?} carries tag {tag:?} but the tag does not list it")
            }
            Inconsistency::StaleTagEntry { kind, tag, entity } => {
                write!(f, "tag {tag:?} lists {kind} {entity:?} which does not carry it")
            }
            Inconsistency::MemberWithoutSubscription {
                kind,
                entity,
                user_id,
            } => write!(
                f,
                "user {user_id} is a member of {kind} {entity:?} without a subscription"
            ),
            Inconsistency::SubscriptionWithoutMember { user_id, key } => {
                write!(f, "user {user_id} subscribes to {key:?} without a member document")
            }
        }
    }
}

/// An entity as seen by the audit.
struct Named {
    id: String,
    name: String,
    tags: Vec<String>,
}

/// Walks groups, forums, users and their indices.
pub struct IndexAuditor {
    store: SharedStore,
}

impl IndexAuditor {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn audit(&self) -> Result<Vec<Inconsistency>> {
        let mut findings = Vec::new();

        let users: BTreeMap<String, UserDoc> = self
            .list(&resolve_collection::<&str>(EntityKind::User, &[])?)
            .await?
            .into_iter()
            .collect();
        let user_entities: Vec<Named> = users
            .iter()
            .map(|(id, user)| Named {
                id: id.clone(),
                name: user.username.clone(),
                tags: Vec::new(),
            })
            .collect();
        self.check_names(
            EntityKind::User,
            &user_entities,
            &resolve_collection::<&str>(EntityKind::Username, &[])?,
            &mut findings,
        )
        .await?;

        let groups: Vec<(String, GroupDoc)> = self
            .list(&resolve_collection::<&str>(EntityKind::Group, &[])?)
            .await?;
        let group_entities: Vec<Named> = groups
            .iter()
            .map(|(id, group)| Named {
                id: id.clone(),
                name: group.name.clone(),
                tags: group.tags.clone(),
            })
            .collect();
        self.check_names(
            EntityKind::Group,
            &group_entities,
            &resolve_collection::<&str>(EntityKind::GroupName, &[])?,
            &mut findings,
        )
        .await?;
        self.check_tags(
            EntityKind::Group,
            &group_entities,
            &resolve_collection::<&str>(EntityKind::GroupTag, &[])?,
            &mut findings,
        )
        .await?;

        // Subscription key -> member ids, for the reverse direction below
        let mut members_by_key: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for (group_id, group) in &groups {
            let members = self
                .member_ids(&resolve_collection(EntityKind::GroupMember, &[group_id.as_str()])?)
                .await?;
            for user_id in &members {
                if !users
                    .get(user_id)
                    .is_some_and(|user| user.groups.contains(&group.name))
                {
                    findings.push(Inconsistency::MemberWithoutSubscription {
                        kind: EntityKind::Group,
                        entity: group.name.clone(),
                        user_id: user_id.clone(),
                    });
                }
            }
            members_by_key.insert(group.name.clone(), members);

            let forums: Vec<(String, ForumDoc)> = self
                .list(&resolve_collection(EntityKind::Forum, &[group_id.as_str()])?)
                .await?;
            let forum_entities: Vec<Named> = forums
                .iter()
                .map(|(id, forum)| Named {
                    id: id.clone(),
                    name: forum.name.clone(),
                    tags: forum.tags.clone(),
                })
                .collect();
            self.check_names(
                EntityKind::Forum,
                &forum_entities,
                &resolve_collection(EntityKind::ForumName, &[group_id.as_str()])?,
                &mut findings,
            )
            .await?;
            self.check_tags(
                EntityKind::Forum,
                &forum_entities,
                &resolve_collection(EntityKind::ForumTag, &[group_id.as_str()])?,
                &mut findings,
            )
            .await?;

            for (forum_id, forum) in &forums {
                let key = forum_subscription_key(group_id, &forum.name);
                let members = self
                    .member_ids(&resolve_collection(
                        EntityKind::ForumMember,
                        &[group_id.as_str(), forum_id.as_str()],
                    )?)
                    .await?;
                for user_id in &members {
                    if !users
                        .get(user_id)
                        .is_some_and(|user| user.forums.contains(&key))
                    {
                        findings.push(Inconsistency::MemberWithoutSubscription {
                            kind: EntityKind::Forum,
                            entity: forum.name.clone(),
                            user_id: user_id.clone(),
                        });
                    }
                }
                members_by_key.insert(key, members);
            }
        }

        for (user_id, user) in &users {
            let keys = user.groups.iter().chain(user.forums.iter());
            for key in keys {
                let is_member = members_by_key
                    .get(key)
                    .is_some_and(|members| members.contains(user_id));
                if !is_member {
                    findings.push(Inconsistency::SubscriptionWithoutMember {
                        user_id: user_id.clone(),
                        key: key.clone(),
                    });
                }
            }
        }

        tracing::info!(findings = findings.len(), "index audit finished");
        Ok(findings)
    }

    async fn list<T: DeserializeOwned>(&self, collection: &CollectionPath) -> Result<Vec<(String, T)>> {
        let docs = self.store.list_collection(collection).await?;
        docs.iter()
            .map(|doc| Ok((doc.id.clone(), from_document(doc)?)))
            .collect()
    }

    async fn member_ids(&self, collection: &CollectionPath) -> Result<BTreeSet<String>> {
        let docs = self.store.list_collection(collection).await?;
        Ok(docs.into_iter().map(|doc| doc.id).collect())
    }

    async fn check_names(
        &self,
        kind: EntityKind,
        entities: &[Named],
        names: &CollectionPath,
        findings: &mut Vec<Inconsistency>,
    ) -> Result<()> {
        let entries: BTreeMap<String, String> = self
            .list::<NameIndexDoc>(names)
            .await?
            .into_iter()
            .map(|(name, entry)| (name, entry.id))
            .collect();
        let by_id: BTreeMap<&str, &Named> = entities.iter().map(|e| (e.id.as_str(), e)).collect();

        for entity in entities {
            if entries.get(&entity.name) != Some(&entity.id) {
                findings.push(Inconsistency::MissingNameEntry {
                    kind,
                    name: entity.name.clone(),
                    id: entity.id.clone(),
                });
            }
        }
        for (name, id) in &entries {
            if !by_id.get(id.as_str()).is_some_and(|e| &e.name == name) {
                findings.push(Inconsistency::DanglingNameEntry {
                    kind,
                    name: name.clone(),
                    id: id.clone(),
                });
            }
        }
        Ok(())
    }

    async fn check_tags(
        &self,
        kind: EntityKind,
        entities: &[Named],
        tags: &CollectionPath,
        findings: &mut Vec<Inconsistency>,
    ) -> Result<()> {
        let index: BTreeMap<String, Vec<String>> = self
            .list::<TagDoc>(tags)
            .await?
            .into_iter()
            .map(|(tag, doc)| (tag, doc.entities))
            .collect();
        let by_name: BTreeMap<&str, &Named> =
            entities.iter().map(|e| (e.name.as_str(), e)).collect();

        for entity in entities {
            for tag in &entity.tags {
                if !index.get(tag).is_some_and(|names| names.contains(&entity.name)) {
                    findings.push(Inconsistency::TagNotIndexed {
                        kind,
                        entity: entity.name.clone(),
                        tag: tag.clone(),
                    });
                }
            }
        }
        for (tag, names) in &index {
            for name in names {
                if !by_name.get(name.as_str()).is_some_and(|e| e.tags.contains(tag)) {
                    findings.push(Inconsistency::StaleTagEntry {
                        kind,
                        tag: tag.clone(),
                        entity: name.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}
