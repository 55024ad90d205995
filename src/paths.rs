//! Path resolution for the hierarchical document store.
//!
//! Every document lives at a `/`-joined path of alternating collection names and ids,
//! e.g. `groups/{groupId}/forums/{forumId}/messages/{messageId}`. The shape of each path
//! is fixed per [`EntityKind`] by a static hierarchy table: the collection a kind lives in,
//! the kind it is nested under and its depth class. One generic builder walks that table,
//! so adding a kind is a table entry rather than new control flow.
//!
//! Resolved paths are opaque to the rest of the crate. Only the store implementations
//! look inside them.

use std::fmt;

/// Kinds of records addressable in the document store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Group,
    GroupName,
    GroupTag,
    GroupMember,
    Forum,
    ForumName,
    ForumTag,
    ForumMember,
    Message,
    Username,
    User,
    Pet,
    MealRecord,
    WeightRecord,
    MedicationRecord,
}

/// How many (collection, id) pairs a path for a kind carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthClass {
    Root,
    TwoLevel,
    ThreeLevel,
}

impl DepthClass {
    /// Number of ids a path of this class needs, leaf id included.
    pub fn required_ids(self) -> usize {
        match self {
            DepthClass::Root => 1,
            DepthClass::TwoLevel => 2,
            DepthClass::ThreeLevel => 3,
        }
    }
}

/// One row of the hierarchy table.
#[derive(Debug, Clone, Copy)]
struct KindMeta {
    collection: &'static str,
    parent: Option<EntityKind>,
    depth: DepthClass,
}

const fn meta(collection: &'static str, parent: Option<EntityKind>, depth: DepthClass) -> KindMeta {
    KindMeta {
        collection,
        parent,
        depth,
    }
}

impl EntityKind {
    pub const ALL: [EntityKind; 15] = [
        EntityKind::Group,
        EntityKind::GroupName,
        EntityKind::GroupTag,
        EntityKind::GroupMember,
        EntityKind::Forum,
        EntityKind::ForumName,
        EntityKind::ForumTag,
        EntityKind::ForumMember,
        EntityKind::Message,
        EntityKind::Username,
        EntityKind::User,
        EntityKind::Pet,
        EntityKind::MealRecord,
        EntityKind::WeightRecord,
        EntityKind::MedicationRecord,
    ];

    /// The hierarchy table. Exhaustive: a new kind does not compile until it has a row.
    const fn meta(self) -> KindMeta {
        use DepthClass::*;
        use EntityKind::*;

        match self {
            Group => meta("groups", None, Root),
            GroupName => meta("groupNames", None, Root),
            GroupTag => meta("groupTags", None, Root),
            GroupMember => meta("members", Some(Group), TwoLevel),
            Forum => meta("forums", Some(Group), TwoLevel),
            ForumName => meta("forumNames", Some(Group), TwoLevel),
            ForumTag => meta("forumTags", Some(Group), TwoLevel),
            ForumMember => meta("members", Some(Forum), ThreeLevel),
            Message => meta("messages", Some(Forum), ThreeLevel),
            Username => meta("usernames", None, Root),
            User => meta("users", None, Root),
            Pet => meta("pets", Some(User), TwoLevel),
            MealRecord => meta("meals", Some(Pet), ThreeLevel),
            WeightRecord => meta("weights", Some(Pet), ThreeLevel),
            MedicationRecord => meta("medications", Some(Pet), ThreeLevel),
        }
    }

    pub fn collection_name(self) -> &'static str {
        self.meta().collection
    }

    pub fn parent(self) -> Option<EntityKind> {
        self.meta().parent
    }

    pub fn depth_class(self) -> DepthClass {
        self.meta().depth
    }

    pub fn required_ids(self) -> usize {
        self.depth_class().required_ids()
    }

    /// Kinds from the root collection down to `self`.
    fn lineage(self) -> Vec<EntityKind> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent() {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Path validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("{kind} paths take {expected} id(s), got {actual}")]
    Arity {
        kind: EntityKind,
        expected: usize,
        actual: usize,
    },
    #[error("{kind} id at index {index} is {reason}")]
    InvalidId {
        kind: EntityKind,
        index: usize,
        reason: &'static str,
    },
    #[error("hierarchy table for {kind} disagrees with its declared depth")]
    Hierarchy { kind: EntityKind },
}

/// Location of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocPath(String);

/// Location of a collection of documents.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl DocPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl CollectionPath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolve the document path for `kind` from its ordered ids, root first.
///
/// `ids.len()` must equal the kind's required id count and every id must be a
/// non-empty segment without `/`.
pub fn resolve_path<S: AsRef<str>>(kind: EntityKind, ids: &[S]) -> Result<DocPath, PathError> {
    let expected = kind.required_ids();
    if ids.len() != expected {
        return Err(PathError::Arity {
            kind,
            expected,
            actual: ids.len(),
        });
    }
    build(kind, ids).map(DocPath)
}

/// Resolve the collection holding documents of `kind`, given the ids of its ancestors.
pub fn resolve_collection<S: AsRef<str>>(
    kind: EntityKind,
    parent_ids: &[S],
) -> Result<CollectionPath, PathError> {
    let expected = kind.required_ids() - 1;
    if parent_ids.len() != expected {
        return Err(PathError::Arity {
            kind,
            expected,
            actual: parent_ids.len(),
        });
    }
    build(kind, parent_ids).map(CollectionPath)
}

fn build<S: AsRef<str>>(kind: EntityKind, ids: &[S]) -> Result<String, PathError> {
    let lineage = kind.lineage();
    if lineage.len() != kind.required_ids() {
        return Err(PathError::Hierarchy { kind });
    }

    for (index, id) in ids.iter().enumerate() {
        validate_id(kind, index, id.as_ref())?;
    }

    let mut segments = Vec::with_capacity(lineage.len() * 2);
    for (level, ancestor) in lineage.iter().enumerate() {
        segments.push(ancestor.collection_name());
        if let Some(id) = ids.get(level) {
            segments.push(id.as_ref());
        }
    }
    Ok(segments.join("/"))
}

fn validate_id(kind: EntityKind, index: usize, id: &str) -> Result<(), PathError> {
    let reason = if id.trim().is_empty() {
        "empty"
    } else if id.contains('/') {
        "not a single path segment"
    } else {
        return Ok(());
    };
    Err(PathError::InvalidId {
        kind,
        index,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forum_and_message_paths() {
        assert_eq!(
            resolve_path(EntityKind::Forum, &["g", "f"]).unwrap().as_str(),
            "groups/g/forums/f"
        );
        assert_eq!(
            resolve_path(EntityKind::Message, &["g", "f", "m"])
                .unwrap()
                .as_str(),
            "groups/g/forums/f/messages/m"
        );
    }

    #[test]
    fn test_root_and_nested_paths_use_parent_collections() {
        assert_eq!(
            resolve_path(EntityKind::Group, &["g"]).unwrap().as_str(),
            "groups/g"
        );
        assert_eq!(
            resolve_path(EntityKind::ForumMember, &["g", "f", "u"])
                .unwrap()
                .as_str(),
            "groups/g/forums/f/members/u"
        );
        assert_eq!(
            resolve_path(EntityKind::WeightRecord, &["u", "p", "w"])
                .unwrap()
                .as_str(),
            "users/u/pets/p/weights/w"
        );
    }

    #[test]
    fn test_arity_holds_for_every_kind() {
        let ids = ["a", "b", "c", "d"];
        for kind in EntityKind::ALL {
            for len in 0..=ids.len() {
                let result = resolve_path(kind, &ids[..len]);
                if len == kind.required_ids() {
                    assert!(result.is_ok(), "{kind} with {len} ids");
                } else {
                    assert_eq!(
                        result,
                        Err(PathError::Arity {
                            kind,
                            expected: kind.required_ids(),
                            actual: len,
                        })
                    );
                }
            }
        }
    }

    #[test]
    fn test_hierarchy_table_is_consistent() {
        for kind in EntityKind::ALL {
            assert_eq!(kind.lineage().len(), kind.required_ids(), "{kind}");
        }
    }

    #[test]
    fn test_invalid_id_reports_first_offending_index() {
        let err = resolve_path(EntityKind::Message, &["g", "", " "]).unwrap_err();
        assert_eq!(
            err,
            PathError::InvalidId {
                kind: EntityKind::Message,
                index: 1,
                reason: "empty",
            }
        );

        let err = resolve_path(EntityKind::Group, &["a/b"]).unwrap_err();
        assert!(matches!(err, PathError::InvalidId { index: 0, .. }));
    }

    #[test]
    fn test_collection_paths() {
        let empty: [&str; 0] = [];
        assert_eq!(
            resolve_collection(EntityKind::User, &empty)
                .unwrap()
                .as_str(),
            "users"
        );
        assert_eq!(
            resolve_collection(EntityKind::ForumTag, &["g"])
                .unwrap()
                .as_str(),
            "groups/g/forumTags"
        );
        assert!(matches!(
            resolve_collection(EntityKind::ForumTag, &empty),
            Err(PathError::Arity { expected: 1, .. })
        ));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let a = resolve_path(EntityKind::Pet, &["u1", "p1"]).unwrap();
        let b = resolve_path(EntityKind::Pet, &["u1", "p1"]).unwrap();
        assert_eq!(a, b);
    }
}
