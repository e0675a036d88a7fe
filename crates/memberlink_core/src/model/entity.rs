//! Group/member entities and the `GroupMember` join entity.
//!
//! # Responsibility
//! - Define `Group`, `Member` and `GroupMember` records.
//! - Provide `EntityKey`, the type-tagged identity used by the registry,
//!   the store and the flush coordinator.
//!
//! # Invariants
//! - `GroupMember` carries no attribute beyond its two references, so two
//!   links with the same pair are the same link.
//! - `GroupMember` ordering is `(member, group)`; flush output relies on it.
//! - `Member` is the owning side of the relationship: deleting it removes
//!   its links, and a link detached from its member is deleted.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier of a group row.
pub type GroupId = Uuid;

/// Stable identifier of a member row.
pub type MemberId = Uuid;

/// Join entity: "member `member` belongs to group `group`".
///
/// Field order defines the composite key order `(member, group)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupMember {
    pub member: MemberId,
    pub group: GroupId,
}

impl GroupMember {
    pub fn new(member: MemberId, group: GroupId) -> Self {
        Self { member, group }
    }

    /// Returns whether this link has `key` as one of its two ends.
    pub fn touches(&self, key: EntityKey) -> bool {
        match key {
            EntityKey::Group(id) => self.group == id,
            EntityKey::Member(id) => self.member == id,
        }
    }
}

impl Display for GroupMember {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.member, self.group)
    }
}

/// Entity type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Group,
    Member,
}

/// Type-tagged primary key of a group or member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum EntityKey {
    Group(GroupId),
    Member(MemberId),
}

impl EntityKey {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Group(_) => EntityKind::Group,
            Self::Member(_) => EntityKind::Member,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Self::Group(id) | Self::Member(id) => *id,
        }
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Group(id) => write!(f, "group:{id}"),
            Self::Member(id) => write!(f, "member:{id}"),
        }
    }
}

/// Group record with its member links.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    /// Links sorted by `(member, group)`.
    pub members: Vec<GroupMember>,
}

impl Group {
    /// Creates a new group with a generated id and no links.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: GroupId) -> Self {
        Self {
            id,
            members: Vec::new(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::Group(self.id)
    }

    /// Ids of linked members, in link order.
    pub fn member_ids(&self) -> Vec<MemberId> {
        self.members.iter().map(|link| link.member).collect()
    }
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

/// Member record with its group links.
///
/// Owning side of the relationship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    /// Links sorted by `(member, group)`.
    pub groups: Vec<GroupMember>,
}

impl Member {
    /// Creates a new member with a generated id and no links.
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: MemberId) -> Self {
        Self {
            id,
            groups: Vec::new(),
        }
    }

    pub fn key(&self) -> EntityKey {
        EntityKey::Member(self.id)
    }

    /// Builds the link from this member to `group`.
    pub fn link_to(&self, group: GroupId) -> GroupMember {
        GroupMember::new(self.id, group)
    }

    /// Ids of linked groups, in link order.
    pub fn group_ids(&self) -> Vec<GroupId> {
        self.groups.iter().map(|link| link.group).collect()
    }
}

impl Default for Member {
    fn default() -> Self {
        Self::new()
    }
}

/// Entity as materialized from the store or the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySnapshot {
    pub key: EntityKey,
    pub links: BTreeSet<GroupMember>,
}

impl EntitySnapshot {
    pub fn new(key: EntityKey, links: BTreeSet<GroupMember>) -> Self {
        Self { key, links }
    }

    /// Converts to a `Member` when the key is a member key.
    pub fn into_member(self) -> Option<Member> {
        match self.key {
            EntityKey::Member(id) => Some(Member {
                id,
                groups: self.links.into_iter().collect(),
            }),
            EntityKey::Group(_) => None,
        }
    }

    /// Converts to a `Group` when the key is a group key.
    pub fn into_group(self) -> Option<Group> {
        match self.key {
            EntityKey::Group(id) => Some(Group {
                id,
                members: self.links.into_iter().collect(),
            }),
            EntityKey::Member(_) => None,
        }
    }
}

impl From<&Member> for EntitySnapshot {
    fn from(value: &Member) -> Self {
        Self::new(value.key(), value.groups.iter().copied().collect())
    }
}

impl From<&Group> for EntitySnapshot {
    fn from(value: &Group) -> Self {
        Self::new(value.key(), value.members.iter().copied().collect())
    }
}
