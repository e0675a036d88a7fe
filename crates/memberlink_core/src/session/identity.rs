//! Identity registry scoped to one unit of work.
//!
//! # Responsibility
//! - Map `EntityKey` to a single cached entry, so repeated references to the
//!   same row resolve to the same link state.
//! - Keep both ends of a link consistent when links are staged or settled.
//!
//! # Invariants
//! - At most one entry per key.
//! - `links` mirrors persisted state as of the last successful flush or load.
//! - `pending` is `Some` exactly when the entry has unflushed changes.
//! - `Removed` entries never resolve.

use crate::model::entity::{EntityKey, EntitySnapshot, GroupMember};
use crate::repo::entity_store::Statement;
use crate::session::diff::LinkChange;
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type RegistryResult<T> = Result<T, RegistryError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// No live entry for the key; the caller must load it from the store.
    NotFound(EntityKey),
    /// A different instance with unflushed, conflicting changes is registered.
    DuplicateIdentity(EntityKey),
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "entity not registered: {key}"),
            Self::DuplicateIdentity(key) => {
                write!(f, "conflicting instance already registered for {key}")
            }
        }
    }
}

impl Error for RegistryError {}

/// Persistence lifecycle of a registered entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Scheduled for insert; no row exists yet.
    New,
    /// Row exists in the store.
    Managed,
    /// Scheduled for delete.
    Removed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    pub key: EntityKey,
    pub lifecycle: Lifecycle,
    links: BTreeSet<GroupMember>,
    pending: Option<BTreeSet<GroupMember>>,
}

impl RegistryEntry {
    /// Links as last persisted.
    pub fn persisted_links(&self) -> &BTreeSet<GroupMember> {
        &self.links
    }

    /// Links including unflushed changes.
    pub fn effective_links(&self) -> &BTreeSet<GroupMember> {
        self.pending.as_ref().unwrap_or(&self.links)
    }

    pub fn is_dirty(&self) -> bool {
        self.pending.is_some()
    }

    pub fn snapshot(&self) -> EntitySnapshot {
        EntitySnapshot::new(self.key, self.effective_links().clone())
    }

    fn pending_view(&mut self) -> &mut BTreeSet<GroupMember> {
        let links = &self.links;
        self.pending.get_or_insert_with(|| links.clone())
    }
}

/// Per-unit-of-work identity map.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    entries: BTreeMap<EntityKey, RegistryEntry>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the live entry for `key`.
    ///
    /// # Errors
    /// - `NotFound` when nothing is registered or the entry is `Removed`.
    pub fn resolve(&self, key: EntityKey) -> RegistryResult<&RegistryEntry> {
        match self.entries.get(&key) {
            Some(entry) if entry.lifecycle != Lifecycle::Removed => Ok(entry),
            _ => Err(RegistryError::NotFound(key)),
        }
    }

    pub fn is_removed(&self, key: EntityKey) -> bool {
        self.entries
            .get(&key)
            .is_some_and(|entry| entry.lifecycle == Lifecycle::Removed)
    }

    /// Registers `snapshot` under its key.
    ///
    /// A clean entry is overwritten whatever its lifecycle. A dirty entry
    /// accepts the snapshot only when it carries the same lifecycle and
    /// effective links, in which case nothing changes.
    ///
    /// # Errors
    /// - `DuplicateIdentity` when the snapshot conflicts with unflushed state.
    pub fn register(
        &mut self,
        snapshot: EntitySnapshot,
        lifecycle: Lifecycle,
    ) -> RegistryResult<&RegistryEntry> {
        let key = snapshot.key;
        if let Some(existing) = self.entries.get(&key) {
            if existing.is_dirty() {
                if existing.lifecycle != lifecycle
                    || existing.effective_links() != &snapshot.links
                {
                    return Err(RegistryError::DuplicateIdentity(key));
                }
                return self.resolve(key);
            }
        }

        let pending = match lifecycle {
            Lifecycle::New => Some(snapshot.links.clone()),
            Lifecycle::Managed | Lifecycle::Removed => None,
        };
        let links = match lifecycle {
            Lifecycle::New => BTreeSet::new(),
            Lifecycle::Managed | Lifecycle::Removed => snapshot.links,
        };
        self.entries.insert(
            key,
            RegistryEntry {
                key,
                lifecycle,
                links,
                pending,
            },
        );
        self.resolve(key)
    }

    /// Reports whether `link` is persisted, from whichever end is cached.
    ///
    /// Returns `None` when neither end is registered.
    pub fn is_persisted(&self, link: &GroupMember) -> Option<bool> {
        [EntityKey::Member(link.member), EntityKey::Group(link.group)]
            .into_iter()
            .find_map(|key| self.entries.get(&key))
            .map(|entry| entry.links.contains(link))
    }

    /// Applies an unflushed link change to the views of both ends.
    pub fn stage_link(&mut self, link: GroupMember, change: LinkChange) {
        for key in [EntityKey::Member(link.member), EntityKey::Group(link.group)] {
            if let Some(entry) = self.entries.get_mut(&key) {
                let view = entry.pending_view();
                if change == LinkChange::Insert {
                    view.insert(link);
                } else {
                    view.remove(&link);
                }
            }
        }
    }

    /// Schedules `key` for deletion and drops its links from every view.
    ///
    /// `New` entries are evicted outright since no row exists for them.
    pub fn mark_removed(&mut self, key: EntityKey) -> RegistryResult<Lifecycle> {
        let entry = self
            .entries
            .get_mut(&key)
            .filter(|entry| entry.lifecycle != Lifecycle::Removed)
            .ok_or(RegistryError::NotFound(key))?;
        let previous = entry.lifecycle;

        if previous == Lifecycle::New {
            self.entries.remove(&key);
        } else {
            entry.lifecycle = Lifecycle::Removed;
            entry.pending = Some(BTreeSet::new());
        }

        for other in self.entries.values_mut().filter(|entry| entry.key != key) {
            if other.effective_links().iter().any(|link| link.touches(key)) {
                let mut view = other.effective_links().clone();
                view.retain(|link| !link.touches(key));
                other.pending = Some(view);
            }
        }
        Ok(previous)
    }

    /// Folds committed statements into the cache and clears pending views.
    pub fn settle(&mut self, executed: &[Statement]) {
        for statement in executed {
            match *statement {
                Statement::InsertGroup(id) => self.mark_managed(EntityKey::Group(id)),
                Statement::InsertMember(id) => self.mark_managed(EntityKey::Member(id)),
                Statement::InsertLink(link) => self.persist_link(link, LinkChange::Insert),
                Statement::DeleteLink(link) => self.persist_link(link, LinkChange::Delete),
                Statement::DeleteMember(id) => self.evict(EntityKey::Member(id)),
                Statement::DeleteGroup(id) => self.evict(EntityKey::Group(id)),
            }
        }
        for entry in self.entries.values_mut() {
            entry.pending = None;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn mark_managed(&mut self, key: EntityKey) {
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.lifecycle = Lifecycle::Managed;
        }
    }

    fn persist_link(&mut self, link: GroupMember, change: LinkChange) {
        for key in [EntityKey::Member(link.member), EntityKey::Group(link.group)] {
            if let Some(entry) = self.entries.get_mut(&key) {
                if change == LinkChange::Insert {
                    entry.links.insert(link);
                } else {
                    entry.links.remove(&link);
                }
            }
        }
    }

    fn evict(&mut self, key: EntityKey) {
        self.entries.remove(&key);
        for entry in self.entries.values_mut() {
            entry.links.retain(|link| !link.touches(key));
        }
    }
}
