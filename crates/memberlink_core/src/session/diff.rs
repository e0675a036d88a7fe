//! Collection diff engine for join-entity link sets.
//!
//! # Invariants
//! - Link identity is the `(member, group)` pair and nothing else.
//! - `diff_links` never mutates its inputs.
//! - `to_insert` and `to_delete` are always disjoint.

use crate::model::entity::GroupMember;
use std::collections::BTreeSet;

/// Pending operation on one join-table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkChange {
    Insert,
    Delete,
}

/// Set of link insertions/deletions needed to reach a declared state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LinkDelta {
    /// Declared but not current.
    pub to_insert: BTreeSet<GroupMember>,
    /// Current but not declared.
    pub to_delete: BTreeSet<GroupMember>,
}

impl LinkDelta {
    /// Delta that only inserts `links`.
    pub fn adding(links: impl IntoIterator<Item = GroupMember>) -> Self {
        Self {
            to_insert: links.into_iter().collect(),
            to_delete: BTreeSet::new(),
        }
    }

    /// Delta that only deletes `links`.
    pub fn removing(links: impl IntoIterator<Item = GroupMember>) -> Self {
        Self {
            to_insert: BTreeSet::new(),
            to_delete: links.into_iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.to_insert.is_empty() && self.to_delete.is_empty()
    }

    /// Total number of link operations.
    pub fn len(&self) -> usize {
        self.to_insert.len() + self.to_delete.len()
    }

    /// Iterates operations deletes first, each half in key order.
    pub fn changes(&self) -> impl Iterator<Item = (GroupMember, LinkChange)> + '_ {
        self.to_delete
            .iter()
            .map(|link| (*link, LinkChange::Delete))
            .chain(self.to_insert.iter().map(|link| (*link, LinkChange::Insert)))
    }
}

/// Computes the delta that turns `current` into `declared`.
pub fn diff_links(current: &BTreeSet<GroupMember>, declared: &BTreeSet<GroupMember>) -> LinkDelta {
    LinkDelta {
        to_insert: declared.difference(current).copied().collect(),
        to_delete: current.difference(declared).copied().collect(),
    }
}
