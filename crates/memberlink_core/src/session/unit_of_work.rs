//! Unit of work and flush coordinator.
//!
//! # Responsibility
//! - Accept declared link sets and raw deltas, merging them per link key.
//! - Schedule entity inserts and cascading deletes.
//! - Flush everything in one store transaction with deterministic order.
//!
//! # Invariants
//! - Pending link changes are last-write-wins per `(member, group)` key.
//! - Changes that are no-ops against persisted state are dropped before any
//!   statement is issued.
//! - Statement order: entity inserts, link deletes, link inserts, entity
//!   deletes; each group sorted by key.
//! - A failed flush leaves the registry cache and pending changes untouched.

use crate::model::entity::{
    EntityKey, EntitySnapshot, Group, GroupId, GroupMember, Member, MemberId,
};
use crate::repo::entity_store::{
    EntityStore, Statement, StoreError, StoreResult, StoreTransaction,
};
use crate::session::diff::{diff_links, LinkChange, LinkDelta};
use crate::session::identity::{IdentityRegistry, Lifecycle, RegistryError};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

pub type UowResult<T> = Result<T, UowError>;

/// Errors surfaced by unit-of-work operations.
#[derive(Debug)]
pub enum UowError {
    /// Entity is neither registered nor present in the store.
    NotFound(EntityKey),
    /// Conflicting instance for an already tracked key. The unit of work
    /// discards its pending changes when this is returned.
    DuplicateIdentity(EntityKey),
    /// Link does not have `owner` as one of its ends.
    ForeignLink { owner: EntityKey, link: GroupMember },
    /// Store failure; any open transaction was rolled back.
    Persistence(StoreError),
}

impl Display for UowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(key) => write!(f, "entity not found: {key}"),
            Self::DuplicateIdentity(key) => write!(f, "duplicate identity: {key}"),
            Self::ForeignLink { owner, link } => {
                write!(f, "link {link} cannot be declared on {owner}")
            }
            Self::Persistence(err) => write!(f, "persistence failure: {err}"),
        }
    }
}

impl Error for UowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RegistryError> for UowError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::NotFound(key) => Self::NotFound(key),
            RegistryError::DuplicateIdentity(key) => Self::DuplicateIdentity(key),
        }
    }
}

impl From<StoreError> for UowError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value)
    }
}

/// Unit-of-work state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Clean,
    Dirty,
    Flushing,
}

/// Statements a successful flush executed, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub statements: Vec<Statement>,
}

impl FlushReport {
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    pub fn inserted_links(&self) -> Vec<GroupMember> {
        self.links_where(true)
    }

    pub fn deleted_links(&self) -> Vec<GroupMember> {
        self.links_where(false)
    }

    fn links_where(&self, inserted: bool) -> Vec<GroupMember> {
        self.statements
            .iter()
            .filter(|statement| statement.is_insert() == inserted)
            .filter_map(Statement::link)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityChange {
    Insert,
    Delete,
}

#[derive(Debug, Default)]
struct PendingChanges {
    entities: BTreeMap<EntityKey, EntityChange>,
    links: BTreeMap<GroupMember, LinkChange>,
}

impl PendingChanges {
    fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.links.is_empty()
    }

    fn clear(&mut self) {
        self.entities.clear();
        self.links.clear();
    }
}

/// Statement groups of one flush after cancel-out.
#[derive(Debug, Default)]
struct FlushPlan {
    entity_inserts: BTreeSet<EntityKey>,
    link_deletes: BTreeSet<GroupMember>,
    link_inserts: BTreeSet<GroupMember>,
    entity_deletes: BTreeSet<EntityKey>,
}

/// Tracks declared links for a set of entities and flushes them atomically.
///
/// Not shareable across threads while in use; run one unit of work per
/// request and give each its own store handle.
pub struct UnitOfWork<S: EntityStore> {
    store: S,
    registry: IdentityRegistry,
    pending: PendingChanges,
    state: UnitState,
}

impl<S: EntityStore> UnitOfWork<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            registry: IdentityRegistry::new(),
            pending: PendingChanges::default(),
            state: UnitState::Clean,
        }
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    /// Read access to the underlying store; writes go through `flush`.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Pending link changes in key order.
    pub fn pending_link_changes(&self) -> Vec<(GroupMember, LinkChange)> {
        self.pending
            .links
            .iter()
            .map(|(link, change)| (*link, *change))
            .collect()
    }

    /// Schedules a new group row (and any links it carries).
    ///
    /// Persisting a managed group again only reconciles its links.
    ///
    /// # Errors
    /// - `NotFound` when a link target does not exist; nothing is scheduled.
    pub fn persist_group(&mut self, group: &Group) -> UowResult<()> {
        self.persist(EntitySnapshot::from(group))
    }

    /// Schedules a new member row (and any links it carries).
    ///
    /// Persisting a managed member again only reconciles its links.
    ///
    /// # Errors
    /// - `NotFound` when a link target does not exist; nothing is scheduled.
    pub fn persist_member(&mut self, member: &Member) -> UowResult<()> {
        self.persist(EntitySnapshot::from(member))
    }

    /// Attaches an instance loaded outside this unit of work.
    ///
    /// # Errors
    /// - `DuplicateIdentity` when the key is already tracked with conflicting
    ///   unflushed state; pending changes are discarded.
    pub fn attach_member(&mut self, member: &Member) -> UowResult<()> {
        self.register_or_discard(EntitySnapshot::from(member), Lifecycle::Managed)
    }

    /// Loads a member (with links) through the identity registry.
    pub fn find_member(&mut self, id: MemberId) -> UowResult<Member> {
        let snapshot = self.materialize(EntityKey::Member(id))?;
        snapshot
            .into_member()
            .ok_or(UowError::NotFound(EntityKey::Member(id)))
    }

    /// Loads a group (with links) through the identity registry.
    pub fn find_group(&mut self, id: GroupId) -> UowResult<Group> {
        let snapshot = self.materialize(EntityKey::Group(id))?;
        snapshot
            .into_group()
            .ok_or(UowError::NotFound(EntityKey::Group(id)))
    }

    /// Declares the complete link set of `owner` and records the resulting
    /// delta.
    ///
    /// Links not mentioned are deleted, but only links reachable from
    /// `owner`'s side. Returns the recorded delta.
    ///
    /// # Errors
    /// - `ForeignLink` when a link does not touch `owner`.
    /// - `NotFound` when `owner` or any link target does not exist; nothing
    ///   is recorded in that case.
    pub fn declare_links(
        &mut self,
        owner: EntityKey,
        links: impl IntoIterator<Item = GroupMember>,
    ) -> UowResult<LinkDelta> {
        let declared: BTreeSet<GroupMember> = links.into_iter().collect();
        ensure_links_touch(owner, &declared)?;

        let current = self.materialize(owner)?.links;
        let delta = diff_links(&current, &declared);

        debug!(
            "event=declare_links module=session owner={} declared={} to_insert={} to_delete={}",
            owner,
            declared.len(),
            delta.to_insert.len(),
            delta.to_delete.len()
        );
        self.record_delta(owner, delta.clone())?;
        Ok(delta)
    }

    /// Merges `delta` into the pending change set of `owner`.
    ///
    /// Later deltas win over earlier ones for the same link key.
    pub fn record_delta(&mut self, owner: EntityKey, delta: LinkDelta) -> UowResult<()> {
        self.registry.resolve(owner)?;
        ensure_links_touch(owner, delta.to_insert.iter().chain(&delta.to_delete))?;
        for link in &delta.to_insert {
            self.materialize(other_end(link, owner))?;
        }

        for (link, change) in delta.changes() {
            self.pending.links.insert(link, change);
            self.registry.stage_link(link, change);
        }
        if !delta.is_empty() {
            self.state = UnitState::Dirty;
        }
        Ok(())
    }

    /// Schedules a member delete; its links are deleted first at flush.
    pub fn remove_member(&mut self, id: MemberId) -> UowResult<()> {
        self.remove(EntityKey::Member(id))
    }

    /// Schedules a group delete; its links are deleted first at flush.
    pub fn remove_group(&mut self, id: GroupId) -> UowResult<()> {
        self.remove(EntityKey::Group(id))
    }

    /// Applies every pending change in one store transaction.
    ///
    /// # Errors
    /// - `Persistence` after rollback; cache and pending changes are kept, so
    ///   the caller may retry or `discard`.
    pub fn flush(&mut self) -> UowResult<FlushReport> {
        if self.pending.is_empty() {
            self.state = UnitState::Clean;
            return Ok(FlushReport::default());
        }

        let started_at = Instant::now();
        let plan = self.plan();
        self.state = UnitState::Flushing;

        match execute_plan(&mut self.store, &plan) {
            Ok(statements) => {
                self.registry.settle(&statements);
                self.pending.clear();
                self.state = UnitState::Clean;
                let report = FlushReport { statements };
                info!(
                    "event=uow_flush module=session status=ok statements={} link_inserts={} link_deletes={} duration_ms={}",
                    report.statements.len(),
                    report.inserted_links().len(),
                    report.deleted_links().len(),
                    started_at.elapsed().as_millis()
                );
                Ok(report)
            }
            Err(err) => {
                self.state = UnitState::Dirty;
                error!(
                    "event=uow_flush module=session status=error duration_ms={} error_code=flush_rolled_back error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(UowError::Persistence(err))
            }
        }
    }

    /// Drops pending changes and the identity cache.
    pub fn discard(&mut self) {
        if !self.pending.is_empty() {
            info!(
                "event=uow_discard module=session status=ok entities={} links={}",
                self.pending.entities.len(),
                self.pending.links.len()
            );
        }
        self.pending.clear();
        self.registry.clear();
        self.state = UnitState::Clean;
    }

    /// Ends the unit of work, discarding anything unflushed.
    pub fn close(mut self) -> S {
        self.discard();
        self.store
    }

    fn persist(&mut self, snapshot: EntitySnapshot) -> UowResult<()> {
        let key = snapshot.key;
        let links = snapshot.links.clone();
        ensure_links_touch(key, &links)?;
        let tracked = self
            .registry
            .resolve(key)
            .ok()
            .map(|entry| (entry.lifecycle, entry.effective_links() == &links));
        match tracked {
            Some((Lifecycle::Managed, true)) => return Ok(()),
            Some((Lifecycle::Managed, false)) => {
                return self.declare_links(key, links).map(|_| ());
            }
            Some(_) => return self.register_or_discard(snapshot, Lifecycle::New),
            None => {}
        }

        for link in &links {
            self.materialize(other_end(link, key))?;
        }
        self.register_or_discard(EntitySnapshot::new(key, BTreeSet::new()), Lifecycle::New)?;
        self.pending.entities.insert(key, EntityChange::Insert);
        self.state = UnitState::Dirty;
        if !links.is_empty() {
            self.declare_links(key, links)?;
        }
        Ok(())
    }

    fn remove(&mut self, key: EntityKey) -> UowResult<()> {
        self.materialize(key)?;
        self.pending.links.retain(|link, _| !link.touches(key));

        match self.registry.mark_removed(key)? {
            Lifecycle::New => {
                self.pending.entities.remove(&key);
            }
            Lifecycle::Managed | Lifecycle::Removed => {
                self.pending.entities.insert(key, EntityChange::Delete);
            }
        }

        self.state = if self.pending.is_empty() {
            UnitState::Clean
        } else {
            UnitState::Dirty
        };
        Ok(())
    }

    fn register_or_discard(
        &mut self,
        snapshot: EntitySnapshot,
        lifecycle: Lifecycle,
    ) -> UowResult<()> {
        match self.registry.register(snapshot, lifecycle) {
            Ok(_) => Ok(()),
            Err(RegistryError::DuplicateIdentity(key)) => {
                warn!(
                    "event=uow_duplicate_identity module=session status=error key={} pending_links={}",
                    key,
                    self.pending.links.len()
                );
                self.discard();
                Err(UowError::DuplicateIdentity(key))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Resolves `key` from the registry, loading and registering on miss.
    fn materialize(&mut self, key: EntityKey) -> UowResult<EntitySnapshot> {
        if self.registry.is_removed(key) {
            return Err(UowError::NotFound(key));
        }
        if let Ok(entry) = self.registry.resolve(key) {
            return Ok(entry.snapshot());
        }

        let snapshot = self.store.load(key)?.ok_or(UowError::NotFound(key))?;
        self.registry.register(snapshot.clone(), Lifecycle::Managed)?;
        Ok(snapshot)
    }

    /// Builds the statement plan, dropping changes already reflected in the
    /// persisted cache.
    fn plan(&self) -> FlushPlan {
        let mut plan = FlushPlan::default();
        for (key, change) in &self.pending.entities {
            match change {
                EntityChange::Insert => plan.entity_inserts.insert(*key),
                EntityChange::Delete => plan.entity_deletes.insert(*key),
            };
        }
        for (link, change) in &self.pending.links {
            match (change, self.registry.is_persisted(link)) {
                (LinkChange::Insert, Some(true)) | (LinkChange::Delete, Some(false)) => {}
                (LinkChange::Insert, _) => {
                    plan.link_inserts.insert(*link);
                }
                (LinkChange::Delete, _) => {
                    plan.link_deletes.insert(*link);
                }
            }
        }
        plan
    }
}

fn execute_plan<S: EntityStore>(store: &mut S, plan: &FlushPlan) -> StoreResult<Vec<Statement>> {
    let mut txn = store.begin()?;
    match run_plan(txn.as_mut(), plan) {
        Ok(statements) => {
            txn.commit()?;
            Ok(statements)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback() {
                warn!(
                    "event=uow_rollback module=session status=error error={}",
                    rollback_err
                );
            }
            Err(err)
        }
    }
}

fn run_plan(txn: &mut dyn StoreTransaction, plan: &FlushPlan) -> StoreResult<Vec<Statement>> {
    let mut statements: Vec<Statement> = plan
        .entity_inserts
        .iter()
        .map(|key| match *key {
            EntityKey::Group(id) => Statement::InsertGroup(id),
            EntityKey::Member(id) => Statement::InsertMember(id),
        })
        .collect();

    let mut link_deletes = plan.link_deletes.clone();
    for key in &plan.entity_deletes {
        link_deletes.extend(txn.links_of(*key)?);
    }
    statements.extend(link_deletes.into_iter().map(Statement::DeleteLink));
    statements.extend(plan.link_inserts.iter().copied().map(Statement::InsertLink));
    statements.extend(plan.entity_deletes.iter().map(|key| match *key {
        EntityKey::Group(id) => Statement::DeleteGroup(id),
        EntityKey::Member(id) => Statement::DeleteMember(id),
    }));

    for statement in &statements {
        txn.execute(statement)?;
    }
    Ok(statements)
}

fn other_end(link: &GroupMember, owner: EntityKey) -> EntityKey {
    match owner {
        EntityKey::Member(_) => EntityKey::Group(link.group),
        EntityKey::Group(_) => EntityKey::Member(link.member),
    }
}

fn ensure_links_touch<'a>(
    owner: EntityKey,
    links: impl IntoIterator<Item = &'a GroupMember>,
) -> UowResult<()> {
    match links.into_iter().find(|link| !link.touches(owner)) {
        Some(link) => Err(UowError::ForeignLink {
            owner,
            link: *link,
        }),
        None => Ok(()),
    }
}
