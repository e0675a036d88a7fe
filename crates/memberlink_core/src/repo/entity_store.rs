//! Entity store contract.
//!
//! # Responsibility
//! - Describe the load/transaction/statement surface a store must offer.
//! - Define the closed set of statements the flush coordinator issues.
//!
//! # Invariants
//! - `StoreTransaction::commit` and `rollback` consume the transaction.
//! - Dropping a transaction without committing must roll it back.

use crate::db::DbError;
use crate::model::entity::{EntityKey, EntitySnapshot, GroupId, GroupMember, MemberId};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StoreResult<T> = Result<T, StoreError>;

/// Store-level failure for loads and statement execution.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    /// A delete targeted a row that is not (or no longer) present.
    MissingRow(Statement),
    InvalidData(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::MissingRow(statement) => {
                write!(f, "statement affected no rows: {statement}")
            }
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::MissingRow(_) => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// One row-level mutation issued by a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Statement {
    InsertGroup(GroupId),
    InsertMember(MemberId),
    InsertLink(GroupMember),
    DeleteLink(GroupMember),
    DeleteMember(MemberId),
    DeleteGroup(GroupId),
}

impl Statement {
    /// Returns the inserted/deleted link, if this is a join-table statement.
    pub fn link(&self) -> Option<GroupMember> {
        match self {
            Self::InsertLink(link) | Self::DeleteLink(link) => Some(*link),
            _ => None,
        }
    }

    pub fn is_insert(&self) -> bool {
        matches!(
            self,
            Self::InsertGroup(_) | Self::InsertMember(_) | Self::InsertLink(_)
        )
    }
}

/// Renders the statement in SQL-like form for logs and demo output.
impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InsertGroup(id) => write!(f, "insert into groups (uuid) values ('{id}')"),
            Self::InsertMember(id) => write!(f, "insert into members (uuid) values ('{id}')"),
            Self::InsertLink(link) => write!(
                f,
                "insert into group_members (member_uuid, group_uuid) values ('{}', '{}')",
                link.member, link.group
            ),
            Self::DeleteLink(link) => write!(
                f,
                "delete from group_members where (member_uuid, group_uuid) = ('{}', '{}')",
                link.member, link.group
            ),
            Self::DeleteMember(id) => write!(f, "delete from members where uuid = '{id}'"),
            Self::DeleteGroup(id) => write!(f, "delete from groups where uuid = '{id}'"),
        }
    }
}

/// Read/transaction surface of a persistent entity store.
pub trait EntityStore {
    /// Loads one entity and its persisted links, or `None` when absent.
    fn load(&self, key: EntityKey) -> StoreResult<Option<EntitySnapshot>>;
    /// Opens a write transaction.
    fn begin(&mut self) -> StoreResult<Box<dyn StoreTransaction + '_>>;
}

/// Open write transaction on an `EntityStore`.
pub trait StoreTransaction {
    /// Lists the links persisted for `owner` as seen by this transaction.
    fn links_of(&self, owner: EntityKey) -> StoreResult<BTreeSet<GroupMember>>;
    /// Executes one statement.
    ///
    /// Deletes that affect no row fail with `StoreError::MissingRow`.
    fn execute(&mut self, statement: &Statement) -> StoreResult<()>;
    fn commit(self: Box<Self>) -> StoreResult<()>;
    fn rollback(self: Box<Self>) -> StoreResult<()>;
}
