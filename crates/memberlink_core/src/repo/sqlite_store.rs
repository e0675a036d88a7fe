//! SQLite implementation of the entity store contract.
//!
//! # Responsibility
//! - Load groups/members together with their persisted links.
//! - Execute flush statements inside `IMMEDIATE` transactions.
//!
//! # Invariants
//! - Connections must be migrated (`ensure_schema_ready`) before use.
//! - Link rows are always read in `(member_uuid, group_uuid)` order.
//! - Deletes that match no row are reported, never silently ignored.

use crate::db::ensure_schema_ready;
use crate::model::entity::{EntityKey, EntitySnapshot, GroupMember};
use crate::repo::entity_store::{
    EntityStore, Statement, StoreError, StoreResult, StoreTransaction,
};
use log::{debug, info};
use rusqlite::{params, Connection, Transaction, TransactionBehavior};
use std::collections::BTreeSet;
use uuid::Uuid;

/// SQLite-backed entity store.
pub struct SqliteEntityStore<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqliteEntityStore<'conn> {
    /// Constructs a store from a migrated/ready connection.
    pub fn try_new(conn: &'conn mut Connection) -> StoreResult<Self> {
        ensure_schema_ready(conn)?;
        Ok(Self { conn })
    }

    /// Deletes every link, member and group row in one transaction.
    pub fn purge_all(&mut self) -> StoreResult<()> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let links = tx.execute("DELETE FROM group_members;", [])?;
        let members = tx.execute("DELETE FROM members;", [])?;
        let groups = tx.execute("DELETE FROM groups;", [])?;
        tx.commit()?;

        info!(
            "event=store_purge module=repo status=ok links={links} members={members} groups={groups}"
        );
        Ok(())
    }

    /// Returns every persisted link, sorted by `(member, group)`.
    pub fn all_links(&self) -> StoreResult<Vec<GroupMember>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_uuid, group_uuid
             FROM group_members
             ORDER BY member_uuid ASC, group_uuid ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut links = Vec::new();
        while let Some(row) = rows.next()? {
            links.push(parse_link(&row.get::<_, String>(0)?, &row.get::<_, String>(1)?)?);
        }
        Ok(links)
    }
}

impl EntityStore for SqliteEntityStore<'_> {
    fn load(&self, key: EntityKey) -> StoreResult<Option<EntitySnapshot>> {
        if !entity_exists(self.conn, key)? {
            return Ok(None);
        }
        let links = load_links(self.conn, key)?;
        Ok(Some(EntitySnapshot::new(key, links)))
    }

    fn begin(&mut self) -> StoreResult<Box<dyn StoreTransaction + '_>> {
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        Ok(Box::new(SqliteStoreTransaction { tx }))
    }
}

/// Write transaction over a `SqliteEntityStore` connection.
///
/// Rolls back on drop unless committed.
pub struct SqliteStoreTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl StoreTransaction for SqliteStoreTransaction<'_> {
    fn links_of(&self, owner: EntityKey) -> StoreResult<BTreeSet<GroupMember>> {
        load_links(&self.tx, owner)
    }

    fn execute(&mut self, statement: &Statement) -> StoreResult<()> {
        debug!("event=store_execute module=repo sql=\"{statement}\"");
        let changed = match *statement {
            Statement::InsertGroup(id) => self
                .tx
                .execute("INSERT INTO groups (uuid) VALUES (?1);", [id.to_string()])?,
            Statement::InsertMember(id) => self
                .tx
                .execute("INSERT INTO members (uuid) VALUES (?1);", [id.to_string()])?,
            Statement::InsertLink(link) => self.tx.execute(
                "INSERT INTO group_members (member_uuid, group_uuid) VALUES (?1, ?2);",
                params![link.member.to_string(), link.group.to_string()],
            )?,
            Statement::DeleteLink(link) => self.tx.execute(
                "DELETE FROM group_members WHERE member_uuid = ?1 AND group_uuid = ?2;",
                params![link.member.to_string(), link.group.to_string()],
            )?,
            Statement::DeleteMember(id) => self
                .tx
                .execute("DELETE FROM members WHERE uuid = ?1;", [id.to_string()])?,
            Statement::DeleteGroup(id) => self
                .tx
                .execute("DELETE FROM groups WHERE uuid = ?1;", [id.to_string()])?,
        };

        if changed == 0 {
            return Err(StoreError::MissingRow(*statement));
        }
        Ok(())
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit()?;
        Ok(())
    }

    fn rollback(self: Box<Self>) -> StoreResult<()> {
        self.tx.rollback()?;
        Ok(())
    }
}

fn entity_exists(conn: &Connection, key: EntityKey) -> StoreResult<bool> {
    let sql = match key {
        EntityKey::Group(_) => "SELECT EXISTS(SELECT 1 FROM groups WHERE uuid = ?1);",
        EntityKey::Member(_) => "SELECT EXISTS(SELECT 1 FROM members WHERE uuid = ?1);",
    };
    let exists: i64 = conn.query_row(sql, [key.id().to_string()], |row| row.get(0))?;
    Ok(exists == 1)
}

fn load_links(conn: &Connection, owner: EntityKey) -> StoreResult<BTreeSet<GroupMember>> {
    let sql = match owner {
        EntityKey::Group(_) => {
            "SELECT member_uuid, group_uuid FROM group_members WHERE group_uuid = ?1;"
        }
        EntityKey::Member(_) => {
            "SELECT member_uuid, group_uuid FROM group_members WHERE member_uuid = ?1;"
        }
    };
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([owner.id().to_string()])?;
    let mut links = BTreeSet::new();
    while let Some(row) = rows.next()? {
        let member_text: String = row.get("member_uuid")?;
        let group_text: String = row.get("group_uuid")?;
        links.insert(parse_link(&member_text, &group_text)?);
    }
    Ok(links)
}

fn parse_link(member_text: &str, group_text: &str) -> StoreResult<GroupMember> {
    Ok(GroupMember::new(
        parse_uuid(member_text, "group_members.member_uuid")?,
        parse_uuid(group_text, "group_members.group_uuid")?,
    ))
}

fn parse_uuid(value: &str, column: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}
