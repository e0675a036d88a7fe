//! Embedded schema steps for the link store.
//!
//! Each step is numbered; the highest number applied so far is kept in
//! `PRAGMA user_version`. Opening a database written by a newer build fails
//! instead of guessing at its layout.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::{Connection, Transaction};

/// Numbered SQL batches in apply order.
const SCHEMA_STEPS: &[(u32, &str)] = &[(1, include_str!("0001_init.sql"))];

/// Highest schema step this build can apply.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |&(version, _)| version)
}

/// Brings `conn` up to [`latest_version`].
///
/// Steps above the stored version run inside a single transaction, so a
/// failing batch leaves the database at its previous version.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let stored = stored_version(conn)?;
    let target = latest_version();
    if stored > target {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: stored,
            latest_supported: target,
        });
    }
    if stored == target {
        return Ok(());
    }

    let tx = conn.transaction()?;
    for &(version, sql) in SCHEMA_STEPS.iter().skip_while(|&&(v, _)| v <= stored) {
        run_step(&tx, version, sql)?;
    }
    tx.commit()?;

    info!("event=db_migrate module=db status=ok from_version={stored} to_version={target}");
    Ok(())
}

fn run_step(tx: &Transaction<'_>, version: u32, sql: &str) -> DbResult<()> {
    tx.execute_batch(sql)?;
    tx.pragma_update(None, "user_version", version)?;
    Ok(())
}

fn stored_version(conn: &Connection) -> DbResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}
