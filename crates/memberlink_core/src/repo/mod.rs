//! Persistence contracts and their SQLite implementation.
//!
//! # Responsibility
//! - Define the entity store contract consumed by the unit of work.
//! - Isolate SQLite query details from reconciliation logic.
//!
//! # Invariants
//! - Every mutation runs inside a `StoreTransaction`.
//! - Store APIs return semantic errors (`MissingRow`) in addition to DB
//!   transport errors.

pub mod entity_store;
pub mod sqlite_store;
