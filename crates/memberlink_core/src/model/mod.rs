//! Domain model for groups, members and their join entity.
//!
//! # Responsibility
//! - Define the canonical records shared by the store and the unit of work.
//! - Give every persisted object a type-tagged, stable identity.
//!
//! # Invariants
//! - `Group` and `Member` are identified by a stable UUID.
//! - A `GroupMember` link is identified only by its `(member, group)` pair.

pub mod entity;
