//! Unit-of-work session over an entity store.
//!
//! # Responsibility
//! - Track loaded entities per unit of work (`identity`).
//! - Compute link deltas as a pure function (`diff`).
//! - Batch and apply deltas transactionally (`unit_of_work`).
//!
//! # Invariants
//! - Nothing reaches the store outside `UnitOfWork::flush`.
//! - A flush applies all of its statements or none of them.

pub mod diff;
pub mod identity;
pub mod unit_of_work;
