//! Core of memberlink: group/member link reconciliation over SQLite.
//! This crate owns the identity registry, the link diff engine and the
//! flush coordinator; callers only declare link sets and flush.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod session;

pub use config::CoreConfig;
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::entity::{
    EntityKey, EntityKind, EntitySnapshot, Group, GroupId, GroupMember, Member, MemberId,
};
pub use repo::entity_store::{EntityStore, Statement, StoreError, StoreResult, StoreTransaction};
pub use repo::sqlite_store::SqliteEntityStore;
pub use session::diff::{diff_links, LinkChange, LinkDelta};
pub use session::identity::{IdentityRegistry, Lifecycle, RegistryError};
pub use session::unit_of_work::{FlushReport, UnitOfWork, UnitState, UowError, UowResult};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
