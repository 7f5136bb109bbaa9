//! Persistence for controller state.
//!
//! Everything the controller remembers (accounts, sessions, deployment
//! status, cached registrations, nonces) lives in a single string-valued
//! key-value store under a versioned key namespace. See [`keys`] for the
//! layout and [`migration`] for upgrades between layout versions.

pub mod keys;
pub mod migration;
pub mod sqlite_store;
pub mod storage;
pub mod store;

pub use migration::{migrate, MigrationOutcome};
pub use sqlite_store::SqliteStore;
pub use storage::Storage;
pub use store::{InMemoryStore, KeyValueStore, StoreError};
