//! Per-account, per-chain deployment and registration state.

pub mod error;
pub mod nonce;
pub mod state;

pub use error::AccountError;
pub use nonce::NonceCache;
pub use state::{AccountSettings, AccountState, SyncOutcome, PLUGIN_KEY_ENTRYPOINT, SYNC_DEBOUNCE};
