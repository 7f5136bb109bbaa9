//! Origin-scoped session policies.
//!
//! A session is the set of (contract, method) pairs the user allowed one
//! origin to call without further prompts. Policy comparisons are
//! structural: canonical target address plus method name.

pub mod store;

pub use store::{
    diff, SessionError, SessionPolicyStore, SessionSettings, DEFAULT_SENSITIVE_METHODS,
    DEFAULT_SESSION_TTL,
};
