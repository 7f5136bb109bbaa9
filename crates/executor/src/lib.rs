//! Transaction execution for a controller account.
//!
//! [`ExecutionCoordinator`] runs one batch at a time: it checks the calls
//! against the origin's session, tries a sponsored outside execution first,
//! falls back to a self-paid invoke, and keeps the local nonce cache ahead of
//! the chain while confirmations are pending.

pub mod coordinator;
pub mod error;

#[cfg(test)]
mod tests;

pub use coordinator::{
    ExecuteOptions, ExecutionCoordinator, ExecutionOutcome, ExecutionPath, ExecutionStage,
    ExecutorSettings, PendingExecution, DEFAULT_FEE_MULTIPLIER, OUTSIDE_EXECUTION_WINDOW,
    REGISTRATION_ENTRYPOINT,
};
pub use error::ExecutionError;
