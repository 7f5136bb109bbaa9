//! The account controller handed to an embedding app.
//!
//! [`Controller`] ties the pieces together: it connects an account through
//! the backend, keeps its deployment state in sync, grants origin sessions
//! and runs call batches through the execution coordinator. Interactive
//! steps hand off through an owned callback registry, and headless callers
//! wait on out-of-band approvals instead.

pub mod builder;
pub mod controller;
pub mod error;
pub mod telemetry;


pub use builder::{
    open_storage, BuilderError, ControllerBuilder, ControllerSettings, JsonRpcProviders,
    ProviderFactory,
};
pub use controller::{
    ConnectOutcome, Controller, HeadlessConnectResponse, ProbeResponse, SessionRequest,
    SESSION_ROUTE,
};
pub use error::ControllerError;
pub use telemetry::{init_from_config, init_tracing, CorrelationId, ExecutionSpan, TelemetryError};
