//! Request correlation for flows that do not complete in-process.
//!
//! [`CallbackRegistry`] pairs a waiter with whatever view eventually settles
//! the request, by id. [`HeadlessApprovals`] lets a non-interactive caller
//! block on an approval given out of band, bounded by a fixed TTL.

pub mod error;
pub mod headless;
pub mod navigation;
pub mod registry;

pub use error::{ApprovalError, CallbackError};
pub use headless::{HeadlessApprovalRequest, HeadlessApprovals, HEADLESS_APPROVAL_TTL};
pub use navigation::{navigation_target, parse_navigation_target, NavigationTarget};
pub use registry::{CallbackId, CallbackReceiver, CallbackRegistry, Callbacks, OnCancel};
