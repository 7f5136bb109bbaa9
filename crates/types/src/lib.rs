pub mod account;
pub mod call;
pub mod credential;
pub mod execution;
pub mod felt;
pub mod policy;
pub mod response;

pub use account::*;
pub use call::*;
pub use credential::*;
pub use execution::*;
pub use felt::*;
pub use policy::*;
pub use response::*;

/// Version tag of the persisted key layout
pub const STORAGE_VERSION: &str = "0.0.3";
