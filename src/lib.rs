//! Non-custodial account controller.
//!
//! Re-exports the [`Controller`] facade and the component crates it is
//! assembled from.

pub use keychain_controller::*;

pub use keychain_account as account;
pub use keychain_callbacks as callbacks;
pub use keychain_config as config;
pub use keychain_executor as executor;
pub use keychain_provider as provider;
pub use keychain_session as session;
pub use keychain_signer as signer;
pub use keychain_store as store;
pub use keychain_types as types;
