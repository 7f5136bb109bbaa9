//! External collaborators of the controller: the chain RPC node, the
//! paymaster relay and the account backend. Each is an async trait with an
//! HTTP implementation and an in-process mock.

pub mod backend;
pub mod backoff;
pub mod chain;
pub mod error;
pub mod mock;
pub mod paymaster;
pub mod rpc;

pub use backend::{BackendApi, DeployStatus, DeployTransaction, HttpBackend};
pub use backoff::PollSchedule;
pub use chain::{
    wait_for_transaction, ChainProvider, TransactionReceipt, TxStatus, WaitOptions,
};
pub use error::{BackendError, PaymasterError, ProviderError};
pub use mock::{MockBackend, MockChainProvider, MockPaymaster, PaymasterMode, RpcEvent};
pub use paymaster::{HttpPaymaster, Paymaster};
pub use rpc::JsonRpcProvider;
