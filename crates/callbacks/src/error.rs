use keychain_types::{ErrorCode, StructuredError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallbackError {
    #[error("no callbacks stored under id {0}")]
    UnknownId(u64),

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("request cancelled")]
    Cancelled,

    /// Callbacks were cleaned up without being settled
    #[error("callbacks dropped before completion")]
    Dropped,

    #[error("invalid navigation target: {0}")]
    InvalidTarget(String),
}

impl CallbackError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CallbackError::Rejected(_) | CallbackError::Cancelled | CallbackError::Dropped => {
                ErrorCode::UserCancelled
            }
            CallbackError::UnknownId(_) | CallbackError::InvalidTarget(_) => {
                ErrorCode::InvalidRequest
            }
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        StructuredError::new(self.error_code(), self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApprovalError {
    #[error("headless approval {id} already pending")]
    AlreadyPending { id: String },

    #[error("unknown headless approval request: {0}")]
    NotFound(String),

    #[error("headless approval {0} expired")]
    Expired(String),

    #[error("headless approval rejected: {reason}")]
    Rejected { reason: String },

    #[error("headless approval dropped")]
    Dropped,
}

impl ApprovalError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ApprovalError::Expired(_) => ErrorCode::Timeout,
            ApprovalError::Rejected { .. } | ApprovalError::Dropped => ErrorCode::UserCancelled,
            ApprovalError::AlreadyPending { .. } | ApprovalError::NotFound(_) => {
                ErrorCode::InvalidRequest
            }
        }
    }

    pub fn to_structured(&self) -> StructuredError {
        StructuredError::new(self.error_code(), self.to_string())
    }
}
