use thiserror::Error;

use crate::dialog::DialogId;
use crate::transaction::TransactionKey;
use crate::user_agent::OutgoingRequestId;

/// Result type for dialog-core operations
pub type DialogResult<T> = Result<T, DialogError>;

/// Errors returned by the user-agent core
///
/// Protocol failures on inbound traffic never show up here: they are turned
/// into SIP responses or state transitions. A `DialogError` means the caller
/// asked for something the current state does not allow, or referenced a
/// handle that no longer exists.
#[derive(Error, Debug, Clone)]
pub enum DialogError {
    /// SIP protocol rule violated by the caller
    #[error("Protocol error: {message}")]
    ProtocolError { message: String },

    /// Operation not allowed in the current state
    #[error("Invalid state: {message}")]
    InvalidState { message: String },

    /// Offer/answer or re-INVITE admission refused (glare)
    #[error("Request pending: {message}")]
    RequestPending { message: String },

    /// Dialog handle unknown or already disposed
    #[error("Dialog not found: {id}")]
    DialogNotFound { id: DialogId },

    /// Transaction handle unknown or already terminated
    #[error("Transaction not found: {key}")]
    TransactionNotFound { key: TransactionKey },

    /// Outgoing request handle unknown
    #[error("Request not found: {id}")]
    RequestNotFound { id: OutgoingRequestId },

    /// Transport refused a message
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Session-description handler failed
    #[error("Session description error: {0}")]
    Description(#[from] DescriptionError),

    /// Digest authentication could not be performed
    #[error("Authentication error: {message}")]
    AuthenticationError { message: String },

    /// Message model error
    #[error("SIP message error: {0}")]
    Message(#[from] sipua_sip_core::Error),

    /// Configuration rejected by validation
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Driver task is gone
    #[error("User agent stopped")]
    Stopped,

    /// Internal invariant broken
    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl DialogError {
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    pub fn request_pending(message: impl Into<String>) -> Self {
        Self::RequestPending {
            message: message.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    pub fn authentication_error(message: impl Into<String>) -> Self {
        Self::AuthenticationError {
            message: message.into(),
        }
    }
}

/// Error reported by the transport collaborator
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("transport closed")]
    Closed,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Error reported by a session-description handler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DescriptionError {
    #[error("failed to create description: {0}")]
    CreateFailed(String),

    #[error("failed to apply description: {0}")]
    SetFailed(String),

    #[error("unsupported content type {0}")]
    UnsupportedContentType(String),

    #[error("rollback failed: {0}")]
    RollbackFailed(String),

    #[error("session description handler closed")]
    Closed,
}
