use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle of the underlying dialog (RFC 3261 §12)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DialogState {
    /// Created by a provisional response with a To tag
    Early,
    /// Created or confirmed by a 2xx
    Confirmed,
    /// Disposed; no further requests may be sent or accepted
    Terminated,
}

impl fmt::Display for DialogState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialogState::Early => write!(f, "Early"),
            DialogState::Confirmed => write!(f, "Confirmed"),
            DialogState::Terminated => write!(f, "Terminated"),
        }
    }
}

/// Session lifecycle of an INVITE dialog.
///
/// Never stored; [`crate::dialog::SessionDialog::session_state`] derives it
/// from the dialog state, the ACK wait flag and the signaling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Early,
    /// The UAS sent a 2xx and is waiting for the ACK
    AckWait,
    Confirmed,
    Terminated,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Early => write!(f, "Early"),
            SessionState::AckWait => write!(f, "AckWait"),
            SessionState::Confirmed => write!(f, "Confirmed"),
            SessionState::Terminated => write!(f, "Terminated"),
        }
    }
}
