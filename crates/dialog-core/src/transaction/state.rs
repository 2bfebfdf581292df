use std::fmt;

use serde::{Deserialize, Serialize};

/// Represents the state of a SIP transaction, aligned with the state machines
/// defined in RFC 3261 §17 and the RFC 6026 `Accepted` state.
///
/// Which subset is reachable depends on the transaction kind:
///
/// - client INVITE: Calling → Proceeding → {Accepted | Completed} → Terminated
/// - client non-INVITE: Trying → Proceeding → Completed → Terminated
/// - server INVITE: Proceeding → {Accepted | Completed → Confirmed} → Terminated
/// - server non-INVITE: Trying → Proceeding → Completed → Terminated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionState {
    /// Client INVITE sent, nothing received yet
    Calling,
    /// Non-INVITE request sent (client) or received (server), no response yet
    Trying,
    /// Provisional response received (client) or sent (server)
    Proceeding,
    /// 2xx to INVITE received (client) or sent (server); the dialog layer
    /// owns ACK and 2xx retransmission while the transaction lingers
    Accepted,
    /// Final response received (client) or sent (server), absorbing
    /// retransmissions
    Completed,
    /// ACK for a non-2xx final response received (server INVITE only)
    Confirmed,
    /// Finished; the owning registry drops the transaction
    Terminated,
}

impl TransactionState {
    pub fn is_terminated(&self) -> bool {
        *self == TransactionState::Terminated
    }

    /// No final response seen yet
    pub fn is_pending(&self) -> bool {
        matches!(
            self,
            TransactionState::Calling | TransactionState::Trying | TransactionState::Proceeding
        )
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionState::Calling => "Calling",
            TransactionState::Trying => "Trying",
            TransactionState::Proceeding => "Proceeding",
            TransactionState::Accepted => "Accepted",
            TransactionState::Completed => "Completed",
            TransactionState::Confirmed => "Confirmed",
            TransactionState::Terminated => "Terminated",
        };
        f.write_str(name)
    }
}
