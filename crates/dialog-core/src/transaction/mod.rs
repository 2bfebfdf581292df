//! SIP transaction layer (RFC 3261 §17, RFC 6026)
//!
//! Four state machines live here, one per transaction kind:
//!
//! | Kind | States |
//! |---|---|
//! | [`ClientInviteTransaction`] | Calling → Proceeding → Accepted / Completed → Terminated |
//! | [`ClientNonInviteTransaction`] | Trying → Proceeding → Completed → Terminated |
//! | [`ServerInviteTransaction`] | Proceeding → Accepted / Completed → Confirmed → Terminated |
//! | [`ServerNonInviteTransaction`] | Trying → Proceeding → Completed → Terminated |
//!
//! Transactions are driven synchronously by the user-agent core. Every input
//! (a message, a timer expiry, a response to send) takes an event outbox; the
//! transaction pushes [`TransactionEvent`]s for the core to dispatch after the
//! call returns. Nothing in this module blocks, and nothing calls back into the
//! transaction user directly.
//!
//! Transport failures and timeouts of client transactions are reported as
//! synthetic 503 and 408 responses through the same response events used for
//! real responses, so the transaction user has a single handling path.

pub mod client_invite;
pub mod client_non_invite;
pub mod key;
pub mod server_invite;
pub mod server_non_invite;
pub mod state;
pub mod timer;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sipua_sip_core::{Request, Response, StatusCode};
use tracing::warn;

pub use client_invite::ClientInviteTransaction;
pub use client_non_invite::ClientNonInviteTransaction;
pub use key::TransactionKey;
pub use server_invite::ServerInviteTransaction;
pub use server_non_invite::ServerNonInviteTransaction;
pub use state::TransactionState;
pub use timer::{TimerId, TimerService, TimerSettings, TimerType};
pub use transport::Transport;

use crate::errors::{DialogResult, TransportError};

/// Notifications from a transaction to its transaction user
#[derive(Debug, Clone)]
pub enum TransactionEvent {
    /// 1xx received by a client transaction
    ProvisionalResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// 2xx received by a client transaction (including retransmissions
    /// while an INVITE transaction is Accepted)
    SuccessResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// 3xx-6xx received by a client transaction, or a synthetic 408/503
    FailureResponse {
        transaction_id: TransactionKey,
        response: Response,
    },
    /// A server transaction could not send a response
    TransportError { transaction_id: TransactionKey },
    /// Timer H fired: no ACK for a non-2xx final response
    TransactionTimeout { transaction_id: TransactionKey },
    /// The transaction reached Terminated and may be dropped
    TransactionTerminated { transaction_id: TransactionKey },
}

impl TransactionEvent {
    /// Wraps a client-side response in the event matching its class.
    pub(crate) fn response(transaction_id: TransactionKey, response: Response) -> Self {
        if response.status.is_provisional() {
            TransactionEvent::ProvisionalResponse {
                transaction_id,
                response,
            }
        } else if response.status.is_success() {
            TransactionEvent::SuccessResponse {
                transaction_id,
                response,
            }
        } else {
            TransactionEvent::FailureResponse {
                transaction_id,
                response,
            }
        }
    }
}

/// Kind of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionKind {
    InviteClient,
    NonInviteClient,
    InviteServer,
    NonInviteServer,
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::InviteClient => write!(f, "INVITE client"),
            TransactionKind::NonInviteClient => write!(f, "non-INVITE client"),
            TransactionKind::InviteServer => write!(f, "INVITE server"),
            TransactionKind::NonInviteServer => write!(f, "non-INVITE server"),
        }
    }
}

/// Collaborators shared by every transaction of a core
#[derive(Clone)]
pub struct TransactionContext {
    pub transport: Arc<dyn Transport>,
    pub timers: Arc<dyn TimerService>,
    pub settings: TimerSettings,
}

impl TransactionContext {
    pub fn new(transport: Arc<dyn Transport>, timers: Arc<dyn TimerService>, settings: TimerSettings) -> Self {
        Self {
            transport,
            timers,
            settings,
        }
    }

    pub fn reliable(&self) -> bool {
        self.transport.is_reliable()
    }

    pub(crate) fn send(&self, message: &impl fmt::Display) -> Result<(), TransportError> {
        if !self.transport.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.transport.send(&message.to_string())
    }

    pub(crate) fn schedule(&self, key: &TransactionKey, timer: TimerType, delay: Duration) {
        self.timers.schedule(TimerId::transaction(key, timer), delay);
    }

    pub(crate) fn cancel(&self, key: &TransactionKey, timer: TimerType) {
        self.timers.cancel(&TimerId::transaction(key, timer));
    }

    pub(crate) fn cancel_all(&self, key: &TransactionKey, timers: &[TimerType]) {
        for timer in timers {
            self.cancel(key, *timer);
        }
    }
}

impl fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionContext")
            .field("reliable", &self.transport.is_reliable())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Synthetic response used to report timeouts (408) and transport
/// failures (503) to the transaction user.
pub(crate) fn synthetic_response(request: &Request, status: StatusCode) -> Response {
    Response::from_request(request, status, None)
}

/// A client transaction of either kind
#[derive(Debug)]
pub enum ClientTransaction {
    Invite(ClientInviteTransaction),
    NonInvite(ClientNonInviteTransaction),
}

impl ClientTransaction {
    pub fn key(&self) -> &TransactionKey {
        match self {
            ClientTransaction::Invite(tx) => tx.key(),
            ClientTransaction::NonInvite(tx) => tx.key(),
        }
    }

    pub fn state(&self) -> TransactionState {
        match self {
            ClientTransaction::Invite(tx) => tx.state(),
            ClientTransaction::NonInvite(tx) => tx.state(),
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            ClientTransaction::Invite(_) => TransactionKind::InviteClient,
            ClientTransaction::NonInvite(_) => TransactionKind::NonInviteClient,
        }
    }

    pub fn request(&self) -> &Request {
        match self {
            ClientTransaction::Invite(tx) => tx.request(),
            ClientTransaction::NonInvite(tx) => tx.request(),
        }
    }

    pub fn receive_response(&mut self, response: Response, events: &mut Vec<TransactionEvent>) {
        match self {
            ClientTransaction::Invite(tx) => tx.receive_response(response, events),
            ClientTransaction::NonInvite(tx) => tx.receive_response(response, events),
        }
    }

    pub fn handle_timer(&mut self, timer: TimerType, events: &mut Vec<TransactionEvent>) {
        match self {
            ClientTransaction::Invite(tx) => tx.handle_timer(timer, events),
            ClientTransaction::NonInvite(tx) => tx.handle_timer(timer, events),
        }
    }

    /// Cancels all timers and marks the transaction terminated without
    /// notifying anyone.
    pub fn dispose(&mut self) {
        match self {
            ClientTransaction::Invite(tx) => tx.dispose(),
            ClientTransaction::NonInvite(tx) => tx.dispose(),
        }
    }
}

/// A server transaction of either kind
#[derive(Debug)]
pub enum ServerTransaction {
    Invite(ServerInviteTransaction),
    NonInvite(ServerNonInviteTransaction),
}

impl ServerTransaction {
    pub fn key(&self) -> &TransactionKey {
        match self {
            ServerTransaction::Invite(tx) => tx.key(),
            ServerTransaction::NonInvite(tx) => tx.key(),
        }
    }

    pub fn state(&self) -> TransactionState {
        match self {
            ServerTransaction::Invite(tx) => tx.state(),
            ServerTransaction::NonInvite(tx) => tx.state(),
        }
    }

    pub fn kind(&self) -> TransactionKind {
        match self {
            ServerTransaction::Invite(_) => TransactionKind::InviteServer,
            ServerTransaction::NonInvite(_) => TransactionKind::NonInviteServer,
        }
    }

    pub fn request(&self) -> &Request {
        match self {
            ServerTransaction::Invite(tx) => tx.request(),
            ServerTransaction::NonInvite(tx) => tx.request(),
        }
    }

    /// Handles a retransmitted request (or an ACK for a non-2xx response).
    /// Never reaches the transaction user.
    pub fn receive_request(&mut self, request: Request, events: &mut Vec<TransactionEvent>) {
        match self {
            ServerTransaction::Invite(tx) => tx.receive_request(request, events),
            ServerTransaction::NonInvite(tx) => tx.receive_request(request, events),
        }
    }

    pub fn send_response(&mut self, response: Response, events: &mut Vec<TransactionEvent>) -> DialogResult<()> {
        match self {
            ServerTransaction::Invite(tx) => tx.send_response(response, events),
            ServerTransaction::NonInvite(tx) => tx.send_response(response, events),
        }
    }

    pub fn handle_timer(&mut self, timer: TimerType, events: &mut Vec<TransactionEvent>) {
        match self {
            ServerTransaction::Invite(tx) => tx.handle_timer(timer, events),
            ServerTransaction::NonInvite(tx) => tx.handle_timer(timer, events),
        }
    }

    pub fn dispose(&mut self) {
        match self {
            ServerTransaction::Invite(tx) => tx.dispose(),
            ServerTransaction::NonInvite(tx) => tx.dispose(),
        }
    }
}

pub(crate) fn log_transport_failure(key: &TransactionKey, error: &TransportError) {
    warn!(transaction = %key, %error, "transport failure, terminating transaction");
}
