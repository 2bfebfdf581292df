//! Delegate traits through which the core reports to the application
//!
//! Every callback receives the core itself, so a delegate can answer
//! synchronously (send the ACK, reply to the request, start a BYE) without
//! holding a handle of its own. The core removes a delegate from its slot
//! for the duration of the call and puts it back afterwards.
//!
//! Methods returning `bool` report whether the delegate took responsibility
//! for the request. `false` (the default) lets the core send its default
//! reply.

use sipua_sip_core::{Method, SipMessage};
use tracing::warn;

use super::{IncomingRequest, IncomingResponse};
use crate::manager::UserAgentCore;
use crate::transaction::TransactionKey;

/// Result of handing an ACK to the session delegate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckProcessing {
    /// Processing finished during the callback
    #[default]
    Complete,
    /// Processing continues asynchronously; the dialog rejects re-INVITEs
    /// until [`UserAgentCore::complete_ack_processing`] is called
    Pending,
}

/// Response callbacks for a request we sent, one per response class
pub trait OutgoingRequestDelegate: Send {
    fn on_trying(&mut self, _core: &mut UserAgentCore, _response: &IncomingResponse) {}

    fn on_progress(&mut self, _core: &mut UserAgentCore, _response: &IncomingResponse) {}

    /// Called for every 2xx that is not a retransmission. For INVITE the
    /// default sends the ACK without a body.
    fn on_accept(&mut self, core: &mut UserAgentCore, response: &IncomingResponse) {
        let is_invite = response
            .response
            .cseq()
            .is_ok_and(|cseq| cseq.method == Method::Invite);
        if let (true, Some(dialog)) = (is_invite, &response.dialog) {
            if let Err(error) = core.ack(dialog, None) {
                warn!(%dialog, %error, "failed to acknowledge 2xx");
            }
        }
    }

    fn on_redirect(&mut self, _core: &mut UserAgentCore, _response: &IncomingResponse) {}

    fn on_reject(&mut self, _core: &mut UserAgentCore, _response: &IncomingResponse) {}
}

/// Receives requests that arrive outside of any dialog
pub trait UserAgentCoreDelegate: Send {
    fn on_invite(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_message(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_notify(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_options(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_refer(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_register(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_subscribe(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_publish(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }
}

/// Receives in-dialog requests for one session dialog
pub trait SessionDelegate: Send {
    /// An ACK confirmed our 2xx
    fn on_ack(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> AckProcessing {
        AckProcessing::Complete
    }

    /// No ACK arrived for our 2xx. Returning `false` lets the core send BYE
    /// and dispose the dialog.
    fn on_ack_timeout(&mut self, _core: &mut UserAgentCore, _transaction: &TransactionKey) -> bool {
        false
    }

    /// The dialog is disposed after this returns, whatever the answer.
    fn on_bye(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_info(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    /// re-INVITE admitted past glare checks
    fn on_invite(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_message(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_notify(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_prack(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_refer(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }

    fn on_update(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> bool {
        false
    }
}

/// Per-request notifications for a server transaction
pub trait IncomingRequestDelegate: Send {
    /// The request was cancelled; the core has already answered it with 487
    fn on_cancel(&mut self, _core: &mut UserAgentCore, _cancel: &IncomingRequest) {}

    /// A response to the request could not be sent
    fn on_transport_error(&mut self, _core: &mut UserAgentCore, _transaction: &TransactionKey) {}
}
