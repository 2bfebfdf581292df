//! re-INVITE, ACK and PRACK handling
//!
//! A re-INVITE is admitted only when no other INVITE transaction of the
//! dialog is unfinished. Collisions with our own outstanding re-INVITE get
//! 491 (RFC 3261 §14.2); the race conditions of RFC 5407 (ACK not yet
//! received or still being processed, re-INVITE still being answered) get
//! the configured race reply with a random `Retry-After`.

use sipua_sip_core::{HeaderName, Method, RAck, Request, SipMessage, StatusCode};
use tracing::{debug, trace, warn};

use crate::dialog::{AckTarget, Admission, DialogId, PendingReinvite};
use crate::manager::utils::retry_after;
use crate::manager::UserAgentCore;
use crate::transaction::{TimerId, TimerType, TransactionKey, TransactionState};
use crate::user_agent::{AckProcessing, IncomingRequest, RequestKind, ResponseOptions};

impl UserAgentCore {
    pub(crate) fn receive_reinvite(&mut self, dialog: DialogId, key: TransactionKey) {
        let Some(session) = self.dialogs.get_mut(&dialog) else {
            return;
        };
        match session.admit_reinvite() {
            Admission::Race => {
                self.reply_race(&key, "re-INVITE");
                return;
            }
            Admission::Pending => {
                warn!(%dialog, "re-INVITE collides with our own outstanding offer, replying 491 (RFC 3261 §14.2)");
                self.reply_status(&key, StatusCode::REQUEST_PENDING);
                return;
            }
            Admission::Accept => {}
        }

        let Some(request) = self.servers.get(&key).map(|server| server.request().clone()) else {
            return;
        };
        let Ok(cseq) = request.cseq() else {
            return;
        };
        let Some(session) = self.dialogs.get_mut(&dialog) else {
            return;
        };
        session.reinvite_uas = Some(PendingReinvite {
            transaction: key.clone(),
            seq: cseq.seq,
            accepted: false,
        });
        session.apply_incoming(request.session_body());
        self.deliver_to_session(&dialog, &key, &RequestKind::ReInvite);
    }

    /// Replies to a request that lost an RFC 5407 race.
    pub(crate) fn reply_race(&mut self, key: &TransactionKey, what: &str) {
        let policy = self.config.race_policy.clone();
        let seconds = retry_after(policy.retry_after());
        warn!(
            transaction = %key,
            status = policy.status,
            seconds,
            "{what} refused: the 2xx ACK is outstanding or being processed, or the previous offer is still unanswered (RFC 5407)"
        );
        self.send_reply(
            key,
            ResponseOptions::new(policy.status_code()).with_header(HeaderName::RetryAfter, seconds.to_string()),
        );
    }

    /// ACK handling (RFC 3261 §17.2.1, §13.3.1.4).
    ///
    /// An ACK for a non-2xx final response belongs to the INVITE server
    /// transaction. An ACK for a 2xx is end-to-end: it is matched to the
    /// dialog by CSeq and stops the 2xx retransmissions.
    pub(crate) fn receive_ack(&mut self, request: Request) {
        if let Some(key) = TransactionKey::from_request(&request) {
            if let Some(server) = self.servers.get_mut(&key) {
                if server.state() != TransactionState::Accepted {
                    let mut events = Vec::new();
                    server.transaction_mut().receive_request(request, &mut events);
                    self.dispatch(events);
                    return;
                }
            }
        }

        let Some(dialog) = DialogId::for_incoming_request(&request) else {
            trace!("dropping ACK without dialog tags");
            return;
        };
        let Ok(cseq) = request.cseq() else {
            return;
        };
        let Some(session) = self.dialogs.get_mut(&dialog) else {
            debug!(%dialog, "dropping ACK for unknown dialog");
            return;
        };
        match session.match_ack(cseq.seq) {
            Some(AckTarget::Initial) => session.ack_wait = false,
            Some(AckTarget::ReInvite) => session.reinvite_uas = None,
            None => {
                debug!(%dialog, seq = cseq.seq, "dropping ACK matching no accepted INVITE");
                return;
            }
        }
        self.ctx
            .timers
            .cancel(&TimerId::dialog(&dialog, TimerType::Invite2xxRetransmit));

        session.apply_incoming(request.session_body());
        if session.signaling().offer_outstanding() {
            warn!(%dialog, state = %session.signaling_state(), "ACK left an offer unanswered");
        }
        session.ack_processing = true;
        debug!(%dialog, seq = cseq.seq, "ACK received");

        let branch = request.branch().unwrap_or_default();
        let incoming = IncomingRequest {
            transaction: TransactionKey::new(branch, Method::Ack, true),
            request,
            dialog: Some(dialog.clone()),
        };
        let processing = self
            .with_session_delegate(&dialog, |delegate, core| delegate.on_ack(core, &incoming))
            .unwrap_or_default();
        if processing == AckProcessing::Complete {
            if let Some(session) = self.dialogs.get_mut(&dialog) {
                session.ack_processing = false;
            }
        }
    }

    /// PRACK handling (RFC 3262 §3). A PRACK whose RAck does not match the
    /// outstanding reliable provisional gets 481.
    pub(crate) fn receive_prack(&mut self, dialog: DialogId, key: TransactionKey) {
        let Some(request) = self.servers.get(&key).map(|server| server.request().clone()) else {
            return;
        };
        let rack = request
            .header(&HeaderName::RAck)
            .and_then(|value| value.parse::<RAck>().ok());
        let Some(session) = self.dialogs.get_mut(&dialog) else {
            return;
        };

        let matches = match (&rack, &session.reliable) {
            (Some(rack), Some(pending)) => {
                rack.rseq == pending.rseq
                    && rack.method == Method::Invite
                    && pending.response.cseq().is_ok_and(|cseq| cseq.seq == rack.cseq)
            }
            _ => false,
        };
        if !matches {
            debug!(%dialog, ?rack, "PRACK matches no reliable provisional");
            self.reply_status(&key, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST);
            return;
        }

        session.reliable = None;
        self.ctx
            .timers
            .cancel(&TimerId::dialog(&dialog, TimerType::ReliableProvisional));
        session.apply_incoming(request.session_body());
        self.deliver_to_session(&dialog, &key, &RequestKind::Prack);
    }
}
