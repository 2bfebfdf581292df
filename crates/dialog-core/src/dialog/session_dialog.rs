//! INVITE dialog usage
//!
//! [`SessionDialog`] wraps a [`Dialog`] with everything an INVITE session
//! adds on top: the offer/answer machine, the ACK wait after a 2xx, the
//! outstanding re-INVITE and UPDATE transactions in each direction and the
//! reliable provisional bookkeeping of RFC 3262.
//!
//! The struct only holds state and answers admission questions. Sending
//! messages and scheduling timers is left to the user-agent core, which owns
//! the transactions the dialog refers to.
//!
//! ## Admission of requests that carry or may carry offers
//!
//! | Incoming | Condition | Outcome |
//! |---|---|---|
//! | re-INVITE | initial 2xx not ACKed, or ACK still being processed | race (500 + Retry-After) |
//! | re-INVITE | our own re-INVITE server transaction still pending | race |
//! | re-INVITE | our re-INVITE client transaction outstanding | 491 |
//! | UPDATE | an UPDATE server transaction still pending | race |
//! | UPDATE with offer | we have an offer outstanding | 491 |
//! | UPDATE with offer | the peer has an offer outstanding | race |

use std::fmt;
use std::time::Duration;

use sipua_sip_core::{Body, Request, Response, SipMessage};
use tracing::{debug, trace};

use super::dialog_id::DialogId;
use super::dialog_impl::Dialog;
use super::dialog_state::SessionState;
use super::signaling::{Direction, OfferAnswer, SignalingState};
use crate::errors::{DialogError, DialogResult};
use crate::transaction::TransactionKey;
use crate::user_agent::{OutgoingRequestId, SessionDelegate};

/// Decision for an incoming re-INVITE or UPDATE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Reject with the race-condition policy (RFC 5407)
    Race,
    /// Reject with 491 Request Pending (RFC 3261 §14.2)
    Pending,
}

/// Which INVITE an incoming ACK confirms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckTarget {
    Initial,
    ReInvite,
}

/// An incoming re-INVITE we have not finished with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReinvite {
    pub transaction: TransactionKey,
    pub seq: u32,
    /// A 2xx was sent; waiting for the ACK
    pub accepted: bool,
}

/// A reliable provisional response waiting for its PRACK
#[derive(Debug, Clone)]
pub struct PendingReliable {
    pub response: Response,
    pub rseq: u32,
    pub transaction: TransactionKey,
    pub interval: Duration,
    pub elapsed: Duration,
}

pub struct SessionDialog {
    dialog: Dialog,
    signaling: OfferAnswer,
    initial_invite_seq: u32,
    pub(crate) ack_wait: bool,
    pub(crate) ack_processing: bool,
    /// Server transaction of the INVITE that formed the dialog (UAS side)
    pub(crate) initial_transaction: Option<TransactionKey>,
    pub(crate) reinvite_uac: Option<OutgoingRequestId>,
    pub(crate) reinvite_uas: Option<PendingReinvite>,
    pub(crate) update_uac: Option<OutgoingRequestId>,
    pub(crate) update_uas: Option<TransactionKey>,
    /// CSeq of a 2xx we still have to ACK
    pub(crate) invite_seq_to_ack: Option<u32>,
    /// CSeq of the last INVITE we ACKed, and the ACK itself, for 2xx
    /// retransmissions
    pub(crate) acked_seq: Option<u32>,
    pub(crate) last_ack: Option<Request>,
    pub(crate) retransmit_interval: Duration,
    pub(crate) reliable: Option<PendingReliable>,
    local_rseq: u32,
    remote_rseq: Option<u32>,
    pub(crate) delegate: Option<Box<dyn SessionDelegate>>,
}

impl SessionDialog {
    pub fn new(dialog: Dialog, initial_invite_seq: u32, initial_rseq: u32) -> Self {
        Self {
            dialog,
            signaling: OfferAnswer::new(),
            initial_invite_seq,
            ack_wait: false,
            ack_processing: false,
            initial_transaction: None,
            reinvite_uac: None,
            reinvite_uas: None,
            update_uac: None,
            update_uas: None,
            invite_seq_to_ack: None,
            acked_seq: None,
            last_ack: None,
            retransmit_interval: Duration::ZERO,
            reliable: None,
            local_rseq: initial_rseq,
            remote_rseq: None,
            delegate: None,
        }
    }

    pub fn id(&self) -> &DialogId {
        self.dialog.id()
    }

    pub fn dialog(&self) -> &Dialog {
        &self.dialog
    }

    pub fn dialog_mut(&mut self) -> &mut Dialog {
        &mut self.dialog
    }

    pub fn signaling(&self) -> &OfferAnswer {
        &self.signaling
    }

    pub fn signaling_state(&self) -> SignalingState {
        self.signaling.state()
    }

    pub fn initial_invite_seq(&self) -> u32 {
        self.initial_invite_seq
    }

    pub fn has_delegate(&self) -> bool {
        self.delegate.is_some()
    }

    pub fn session_state(&self) -> SessionState {
        if self.dialog.is_terminated() || self.signaling.state() == SignalingState::Closed {
            SessionState::Terminated
        } else if self.dialog.is_early() {
            SessionState::Early
        } else if self.ack_wait {
            SessionState::AckWait
        } else {
            SessionState::Confirmed
        }
    }

    /// Server transaction whose 2xx is being retransmitted until ACKed
    pub fn awaiting_ack(&self) -> Option<&TransactionKey> {
        if self.ack_wait {
            return self.initial_transaction.as_ref();
        }
        self.reinvite_uas
            .as_ref()
            .filter(|pending| pending.accepted)
            .map(|pending| &pending.transaction)
    }

    pub(crate) fn apply_incoming(&mut self, body: Option<&Body>) -> SignalingState {
        self.signaling.transition(Direction::Incoming, body)
    }

    pub(crate) fn apply_outgoing(&mut self, body: Option<&Body>) -> SignalingState {
        self.signaling.transition(Direction::Outgoing, body)
    }

    pub(crate) fn rollback(&mut self) -> SignalingState {
        self.signaling.rollback()
    }

    pub fn admit_reinvite(&self) -> Admission {
        if self.ack_wait || self.ack_processing {
            return Admission::Race;
        }
        if self.reinvite_uas.is_some() {
            return Admission::Race;
        }
        if self.reinvite_uac.is_some() {
            return Admission::Pending;
        }
        Admission::Accept
    }

    pub fn admit_update(&self, request: &Request) -> Admission {
        if self.update_uas.is_some() {
            return Admission::Race;
        }
        if request.session_body().is_none() {
            return Admission::Accept;
        }
        match self.signaling.state() {
            SignalingState::HaveLocalOffer => Admission::Pending,
            SignalingState::HaveRemoteOffer => Admission::Race,
            _ => Admission::Accept,
        }
    }

    /// Checks that we may start a re-INVITE now.
    pub fn check_outgoing_reinvite(&self, body: Option<&Body>) -> DialogResult<()> {
        if self.dialog.is_early() {
            return Err(DialogError::invalid_state("re-INVITE in an early dialog"));
        }
        if self.ack_wait || self.reinvite_uac.is_some() || self.reinvite_uas.is_some() {
            return Err(DialogError::request_pending("an INVITE transaction is already in progress"));
        }
        self.check_offer_allowed(body)
    }

    /// Checks that we may start an UPDATE now.
    pub fn check_outgoing_update(&self, body: Option<&Body>) -> DialogResult<()> {
        if self.update_uac.is_some() {
            return Err(DialogError::request_pending("an UPDATE is already in progress"));
        }
        self.check_offer_allowed(body)
    }

    fn check_offer_allowed(&self, body: Option<&Body>) -> DialogResult<()> {
        let carries_offer = body.is_some_and(Body::is_session);
        if carries_offer && self.signaling.offer_outstanding() {
            return Err(DialogError::request_pending(format!(
                "offer outstanding in state {}",
                self.signaling.state()
            )));
        }
        Ok(())
    }

    /// Matches an incoming ACK against the INVITE we are waiting on.
    pub fn match_ack(&self, seq: u32) -> Option<AckTarget> {
        if self.ack_wait && seq == self.initial_invite_seq {
            return Some(AckTarget::Initial);
        }
        match &self.reinvite_uas {
            Some(pending) if pending.accepted && pending.seq == seq => Some(AckTarget::ReInvite),
            _ => None,
        }
    }

    /// RSeq ordering for reliable provisionals we receive (RFC 3262 §4):
    /// the first is accepted as is, later ones must be exactly one higher.
    pub fn accept_remote_rseq(&mut self, rseq: u32) -> bool {
        match self.remote_rseq {
            Some(last) if rseq != last.wrapping_add(1) => {
                debug!(dialog = %self.id(), rseq, last, "dropping out of sequence reliable provisional");
                false
            }
            _ => {
                self.remote_rseq = Some(rseq);
                true
            }
        }
    }

    pub(crate) fn next_local_rseq(&mut self) -> u32 {
        self.local_rseq = self.local_rseq.wrapping_add(1);
        self.local_rseq
    }

    pub(crate) fn terminate(&mut self) {
        trace!(dialog = %self.id(), "terminating session dialog");
        self.dialog.terminate();
        self.signaling.close();
        self.ack_wait = false;
        self.ack_processing = false;
        self.reinvite_uac = None;
        self.reinvite_uas = None;
        self.update_uac = None;
        self.update_uas = None;
        self.reliable = None;
    }
}

impl fmt::Debug for SessionDialog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionDialog")
            .field("id", self.id())
            .field("session_state", &self.session_state())
            .field("signaling_state", &self.signaling.state())
            .field("ack_processing", &self.ack_processing)
            .field("reinvite_uac", &self.reinvite_uac)
            .field("reinvite_uas", &self.reinvite_uas)
            .field("update_uac", &self.update_uac)
            .field("update_uas", &self.update_uas)
            .field("has_delegate", &self.delegate.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::test_support::{request, response_to};
    use sipua_sip_core::{HeaderName, Method};

    fn confirmed_uac() -> SessionDialog {
        let mut invite = request(Method::Invite, "z9hG4bKsd1");
        invite.headers.append(HeaderName::Contact, "<sip:alice@pc33.atlanta.example.com>");
        let mut ok = response_to(&invite, 200);
        ok.headers.append(HeaderName::Contact, "<sip:bob@192.0.2.4>");
        let dialog = Dialog::uac(&invite, &ok, "<sip:alice@pc33.atlanta.example.com>").unwrap();
        SessionDialog::new(dialog, 314159, 1)
    }

    fn sdp() -> Body {
        Body::sdp("v=0\r\n")
    }

    #[test]
    fn test_session_state_is_derived() {
        let mut session = confirmed_uac();
        assert_eq!(session.session_state(), SessionState::Confirmed);
        session.ack_wait = true;
        assert_eq!(session.session_state(), SessionState::AckWait);
        session.terminate();
        assert_eq!(session.session_state(), SessionState::Terminated);
    }

    #[test]
    fn test_reinvite_admission_order() {
        let mut session = confirmed_uac();
        assert_eq!(session.admit_reinvite(), Admission::Accept);

        session.reinvite_uac = Some(OutgoingRequestId(7));
        assert_eq!(session.admit_reinvite(), Admission::Pending);

        session.ack_processing = true;
        assert_eq!(session.admit_reinvite(), Admission::Race);
    }

    #[test]
    fn test_update_with_offer_while_offers_outstanding() {
        let mut session = confirmed_uac();
        let mut update = request(Method::Update, "z9hG4bKup1");
        update.body = Some(sdp());

        session.apply_outgoing(Some(&sdp()));
        assert_eq!(session.admit_update(&update), Admission::Pending);

        let mut session = confirmed_uac();
        session.apply_incoming(Some(&sdp()));
        assert_eq!(session.admit_update(&update), Admission::Race);

        let bare = request(Method::Update, "z9hG4bKup2");
        assert_eq!(session.admit_update(&bare), Admission::Accept);
    }

    #[test]
    fn test_outgoing_reinvite_refused_while_one_is_active() {
        let mut session = confirmed_uac();
        assert!(session.check_outgoing_reinvite(Some(&sdp())).is_ok());
        session.reinvite_uas = Some(PendingReinvite {
            transaction: TransactionKey::new("z9hG4bKri", Method::Invite, true),
            seq: 2,
            accepted: false,
        });
        assert!(matches!(
            session.check_outgoing_reinvite(Some(&sdp())),
            Err(DialogError::RequestPending { .. })
        ));
    }

    #[test]
    fn test_ack_must_match_the_outstanding_invite() {
        let mut session = confirmed_uac();
        session.ack_wait = true;
        assert_eq!(session.match_ack(314159), Some(AckTarget::Initial));
        assert_eq!(session.match_ack(314160), None);
    }

    #[test]
    fn test_reliable_provisionals_must_be_consecutive() {
        let mut session = confirmed_uac();
        assert!(session.accept_remote_rseq(988));
        assert!(!session.accept_remote_rseq(988));
        assert!(!session.accept_remote_rseq(990));
        assert!(session.accept_remote_rseq(989));
    }

    #[test]
    fn test_terminated_dialog_closes_signaling() {
        let mut session = confirmed_uac();
        session.apply_outgoing(Some(&sdp()));
        session.terminate();
        assert_eq!(session.signaling_state(), SignalingState::Closed);
    }
}
