//! Requests sent inside an established or early dialog

use sipua_sip_core::{Body, HeaderName, Method, RAck, SipMessage, Uri, Via};
use tracing::{debug, info, warn};

use super::core::UserAgentCore;
use super::utils::generate_branch;
use crate::dialog::{DialogId, SignalingState};
use crate::errors::{DialogError, DialogResult};
use crate::transaction::{TimerId, TimerType};
use crate::user_agent::{IncomingResponse, OutgoingRequestDelegate, OutgoingRequestId, RequestKind, RequestOptions};

impl UserAgentCore {
    /// Acknowledges the 2xx to our latest INVITE on `dialog` (RFC 3261
    /// §13.2.2.4). The ACK is sent directly, outside any transaction, and
    /// kept for 2xx retransmissions.
    pub fn ack(&mut self, dialog: &DialogId, body: Option<Body>) -> DialogResult<()> {
        let via = self.fresh_via();
        let session = self
            .dialogs
            .get_mut(dialog)
            .ok_or_else(|| DialogError::DialogNotFound { id: dialog.clone() })?;
        let seq = session
            .invite_seq_to_ack
            .ok_or_else(|| DialogError::invalid_state("no 2xx waiting for an ACK"))?;

        let mut ack = session.dialog().create_request_with_seq(Method::Ack, seq);
        ack.headers.prepend(HeaderName::Via, via);
        ack.body = body;
        self.ctx.send(&ack)?;

        session.apply_outgoing(ack.session_body());
        if session.signaling_state() == SignalingState::HaveRemoteOffer {
            warn!(%dialog, "ACK sent without answering the offer in the 2xx");
        }
        session.invite_seq_to_ack = None;
        session.acked_seq = Some(seq);
        session.last_ack = Some(ack);
        session.reinvite_uac = None;
        debug!(%dialog, seq, "ACK sent");
        Ok(())
    }

    /// Ends the dialog with a BYE. The dialog is disposed immediately; the
    /// BYE transaction runs on and reports to `delegate`.
    pub fn bye(
        &mut self,
        dialog: &DialogId,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        let early = self
            .dialogs
            .get(dialog)
            .ok_or_else(|| DialogError::DialogNotFound { id: dialog.clone() })?
            .dialog()
            .is_early();
        if early {
            return Err(DialogError::invalid_state("BYE in an early dialog; cancel the INVITE instead"));
        }
        info!(%dialog, "sending BYE");
        let id = self.send_in_dialog(dialog, RequestKind::Bye, options, delegate)?;
        self.dispose_dialog(dialog)?;
        Ok(id)
    }

    pub fn info(
        &mut self,
        dialog: &DialogId,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        self.send_in_dialog(dialog, RequestKind::Info, options, delegate)
    }

    pub fn message_in_dialog(
        &mut self,
        dialog: &DialogId,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        self.send_in_dialog(dialog, RequestKind::Message, options, delegate)
    }

    pub fn notify(
        &mut self,
        dialog: &DialogId,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        self.send_in_dialog(dialog, RequestKind::Notify, options, delegate)
    }

    pub fn refer(
        &mut self,
        dialog: &DialogId,
        refer_to: &Uri,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        let options = options.with_header(HeaderName::ReferTo, format!("<{refer_to}>"));
        self.send_in_dialog(dialog, RequestKind::Refer, options, delegate)
    }

    /// Acknowledges a reliable provisional response (RFC 3262 §4).
    pub fn prack(
        &mut self,
        dialog: &DialogId,
        response: &IncomingResponse,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        if !response.is_reliable_provisional() {
            return Err(DialogError::protocol_error("only reliable provisionals are PRACKed"));
        }
        let rseq = response
            .response
            .header(&HeaderName::RSeq)
            .and_then(|value| value.trim().parse::<u32>().ok())
            .ok_or_else(|| DialogError::protocol_error("reliable provisional without a valid RSeq"))?;
        let cseq = response.response.cseq()?;
        let rack = RAck {
            rseq,
            cseq: cseq.seq,
            method: cseq.method,
        };
        let options = options.with_header(HeaderName::RAck, rack.to_string());
        self.send_in_dialog(dialog, RequestKind::Prack, options, delegate)
    }

    /// Sends an UPDATE (RFC 3311), refused while another UPDATE of ours is
    /// outstanding or when its offer would collide with one in flight.
    pub fn update(
        &mut self,
        dialog: &DialogId,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        self.dialogs
            .get(dialog)
            .ok_or_else(|| DialogError::DialogNotFound { id: dialog.clone() })?
            .check_outgoing_update(options.body.as_ref())?;
        self.send_in_dialog(dialog, RequestKind::Update, options, delegate)
    }

    /// Sends a re-INVITE (RFC 3261 §14.1). Refused in an early dialog and
    /// while any INVITE transaction of the dialog is unfinished.
    pub fn reinvite(
        &mut self,
        dialog: &DialogId,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        self.dialogs
            .get(dialog)
            .ok_or_else(|| DialogError::DialogNotFound { id: dialog.clone() })?
            .check_outgoing_reinvite(options.body.as_ref())?;
        self.send_in_dialog(dialog, RequestKind::ReInvite, options, delegate)
    }

    /// Ends the ACK processing reported as [`crate::user_agent::AckProcessing::Pending`].
    pub fn complete_ack_processing(&mut self, dialog: &DialogId) -> DialogResult<()> {
        let session = self
            .dialogs
            .get_mut(dialog)
            .ok_or_else(|| DialogError::DialogNotFound { id: dialog.clone() })?;
        session.ack_processing = false;
        Ok(())
    }

    /// Terminates a dialog and forgets it. Its transactions run to
    /// completion on their own.
    pub fn dispose_dialog(&mut self, dialog: &DialogId) -> DialogResult<()> {
        let mut session = self
            .dialogs
            .remove(dialog)
            .ok_or_else(|| DialogError::DialogNotFound { id: dialog.clone() })?;
        for timer in [TimerType::Invite2xxRetransmit, TimerType::ReliableProvisional] {
            self.ctx.timers.cancel(&TimerId::dialog(dialog, timer));
        }
        session.terminate();
        debug!(%dialog, "dialog disposed");
        Ok(())
    }

    /// [`Self::dispose_dialog`] for paths where the dialog may already be
    /// gone.
    pub(crate) fn discard_dialog(&mut self, dialog: &DialogId) {
        if self.dialogs.contains_key(dialog) {
            let _ = self.dispose_dialog(dialog);
        }
    }

    fn send_in_dialog(
        &mut self,
        dialog: &DialogId,
        kind: RequestKind,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        let id = self.allocate_request_id();
        let session = self
            .dialogs
            .get_mut(dialog)
            .ok_or_else(|| DialogError::DialogNotFound { id: dialog.clone() })?;
        if session.dialog().is_terminated() {
            return Err(DialogError::invalid_state("dialog is terminated"));
        }

        let mut request = session.dialog_mut().create_request(kind.method());
        for (name, value) in options.extra_headers {
            request.headers.append(name, value);
        }
        request.body = options.body;

        match kind {
            RequestKind::ReInvite => {
                session.apply_outgoing(request.session_body());
                session.reinvite_uac = Some(id);
            }
            RequestKind::Update => {
                session.apply_outgoing(request.session_body());
                session.update_uac = Some(id);
            }
            RequestKind::Prack => {
                session.apply_outgoing(request.session_body());
            }
            _ => {}
        }
        if kind.advertises_capabilities() {
            request.headers.append(HeaderName::Allow, self.config.allow_header());
            if !self.config.supported.is_empty() {
                request.headers.append(HeaderName::Supported, self.config.supported_header());
            }
        }

        debug!(%dialog, request = %id, %kind, "sending in-dialog request");
        self.start_client(id, kind, request, delegate, Some(dialog.clone()));
        Ok(id)
    }

    fn fresh_via(&self) -> String {
        Via::new(
            self.config.via_transport.clone(),
            self.config.via_host.clone(),
            generate_branch(),
        )
        .to_string()
    }
}
