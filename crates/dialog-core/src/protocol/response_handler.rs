//! Responses to our own requests
//!
//! Responses come out of the client transactions as events and are routed
//! here by the owning [`crate::user_agent::UserAgentClient`]. Three paths:
//!
//! - initial INVITE: dialogs are created from To-tagged 1xx and 2xx
//!   responses (one per remote tag when the request forks), reliable
//!   provisionals are ordered by RSeq, and 2xx retransmissions are answered
//!   with the stored ACK
//! - re-INVITE: offer/answer and the pending re-INVITE are settled
//! - everything else: UPDATE offer/answer, then the delegate
//!
//! 401/407 are answered with credentials before the delegate sees them when
//! that is possible. In-dialog requests rejected with 481 end the dialog;
//! 408 ends it with a BYE (RFC 5057).

use sipua_sip_core::{HeaderName, Response, SipMessage, StatusCode};
use tracing::{debug, error, trace, warn};

use crate::dialog::{Dialog, DialogId, SessionDialog, SignalingState};
use crate::manager::utils::initial_rseq;
use crate::manager::UserAgentCore;
use crate::transaction::TransactionKey;
use crate::user_agent::{IncomingResponse, OutgoingRequestId, RequestKind, RequestOptions, ResponseClass};

impl UserAgentCore {
    pub(crate) fn handle_client_response(&mut self, key: TransactionKey, response: Response) {
        let Some(id) = self.client_index.get(&key).copied() else {
            trace!(transaction = %key, "response for forgotten transaction");
            return;
        };
        let Some(client) = self.clients.get(&id) else {
            return;
        };
        if !client.is_current(&key) {
            trace!(transaction = %key, status = %response.status, "ignoring response on retired transaction");
            return;
        }
        let class = match ResponseClass::classify(response.status) {
            Ok(class) => class,
            Err(error) => {
                error!(request = %id, %error, "dropping response");
                return;
            }
        };
        let kind = client.kind().clone();
        trace!(request = %id, %kind, status = %response.status, "response received");
        match kind {
            RequestKind::Invite => self.invite_response(id, response, class),
            RequestKind::ReInvite => self.reinvite_response(id, response, class),
            _ => self.non_invite_response(id, &kind, response, class),
        }
    }

    fn invite_response(&mut self, id: OutgoingRequestId, response: Response, class: ResponseClass) {
        match class {
            ResponseClass::Trying => {
                self.send_pending_cancel(id);
                self.notify_client(id, class, response, None);
            }
            ResponseClass::Progress => {
                self.send_pending_cancel(id);
                let reliable = response.requires("100rel");
                let dialog = match response.to_tag() {
                    Some(_) => self.uac_dialog(id, &response),
                    None => None,
                };
                if reliable {
                    let Some(dialog) = &dialog else {
                        debug!(request = %id, "reliable provisional outside a dialog");
                        return;
                    };
                    let rseq = response
                        .header(&HeaderName::RSeq)
                        .and_then(|value| value.trim().parse::<u32>().ok());
                    let Some(session) = self.dialogs.get_mut(dialog) else {
                        return;
                    };
                    let in_order = rseq.is_some_and(|rseq| session.accept_remote_rseq(rseq));
                    if !in_order {
                        return;
                    }
                    session.apply_incoming(response.session_body());
                }

                let incoming = IncomingResponse {
                    id,
                    response,
                    dialog: dialog.clone(),
                };
                let notified = self
                    .with_client_delegate(id, |delegate, core| delegate.on_progress(core, &incoming))
                    .is_some();
                if !notified && reliable {
                    if let Some(dialog) = &dialog {
                        let result = self.prack(dialog, &incoming, RequestOptions::new(), None);
                        self.log_failure("automatic PRACK", result);
                    }
                }
            }
            ResponseClass::Accept => {
                let Some(dialog) = DialogId::for_incoming_response(&response) else {
                    warn!(request = %id, "2xx to INVITE without To tag");
                    return;
                };
                let Ok(cseq) = response.cseq() else {
                    return;
                };
                if self.absorb_retransmitted_2xx(&dialog, cseq.seq) {
                    return;
                }
                let Some(dialog) = self.uac_dialog(id, &response) else {
                    return;
                };
                if let Some(session) = self.dialogs.get_mut(&dialog) {
                    session.dialog_mut().confirm(Some(&response));
                    // A reliable provisional may already have carried the
                    // answer; the 2xx then repeats it.
                    if session.signaling_state() != SignalingState::Stable {
                        session.apply_incoming(response.session_body());
                    }
                    session.invite_seq_to_ack = Some(cseq.seq);
                }
                let incoming = IncomingResponse {
                    id,
                    response,
                    dialog: Some(dialog.clone()),
                };
                let notified = self
                    .with_client_delegate(id, |delegate, core| delegate.on_accept(core, &incoming))
                    .is_some();
                if !notified {
                    let result = self.ack(&dialog, None);
                    self.log_failure("automatic ACK", result);
                }
            }
            ResponseClass::Redirect | ResponseClass::Reject => {
                if class == ResponseClass::Reject && self.retry_with_credentials(id, &response) {
                    return;
                }
                let created = self
                    .clients
                    .get_mut(&id)
                    .map(|client| std::mem::take(&mut client.created_dialogs))
                    .unwrap_or_default();
                for dialog in created {
                    if self.dialogs.get(&dialog).is_some_and(|s| s.dialog().is_early()) {
                        self.discard_dialog(&dialog);
                    }
                }
                self.notify_client(id, class, response, None);
            }
        }
    }

    fn reinvite_response(&mut self, id: OutgoingRequestId, response: Response, class: ResponseClass) {
        let dialog = self.clients.get(&id).and_then(|client| client.dialog().cloned());
        match class {
            ResponseClass::Trying | ResponseClass::Progress => self.notify_client(id, class, response, dialog),
            ResponseClass::Accept => {
                let Some(dialog) = dialog else {
                    return;
                };
                let Ok(cseq) = response.cseq() else {
                    return;
                };
                if self.absorb_retransmitted_2xx(&dialog, cseq.seq) {
                    return;
                }
                let Some(session) = self.dialogs.get_mut(&dialog) else {
                    debug!(%dialog, "2xx to re-INVITE of a disposed dialog");
                    return;
                };
                session.apply_incoming(response.session_body());
                session.dialog_mut().refresh_target(&response);
                session.invite_seq_to_ack = Some(cseq.seq);

                let incoming = IncomingResponse {
                    id,
                    response,
                    dialog: Some(dialog.clone()),
                };
                let notified = self
                    .with_client_delegate(id, |delegate, core| delegate.on_accept(core, &incoming))
                    .is_some();
                if !notified {
                    let result = self.ack(&dialog, None);
                    self.log_failure("automatic ACK", result);
                }
            }
            ResponseClass::Redirect | ResponseClass::Reject => {
                if class == ResponseClass::Reject && self.retry_with_credentials(id, &response) {
                    return;
                }
                if let Some(session) = dialog.as_ref().and_then(|d| self.dialogs.get_mut(d)) {
                    session.rollback();
                    if session.reinvite_uac == Some(id) {
                        session.reinvite_uac = None;
                    }
                }
                let status = response.status;
                self.notify_client(id, class, response, dialog.clone());
                if let Some(dialog) = dialog {
                    self.in_dialog_failure(&dialog, status);
                }
            }
        }
    }

    fn non_invite_response(&mut self, id: OutgoingRequestId, kind: &RequestKind, response: Response, class: ResponseClass) {
        if class == ResponseClass::Reject && self.retry_with_credentials(id, &response) {
            return;
        }
        let dialog = self.clients.get(&id).and_then(|client| client.dialog().cloned());
        let status = response.status;
        let is_final = !status.is_provisional();

        if *kind == RequestKind::Update && is_final {
            if let Some(session) = dialog.as_ref().and_then(|d| self.dialogs.get_mut(d)) {
                if session.update_uac == Some(id) {
                    if status.is_success() {
                        session.apply_incoming(response.session_body());
                        session.dialog_mut().refresh_target(&response);
                    } else {
                        session.rollback();
                    }
                    session.update_uac = None;
                }
            }
        }
        if *kind == RequestKind::Prack && status.is_success() {
            if let Some(session) = dialog.as_ref().and_then(|d| self.dialogs.get_mut(d)) {
                session.apply_incoming(response.session_body());
            }
        }

        self.notify_client(id, class, response, dialog.clone());

        let failed = matches!(class, ResponseClass::Redirect | ResponseClass::Reject);
        if let (true, Some(dialog)) = (failed && *kind != RequestKind::Bye, dialog) {
            self.in_dialog_failure(&dialog, status);
        }
    }

    /// True when a 2xx with CSeq `seq` repeats one already handled: an ACK
    /// sent for it is retransmitted, a 2xx still waiting for the
    /// application's ACK is dropped.
    fn absorb_retransmitted_2xx(&mut self, dialog: &DialogId, seq: u32) -> bool {
        let Some(session) = self.dialogs.get(dialog) else {
            return false;
        };
        if session.acked_seq == Some(seq) {
            if let Some(ack) = &session.last_ack {
                trace!(%dialog, seq, "2xx retransmission, resending ACK");
                if let Err(error) = self.ctx.send(ack) {
                    debug!(%dialog, %error, "ACK retransmission failed");
                }
            }
            return true;
        }
        session.invite_seq_to_ack == Some(seq)
    }

    /// Finds or creates the dialog a To-tagged response to our initial
    /// INVITE belongs to. Early dialogs get their target refreshed.
    fn uac_dialog(&mut self, id: OutgoingRequestId, response: &Response) -> Option<DialogId> {
        let dialog = DialogId::for_incoming_response(response)?;
        if let Some(session) = self.dialogs.get_mut(&dialog) {
            if session.dialog().is_early() {
                session.dialog_mut().refresh_target(response);
            }
            return Some(dialog);
        }

        let contact = self.config.contact_header();
        let client = self.clients.get_mut(&id)?;
        let request = client.request();
        let created = match Dialog::uac(request, response, &contact) {
            Ok(created) => created,
            Err(error) => {
                warn!(request = %id, %error, "cannot create dialog from response");
                return None;
            }
        };
        let seq = created.local_seq();
        let offer = request.session_body().cloned();
        client.created_dialogs.push(dialog.clone());

        let mut session = SessionDialog::new(created, seq, initial_rseq());
        session.apply_outgoing(offer.as_ref());
        debug!(%dialog, status = %response.status, "dialog created by response");
        self.dialogs.insert(dialog.clone(), session);
        Some(dialog)
    }

    /// Dispatches a response to the delegate callback for its class.
    fn notify_client(&mut self, id: OutgoingRequestId, class: ResponseClass, response: Response, dialog: Option<DialogId>) {
        let incoming = IncomingResponse { id, response, dialog };
        self.with_client_delegate(id, |delegate, core| match class {
            ResponseClass::Trying => delegate.on_trying(core, &incoming),
            ResponseClass::Progress => delegate.on_progress(core, &incoming),
            ResponseClass::Accept => delegate.on_accept(core, &incoming),
            ResponseClass::Redirect => delegate.on_redirect(core, &incoming),
            ResponseClass::Reject => delegate.on_reject(core, &incoming),
        });
    }

    /// RFC 5057: 481 means the peer lost the dialog, 408 that it is
    /// unreachable. Both end the dialog.
    fn in_dialog_failure(&mut self, dialog: &DialogId, status: StatusCode) {
        if !self.dialogs.contains_key(dialog) {
            return;
        }
        match status {
            StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST => {
                debug!(%dialog, "peer reports the dialog gone");
                self.discard_dialog(dialog);
            }
            StatusCode::REQUEST_TIMEOUT => {
                debug!(%dialog, "in-dialog request timed out, ending dialog");
                if let Err(error) = self.bye(dialog, RequestOptions::new(), None) {
                    debug!(%dialog, %error, "BYE after timeout failed");
                    self.discard_dialog(dialog);
                }
            }
            _ => {}
        }
    }
}
