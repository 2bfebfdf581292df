//! Response lifecycle on the UAS side
//!
//! Every response the application (or the core itself) sends goes through
//! [`UserAgentCore::reply`]. Dialog state follows the response at fixed
//! points:
//!
//! ```text
//! INVITE received
//!   ↓
//!   101-199 built → early dialog created, RSeq assigned when reliable
//!   ↓
//!   2xx sent      → dialog confirmed, ACK wait, 2xx retransmit timer
//!   ↓
//!   ACK received  → retransmissions stop
//! ```
//!
//! A 3xx-6xx to the initial INVITE disposes the early dialog.

use std::time::Duration;

use sipua_sip_core::{HeaderName, Response, SipMessage, StatusCode, Uri};
use tracing::{debug, info, warn};

use super::core::UserAgentCore;
use super::utils::initial_rseq;
use crate::dialog::{Dialog, DialogId, PendingReliable, SessionDialog, SignalingState};
use crate::errors::{DialogError, DialogResult};
use crate::transaction::{ServerTransaction, TimerId, TimerType, TransactionKey};
use crate::user_agent::{RequestKind, ResponseClass, ResponseOptions};

impl UserAgentCore {
    /// Sends a response on the server transaction `transaction`.
    pub fn reply(&mut self, transaction: &TransactionKey, options: ResponseOptions) -> DialogResult<()> {
        let class = ResponseClass::classify(options.status)?;
        let server = self
            .servers
            .get(transaction)
            .ok_or_else(|| DialogError::TransactionNotFound { key: transaction.clone() })?;
        let kind = server.kind().clone();
        let code = options.status.as_u16();
        if options.reliable {
            self.check_reliable(transaction, &options)?;
        }

        let mut options = options;
        if kind.advertises_capabilities() && class == ResponseClass::Accept {
            add_missing(&mut options, HeaderName::Allow, self.config.allow_header());
            if !self.config.supported.is_empty() {
                add_missing(&mut options, HeaderName::Supported, self.config.supported_header());
            }
        }

        // The dialog exists before a dialog-forming response is built so a
        // reliable provisional can take its RSeq from it.
        let mut created = None;
        if kind == RequestKind::Invite && (101..300).contains(&code) {
            let (dialog, is_new) = self.ensure_uas_dialog(transaction, options.status)?;
            if is_new {
                created = Some(dialog.clone());
            }
            if options.reliable {
                if let Some(session) = self.dialogs.get_mut(&dialog) {
                    let rseq = session.next_local_rseq();
                    options.extra_headers.push((HeaderName::Require, "100rel".to_string()));
                    options.extra_headers.push((HeaderName::RSeq, rseq.to_string()));
                }
            }
        }

        let contact = self.config.contact_header();
        let Some(server) = self.servers.get_mut(transaction) else {
            return Err(DialogError::TransactionNotFound { key: transaction.clone() });
        };
        let response = server.build_response(&options, &contact);
        debug!(transaction = %transaction, status = %response.status, "sending response");

        let mut events = Vec::new();
        if let Err(error) = server.transaction_mut().send_response(response.clone(), &mut events) {
            if let Some(dialog) = created {
                self.discard_dialog(&dialog);
            }
            self.dispatch(events);
            return Err(error);
        }
        self.response_sent(transaction, &kind, &response, options.reliable);
        self.dispatch(events);
        Ok(())
    }

    /// 100 Trying
    pub fn trying(&mut self, transaction: &TransactionKey) -> DialogResult<()> {
        self.reply(transaction, ResponseOptions::new(StatusCode::TRYING))
    }

    /// A 101-199 response, reliable when `options.reliable` is set.
    pub fn progress(&mut self, transaction: &TransactionKey, options: ResponseOptions) -> DialogResult<()> {
        expect_class(&options, ResponseClass::Progress)?;
        self.reply(transaction, options)
    }

    /// A 2xx response.
    pub fn accept(&mut self, transaction: &TransactionKey, options: ResponseOptions) -> DialogResult<()> {
        expect_class(&options, ResponseClass::Accept)?;
        self.reply(transaction, options)
    }

    /// A 3xx response; each target goes into its own Contact header.
    pub fn redirect(
        &mut self,
        transaction: &TransactionKey,
        options: ResponseOptions,
        targets: &[Uri],
    ) -> DialogResult<()> {
        expect_class(&options, ResponseClass::Redirect)?;
        let options = targets
            .iter()
            .fold(options, |options, target| options.with_header(HeaderName::Contact, format!("<{target}>")));
        self.reply(transaction, options)
    }

    /// A 4xx-6xx response.
    pub fn reject(&mut self, transaction: &TransactionKey, options: ResponseOptions) -> DialogResult<()> {
        expect_class(&options, ResponseClass::Reject)?;
        self.reply(transaction, options)
    }

    fn check_reliable(&self, transaction: &TransactionKey, options: &ResponseOptions) -> DialogResult<()> {
        let code = options.status.as_u16();
        if !(101..=199).contains(&code) {
            return Err(DialogError::protocol_error(format!("{code} cannot be sent reliably")));
        }
        let Some(server) = self.servers.get(transaction) else {
            return Err(DialogError::TransactionNotFound { key: transaction.clone() });
        };
        if *server.kind() != RequestKind::Invite {
            return Err(DialogError::protocol_error("reliable provisionals only answer an initial INVITE"));
        }
        if !server.supports_100rel() {
            return Err(DialogError::protocol_error("peer does not support 100rel"));
        }
        let outstanding = server
            .dialog()
            .and_then(|dialog| self.dialogs.get(dialog))
            .is_some_and(|session| session.reliable.is_some());
        if outstanding {
            return Err(DialogError::request_pending("previous reliable provisional not yet acknowledged"));
        }
        Ok(())
    }

    /// Finds or creates the UAS dialog of an initial INVITE. The offer in
    /// the INVITE, if any, is applied when the dialog is created.
    fn ensure_uas_dialog(&mut self, transaction: &TransactionKey, status: StatusCode) -> DialogResult<(DialogId, bool)> {
        let server = self
            .servers
            .get(transaction)
            .ok_or_else(|| DialogError::TransactionNotFound { key: transaction.clone() })?;
        if let Some(dialog) = server.dialog() {
            return Ok((dialog.clone(), false));
        }

        let request = server.request();
        let dialog = Dialog::uas(request, server.local_tag(), &self.config.contact_header(), status)?;
        let seq = request.cseq()?.seq;
        let offer = request.session_body().cloned();
        let id = dialog.id().clone();

        let mut session = SessionDialog::new(dialog, seq, initial_rseq());
        session.initial_transaction = Some(transaction.clone());
        session.apply_incoming(offer.as_ref());
        self.dialogs.insert(id.clone(), session);
        if let Some(server) = self.servers.get_mut(transaction) {
            server.dialog = Some(id.clone());
        }
        Ok((id, true))
    }

    /// Dialog effects of a response that left the transaction successfully.
    fn response_sent(&mut self, transaction: &TransactionKey, kind: &RequestKind, response: &Response, reliable: bool) {
        let Some(server) = self.servers.get(transaction) else {
            return;
        };
        let Some(dialog) = server.dialog().cloned() else {
            return;
        };
        let request = server.request();
        let settings = self.ctx.settings;
        let code = response.status.as_u16();
        let body = response.session_body();
        let Some(session) = self.dialogs.get_mut(&dialog) else {
            return;
        };

        match kind {
            RequestKind::Invite => match code {
                101..=199 if reliable => {
                    session.apply_outgoing(body);
                    let rseq = response
                        .header(&HeaderName::RSeq)
                        .and_then(|value| value.trim().parse().ok())
                        .unwrap_or_default();
                    session.reliable = Some(PendingReliable {
                        response: response.clone(),
                        rseq,
                        transaction: transaction.clone(),
                        interval: settings.t1,
                        elapsed: Duration::ZERO,
                    });
                    self.ctx
                        .timers
                        .schedule(TimerId::dialog(&dialog, TimerType::ReliableProvisional), settings.t1);
                }
                200..=299 => {
                    session.dialog_mut().confirm(None);
                    // An answer already sent in a reliable provisional is not
                    // repeated as a new one.
                    if session.signaling_state() != SignalingState::Stable {
                        session.apply_outgoing(body);
                    }
                    session.ack_wait = true;
                    session.initial_transaction = Some(transaction.clone());
                    session.retransmit_interval = settings.t1;
                    if session.reliable.take().is_some() {
                        self.ctx
                            .timers
                            .cancel(&TimerId::dialog(&dialog, TimerType::ReliableProvisional));
                    }
                    info!(%dialog, "dialog accepted, waiting for ACK");
                    self.ctx
                        .timers
                        .schedule(TimerId::dialog(&dialog, TimerType::Invite2xxRetransmit), settings.t1);
                }
                300..=699 => {
                    debug!(%dialog, status = code, "initial INVITE rejected, disposing early dialog");
                    self.discard_dialog(&dialog);
                }
                _ => {}
            },
            RequestKind::ReInvite => {
                let ours = session
                    .reinvite_uas
                    .as_ref()
                    .is_some_and(|pending| &pending.transaction == transaction);
                if !ours {
                    return;
                }
                match code {
                    200..=299 => {
                        session.apply_outgoing(body);
                        session.dialog_mut().refresh_target(request);
                        if let Some(pending) = session.reinvite_uas.as_mut() {
                            pending.accepted = true;
                        }
                        session.retransmit_interval = settings.t1;
                        self.ctx
                            .timers
                            .schedule(TimerId::dialog(&dialog, TimerType::Invite2xxRetransmit), settings.t1);
                    }
                    300..=699 => {
                        session.rollback();
                        session.reinvite_uas = None;
                    }
                    _ => {}
                }
            }
            RequestKind::Update if code >= 200 => {
                if session.update_uas.as_ref() != Some(transaction) {
                    return;
                }
                if (200..300).contains(&code) {
                    session.apply_outgoing(body);
                    session.dialog_mut().refresh_target(request);
                } else {
                    session.rollback();
                }
                session.update_uas = None;
            }
            RequestKind::Prack if (200..300).contains(&code) => {
                session.apply_outgoing(body);
            }
            _ => {}
        }
    }

    /// Timer for 2xx retransmission (RFC 3261 §13.3.1.4): doubles up to T2.
    pub(crate) fn retransmit_accepted(&mut self, dialog: &DialogId) {
        let Some(session) = self.dialogs.get(dialog) else {
            return;
        };
        let Some(key) = session.awaiting_ack().cloned() else {
            return;
        };
        let mut events = Vec::new();
        let resent = match self.servers.get_mut(&key).map(|server| server.transaction_mut()) {
            Some(ServerTransaction::Invite(tx)) => tx.retransmit_accepted_response(&mut events),
            _ => false,
        };
        if resent {
            let t2 = self.ctx.settings.t2;
            if let Some(session) = self.dialogs.get_mut(dialog) {
                session.retransmit_interval = (session.retransmit_interval * 2).min(t2);
                self.ctx.timers.schedule(
                    TimerId::dialog(dialog, TimerType::Invite2xxRetransmit),
                    session.retransmit_interval,
                );
            }
        }
        self.dispatch(events);
    }

    /// Timer for reliable provisional retransmission (RFC 3262 §3). After
    /// 64*T1 without PRACK the INVITE is rejected with 504.
    pub(crate) fn retransmit_reliable_provisional(&mut self, dialog: &DialogId) {
        let timeout = self.ctx.settings.transaction_timeout;
        let Some(session) = self.dialogs.get_mut(dialog) else {
            return;
        };
        let Some(pending) = session.reliable.as_mut() else {
            return;
        };
        pending.elapsed += pending.interval;
        let key = pending.transaction.clone();

        if pending.elapsed >= timeout {
            session.reliable = None;
            warn!(%dialog, "reliable provisional never acknowledged, rejecting INVITE");
            let result = self.reply(&key, ResponseOptions::new(StatusCode::SERVER_TIMEOUT));
            self.log_failure("504 after PRACK timeout", result);
            return;
        }

        pending.interval = (pending.interval * 2).min(timeout - pending.elapsed);
        let interval = pending.interval;
        let response = pending.response.clone();

        let mut events = Vec::new();
        let sent = match self.servers.get_mut(&key) {
            Some(server) => server.transaction_mut().send_response(response, &mut events),
            None => Err(DialogError::TransactionNotFound { key: key.clone() }),
        };
        match sent {
            Ok(()) => self
                .ctx
                .timers
                .schedule(TimerId::dialog(dialog, TimerType::ReliableProvisional), interval),
            Err(error) => {
                debug!(%dialog, %error, "stopping reliable provisional retransmission");
                if let Some(session) = self.dialogs.get_mut(dialog) {
                    session.reliable = None;
                }
            }
        }
        self.dispatch(events);
    }
}

fn expect_class(options: &ResponseOptions, expected: ResponseClass) -> DialogResult<()> {
    let class = ResponseClass::classify(options.status)?;
    if class != expected {
        return Err(DialogError::protocol_error(format!(
            "{} is not a {expected:?} response",
            options.status.as_u16()
        )));
    }
    Ok(())
}

fn add_missing(options: &mut ResponseOptions, name: HeaderName, value: String) {
    if !options.extra_headers.iter().any(|(existing, _)| *existing == name) {
        options.extra_headers.push((name, value));
    }
}
