//! Request intake
//!
//! Every inbound request is matched in this order:
//!
//! 1. ACK: to its server transaction (non-2xx) or its dialog (2xx)
//! 2. retransmission: to the server transaction it matches
//! 3. CANCEL: to the INVITE it cancels
//! 4. To tag present: to its dialog, 481 if there is none
//! 5. otherwise: out-of-dialog validation, then the core delegate
//!
//! Out-of-dialog validation (RFC 3261 §8.2) stops at the first failure:
//!
//! | Check | Reply |
//! |---|---|
//! | method not in the allowed list | 405 + Allow |
//! | Require lists an option tag we do not support | 420 + Unsupported |
//! | method only valid inside a dialog | 481 |
//! | INVITE without Contact | 400 |

use sipua_sip_core::{HeaderName, Method, Request, SipMessage, StatusCode};
use tracing::{debug, trace};

use crate::dialog::{DialogId, SequenceCheck};
use crate::manager::utils::generate_tag;
use crate::manager::UserAgentCore;
use crate::transaction::{ServerInviteTransaction, ServerNonInviteTransaction, ServerTransaction, TransactionKey};
use crate::user_agent::methods::DefaultReply;
use crate::user_agent::{RequestKind, ResponseOptions, UserAgentServer};

impl UserAgentCore {
    pub(crate) fn receive_request(&mut self, request: Request) {
        if let Err(reason) = check_mandatory_headers(&request) {
            debug!(method = %request.method, reason, "dropping malformed request");
            return;
        }
        if request.method == Method::Ack {
            self.receive_ack(request);
            return;
        }
        let Some(key) = TransactionKey::from_request(&request) else {
            debug!(method = %request.method, "dropping request without branch");
            return;
        };

        if let Some(server) = self.servers.get_mut(&key) {
            trace!(transaction = %key, "request retransmission");
            let mut events = Vec::new();
            server.transaction_mut().receive_request(request, &mut events);
            self.dispatch(events);
            return;
        }

        if request.method == Method::Cancel {
            self.receive_cancel(key, request);
            return;
        }

        if request.to_tag().is_some() {
            match DialogId::for_incoming_request(&request).filter(|id| self.dialogs.contains_key(id)) {
                Some(dialog) => self.receive_in_dialog_request(dialog, key, request),
                None => {
                    debug!(method = %request.method, "no dialog for request with To tag");
                    let kind = RequestKind::for_method(&request.method, true);
                    self.create_server(key.clone(), kind, request, generate_tag(), None);
                    self.reply_status(&key, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST);
                }
            }
            return;
        }

        self.receive_out_of_dialog_request(key, request);
    }

    fn receive_out_of_dialog_request(&mut self, key: TransactionKey, request: Request) {
        let kind = RequestKind::for_method(&request.method, false);
        debug!(transaction = %key, %kind, "new out-of-dialog request");

        let unsupported: Vec<String> = request
            .option_tags(&HeaderName::Require)
            .into_iter()
            .filter(|tag| !self.config.supports(tag))
            .collect();
        let allowed = self.config.allows(&request.method);
        let has_contact = request.contact().is_some();
        self.create_server(key.clone(), kind.clone(), request, generate_tag(), None);

        if !allowed {
            let allow = self.config.allow_header();
            self.send_reply(
                &key,
                ResponseOptions::new(StatusCode::METHOD_NOT_ALLOWED).with_header(HeaderName::Allow, allow),
            );
            return;
        }
        if !unsupported.is_empty() {
            self.send_reply(
                &key,
                ResponseOptions::new(StatusCode::BAD_EXTENSION).with_header(HeaderName::Unsupported, unsupported.join(", ")),
            );
            return;
        }
        if kind.requires_dialog() {
            self.reply_status(&key, StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST);
            return;
        }
        if kind == RequestKind::Invite && !has_contact {
            self.send_reply(&key, ResponseOptions::new(StatusCode::BAD_REQUEST).with_reason("Missing Contact"));
            return;
        }

        if kind == RequestKind::Invite && self.config.auto_trying {
            let result = self.trying(&key);
            self.log_failure("100 Trying", result);
        }

        let Some(incoming) = self.servers.get(&key).map(UserAgentServer::incoming) else {
            return;
        };
        let handled = self
            .with_core_delegate(|delegate, core| match kind {
                RequestKind::Invite => delegate.on_invite(core, &incoming),
                RequestKind::Message => delegate.on_message(core, &incoming),
                RequestKind::Notify => delegate.on_notify(core, &incoming),
                RequestKind::Options => delegate.on_options(core, &incoming),
                RequestKind::Refer => delegate.on_refer(core, &incoming),
                RequestKind::Register => delegate.on_register(core, &incoming),
                RequestKind::Subscribe => delegate.on_subscribe(core, &incoming),
                RequestKind::Publish => delegate.on_publish(core, &incoming),
                _ => false,
            })
            .unwrap_or(false);
        if !handled {
            let reply = kind.unhandled_out_of_dialog();
            self.default_reply(&key, &kind, reply);
        }
    }

    /// In-dialog request that passed dialog matching (RFC 3261 §12.2.2).
    pub(crate) fn receive_in_dialog_request(&mut self, dialog: DialogId, key: TransactionKey, request: Request) {
        let kind = RequestKind::for_method(&request.method, true);
        debug!(%dialog, transaction = %key, %kind, "new in-dialog request");

        let Some(session) = self.dialogs.get_mut(&dialog) else {
            return;
        };
        let check = session.dialog_mut().receive_request(&request);
        let local_tag = dialog.local_tag.clone();
        self.create_server(key.clone(), kind.clone(), request, local_tag, Some(dialog.clone()));

        match check {
            Ok(SequenceCheck::InOrder) => {}
            Ok(SequenceCheck::OutOfOrder) => {
                self.send_reply(
                    &key,
                    ResponseOptions::new(StatusCode::SERVER_INTERNAL_ERROR).with_reason("Out of order CSeq"),
                );
                return;
            }
            Ok(SequenceCheck::Duplicate) => {
                debug!(%dialog, transaction = %key, "dropping request reusing the last CSeq");
                if let Some(mut server) = self.servers.remove(&key) {
                    server.transaction_mut().dispose();
                }
                return;
            }
            Err(error) => {
                debug!(%dialog, %error, "bad CSeq");
                self.reply_status(&key, StatusCode::BAD_REQUEST);
                return;
            }
        }

        match kind {
            RequestKind::ReInvite => self.receive_reinvite(dialog, key),
            RequestKind::Update => self.receive_update(dialog, key),
            RequestKind::Prack => self.receive_prack(dialog, key),
            RequestKind::Bye => self.receive_bye(dialog, key),
            _ => self.deliver_to_session(&dialog, &key, &kind),
        }
    }

    pub(crate) fn create_server(
        &mut self,
        key: TransactionKey,
        kind: RequestKind,
        request: Request,
        local_tag: String,
        dialog: Option<DialogId>,
    ) {
        let ctx = self.ctx.clone();
        let transaction = if request.method == Method::Invite {
            ServerTransaction::Invite(ServerInviteTransaction::new(key.clone(), request, ctx))
        } else {
            ServerTransaction::NonInvite(ServerNonInviteTransaction::new(key.clone(), request, ctx))
        };
        self.servers
            .insert(key, UserAgentServer::new(kind, transaction, local_tag, dialog));
    }

    /// Reply sent by the core on its own; failures are only logged.
    pub(crate) fn send_reply(&mut self, key: &TransactionKey, options: ResponseOptions) {
        let status = options.status;
        let result = self.reply(key, options);
        if let Err(error) = result {
            debug!(transaction = %key, %status, %error, "automatic reply failed");
        }
    }

    pub(crate) fn reply_status(&mut self, key: &TransactionKey, status: StatusCode) {
        self.send_reply(key, ResponseOptions::new(status));
    }

    pub(crate) fn default_reply(&mut self, key: &TransactionKey, kind: &RequestKind, reply: DefaultReply) {
        match reply {
            DefaultReply::Accept => self.reply_status(key, StatusCode::OK),
            DefaultReply::Reject(status) => {
                let mut options = ResponseOptions::new(status);
                if status == StatusCode::METHOD_NOT_ALLOWED {
                    options = options.with_header(HeaderName::Allow, self.config.allow_header());
                }
                if *kind == RequestKind::Info && status == StatusCode::BAD_INFO_PACKAGE {
                    options = options.with_header(HeaderName::RecvInfo, "");
                }
                self.send_reply(key, options);
            }
        }
    }
}

/// RFC 3261 §8.1.1 mandatory headers, and a CSeq method matching the
/// request line.
fn check_mandatory_headers(request: &Request) -> Result<(), &'static str> {
    let cseq = request.cseq().map_err(|_| "missing or invalid CSeq")?;
    if cseq.method != request.method {
        return Err("CSeq method does not match the request line");
    }
    request.call_id().map_err(|_| "missing Call-ID")?;
    request.from().map_err(|_| "missing or invalid From")?;
    request.to().map_err(|_| "missing or invalid To")?;
    request.top_via().map_err(|_| "missing or invalid Via")?;
    if request.from_tag().is_none() {
        return Err("From has no tag");
    }
    Ok(())
}
