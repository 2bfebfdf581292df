//! Out-of-dialog requests, CANCEL and digest authentication retries

use sipua_sip_core::{CSeq, HeaderName, Method, NameAddr, Request, Response, SipMessage, StatusCode, Uri, Via};
use tracing::{debug, info, warn};

use super::core::UserAgentCore;
use super::utils::{generate_branch, generate_call_id, generate_tag};
use crate::auth::DigestChallenge;
use crate::dialog::DialogId;
use crate::errors::{DialogError, DialogResult};
use crate::transaction::{
    ClientInviteTransaction, ClientNonInviteTransaction, ClientTransaction, TransactionEvent, TransactionKey,
    TransactionState,
};
use crate::user_agent::{OutgoingRequestDelegate, OutgoingRequestId, RequestKind, RequestOptions, UserAgentClient};

impl UserAgentCore {
    /// Builds an out-of-dialog request from the configured identity
    /// (RFC 3261 §8.1.1). The Via is added when the request is sent.
    pub fn make_outgoing_request(&self, method: Method, target: Uri, options: RequestOptions) -> Request {
        let kind = RequestKind::for_method(&method, false);
        let config = &self.config;

        let mut from = NameAddr::new(config.aor.clone()).with_tag(generate_tag());
        if let Some(name) = &config.display_name {
            from = from.with_display_name(name.clone());
        }
        let to = options.to.unwrap_or_else(|| NameAddr::new(target.clone()));
        let seq = options.cseq.unwrap_or(1);
        let call_id = options.call_id.unwrap_or_else(generate_call_id);

        let mut request = Request::new(method.clone(), target);
        let headers = &mut request.headers;
        headers.append(HeaderName::MaxForwards, config.max_forwards.to_string());
        for route in &config.route_set {
            headers.append(HeaderName::Route, route.clone());
        }
        headers.append(HeaderName::From, from.to_string());
        headers.append(HeaderName::To, to.to_string());
        headers.append(HeaderName::CallId, call_id);
        headers.append(HeaderName::CSeq, CSeq::new(seq, method).to_string());
        if kind.adds_contact() {
            headers.append(HeaderName::Contact, config.contact_header());
        }
        if kind.advertises_capabilities() {
            headers.append(HeaderName::Allow, config.allow_header());
        }
        if !config.supported.is_empty() {
            headers.append(HeaderName::Supported, config.supported_header());
        }
        if let Some(user_agent) = &config.user_agent {
            headers.append(HeaderName::UserAgent, user_agent.clone());
        }
        for (name, value) in options.extra_headers {
            headers.append(name, value);
        }
        request.body = options.body;
        request
    }

    /// Sends a request built by the caller outside of any dialog.
    ///
    /// ACK and CANCEL have their own entry points and are refused here.
    pub fn request(
        &mut self,
        request: Request,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        if matches!(request.method, Method::Ack | Method::Cancel) {
            return Err(DialogError::protocol_error(format!(
                "{} cannot be sent as a standalone request",
                request.method
            )));
        }
        request.cseq()?;
        request.call_id()?;
        if request.from_tag().is_none() {
            return Err(DialogError::protocol_error("request has no From tag"));
        }
        let kind = RequestKind::for_method(&request.method, false);
        let id = self.allocate_request_id();
        debug!(request = %id, method = %request.method, uri = %request.uri, "sending out-of-dialog request");
        self.start_client(id, kind, request, delegate, None);
        Ok(id)
    }

    pub fn invite(
        &mut self,
        target: Uri,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        let request = self.make_outgoing_request(Method::Invite, target, options);
        self.request(request, delegate)
    }

    /// REGISTER for the configured address of record (RFC 3261 §10.2).
    pub fn register(
        &mut self,
        registrar: Uri,
        mut options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        if options.to.is_none() {
            let mut to = NameAddr::new(self.config.aor.clone());
            to.display_name = self.config.display_name.clone();
            options.to = Some(to);
        }
        let request = self.make_outgoing_request(Method::Register, registrar, options);
        self.request(request, delegate)
    }

    pub fn subscribe(
        &mut self,
        target: Uri,
        event: &str,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        let options = options.with_header(HeaderName::Event, event);
        let request = self.make_outgoing_request(Method::Subscribe, target, options);
        self.request(request, delegate)
    }

    pub fn publish(
        &mut self,
        target: Uri,
        event: &str,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        let options = options.with_header(HeaderName::Event, event);
        let request = self.make_outgoing_request(Method::Publish, target, options);
        self.request(request, delegate)
    }

    pub fn message(
        &mut self,
        target: Uri,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        let request = self.make_outgoing_request(Method::Message, target, options);
        self.request(request, delegate)
    }

    pub fn options(
        &mut self,
        target: Uri,
        options: RequestOptions,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    ) -> DialogResult<OutgoingRequestId> {
        let request = self.make_outgoing_request(Method::Options, target, options);
        self.request(request, delegate)
    }

    /// Cancels an outgoing INVITE (RFC 3261 §9.1).
    ///
    /// A CANCEL may only follow a provisional response; while the INVITE is
    /// still Calling it is held back and sent on the first 1xx. Once a final
    /// response arrived this is a no-op.
    pub fn cancel(&mut self, id: OutgoingRequestId, options: RequestOptions) -> DialogResult<()> {
        let client = self
            .clients
            .get_mut(&id)
            .ok_or_else(|| DialogError::RequestNotFound { id })?;
        if *client.kind() != RequestKind::Invite {
            return Err(DialogError::protocol_error("only an initial INVITE can be cancelled"));
        }
        match client.state() {
            TransactionState::Calling => {
                debug!(request = %id, "deferring CANCEL until a provisional response arrives");
                client.pending_cancel = Some(options.extra_headers);
                Ok(())
            }
            TransactionState::Proceeding => self.send_cancel(id, &options.extra_headers),
            state => {
                debug!(request = %id, %state, "INVITE already completed, nothing to cancel");
                Ok(())
            }
        }
    }

    /// Sends a CANCEL held back while the INVITE was Calling.
    pub(crate) fn send_pending_cancel(&mut self, id: OutgoingRequestId) {
        let Some(extra_headers) = self
            .clients
            .get_mut(&id)
            .and_then(|client| client.pending_cancel.take())
        else {
            return;
        };
        let result = self.send_cancel(id, &extra_headers);
        self.log_failure("deferred CANCEL", result);
    }

    fn send_cancel(&mut self, id: OutgoingRequestId, extra_headers: &[(HeaderName, String)]) -> DialogResult<()> {
        let client = self
            .clients
            .get(&id)
            .ok_or_else(|| DialogError::RequestNotFound { id })?;
        let cancel = client.build_cancel(extra_headers)?;
        let branch = client.transaction_key().branch().to_string();
        let key = TransactionKey::new(branch, Method::Cancel, false);

        info!(request = %id, "sending CANCEL");
        let cancel_id = self.allocate_request_id();
        let mut events = Vec::new();
        let transaction =
            ClientTransaction::NonInvite(ClientNonInviteTransaction::start(key.clone(), cancel, self.ctx.clone(), &mut events));
        self.client_index.insert(key, cancel_id);
        self.clients.insert(
            cancel_id,
            UserAgentClient::new(cancel_id, RequestKind::Cancel, transaction, None, None),
        );
        self.dispatch(events);
        Ok(())
    }

    /// Stamps a fresh Via on `request` and starts its client transaction.
    fn start_transaction(&self, mut request: Request) -> (ClientTransaction, Vec<TransactionEvent>) {
        let branch = generate_branch();
        let via = Via::new(self.config.via_transport.clone(), self.config.via_host.clone(), branch.clone());
        request.headers.prepend(HeaderName::Via, via.to_string());

        let key = TransactionKey::new(branch, request.method.clone(), false);
        let ctx = self.ctx.clone();
        let mut events = Vec::new();
        let transaction = if request.method == Method::Invite {
            ClientTransaction::Invite(ClientInviteTransaction::start(key, request, ctx, &mut events))
        } else {
            ClientTransaction::NonInvite(ClientNonInviteTransaction::start(key, request, ctx, &mut events))
        };
        (transaction, events)
    }

    /// Creates the user-agent client for `request` under `id` and starts its
    /// transaction. Dialog bookkeeping referring to `id` must be in place
    /// before the call: a synchronous transport failure is dispatched here.
    pub(crate) fn start_client(
        &mut self,
        id: OutgoingRequestId,
        kind: RequestKind,
        request: Request,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
        dialog: Option<DialogId>,
    ) {
        let (transaction, events) = self.start_transaction(request);
        self.client_index.insert(transaction.key().clone(), id);
        self.clients
            .insert(id, UserAgentClient::new(id, kind, transaction, delegate, dialog));
        self.dispatch(events);
    }

    /// Answers a 401/407 with credentials on a new transaction (RFC 3261
    /// §22.2). Returns false when the challenge is passed on to the
    /// delegate instead: no credentials, an unusable challenge, or a second
    /// challenge for the same nonce generation.
    pub(crate) fn retry_with_credentials(&mut self, id: OutgoingRequestId, response: &Response) -> bool {
        let (challenge_header, authorization_header) = match response.status {
            StatusCode::UNAUTHORIZED => (HeaderName::WwwAuthenticate, HeaderName::Authorization),
            StatusCode::PROXY_AUTHENTICATION_REQUIRED => {
                (HeaderName::ProxyAuthenticate, HeaderName::ProxyAuthorization)
            }
            _ => return false,
        };
        let Some(credentials) = self.config.credentials.clone() else {
            return false;
        };
        let Some(value) = response.header(&challenge_header) else {
            debug!(request = %id, "challenge without {challenge_header} header");
            return false;
        };
        let challenge = match DigestChallenge::parse(value) {
            Ok(challenge) => challenge,
            Err(error) => {
                debug!(request = %id, %error, "cannot answer challenge");
                return false;
            }
        };

        let Some(client) = self.clients.get_mut(&id) else {
            return false;
        };
        if !client.auth.may_retry(challenge.stale) {
            warn!(request = %id, realm = %challenge.realm, "authentication loop detected, giving up");
            return false;
        }
        client.auth.record(challenge.stale);
        client.auth.nonce_count += 1;
        let nonce_count = client.auth.nonce_count;
        let mut request = client.request().clone();
        let dialog = client.dialog().cloned();

        let method = request.method.clone();
        let seq = match dialog.as_ref().and_then(|d| self.dialogs.get_mut(d)) {
            Some(session) => session.dialog_mut().next_local_seq(&method),
            None => match request.cseq() {
                Ok(cseq) => cseq.seq + 1,
                Err(_) => return false,
            },
        };
        request.headers.remove_first(&HeaderName::Via);
        request.headers.set(HeaderName::CSeq, CSeq::new(seq, method.clone()).to_string());
        let digest = challenge.respond(
            &credentials.username,
            &credentials.password,
            method.as_str(),
            request.uri.as_str(),
            nonce_count,
        );
        request.headers.set(authorization_header, digest.header_value());

        info!(request = %id, realm = %challenge.realm, seq, "retrying with credentials");
        let (transaction, events) = self.start_transaction(request);
        let key = transaction.key().clone();
        if let Some(client) = self.clients.get_mut(&id) {
            client.replace_transaction(transaction);
        }
        self.client_index.insert(key, id);
        self.dispatch(events);
        true
    }
}
