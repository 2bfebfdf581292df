//! Core user-agent implementation
//!
//! Holds the [`UserAgentCore`] struct, its construction, message intake,
//! timer routing and the dispatch of transaction events.

use std::collections::HashMap;
use std::sync::Arc;

use sipua_sip_core::{parse_message, Message, Response};
use tracing::{debug, error, info, trace, warn};

use crate::config::UserAgentCoreConfig;
use crate::dialog::{DialogId, SessionDialog};
use crate::errors::{DialogError, DialogResult};
use crate::transaction::timer::TimerOwner;
use crate::transaction::{
    TimerId, TimerService, TimerType, TransactionContext, TransactionEvent, TransactionKey, TransactionState,
    Transport,
};
use crate::user_agent::{
    IncomingRequestDelegate, OutgoingRequestDelegate, OutgoingRequestId, SessionDelegate, UserAgentClient,
    UserAgentCoreDelegate, UserAgentServer,
};

/// Transaction user of RFC 3261: owns all transactions, user-agent clients
/// and servers, and session dialogs of one user agent.
///
/// The core is synchronous. Whoever drives it feeds inbound messages to
/// [`UserAgentCore::receive_message`] and timer expiries to
/// [`UserAgentCore::handle_timer`], one at a time. See [`crate::api`] for a
/// tokio driver.
pub struct UserAgentCore {
    pub(crate) config: UserAgentCoreConfig,
    pub(crate) ctx: TransactionContext,
    pub(crate) delegate: Option<Box<dyn UserAgentCoreDelegate>>,
    pub(crate) clients: HashMap<OutgoingRequestId, UserAgentClient>,
    /// Current and retired client transactions to their owning client
    pub(crate) client_index: HashMap<TransactionKey, OutgoingRequestId>,
    pub(crate) servers: HashMap<TransactionKey, UserAgentServer>,
    pub(crate) dialogs: HashMap<DialogId, SessionDialog>,
    next_request_id: u64,
}

impl UserAgentCore {
    /// Creates a core sending through `transport` and scheduling through
    /// `timers`.
    pub fn new(
        config: UserAgentCoreConfig,
        transport: Arc<dyn Transport>,
        timers: Arc<dyn TimerService>,
    ) -> DialogResult<Self> {
        config
            .validate()
            .map_err(|message| DialogError::Configuration { message })?;
        info!(aor = %config.aor, contact = %config.contact, "creating user agent core");
        let ctx = TransactionContext::new(transport, timers, config.timers);
        Ok(Self {
            config,
            ctx,
            delegate: None,
            clients: HashMap::new(),
            client_index: HashMap::new(),
            servers: HashMap::new(),
            dialogs: HashMap::new(),
            next_request_id: 1,
        })
    }

    pub fn config(&self) -> &UserAgentCoreConfig {
        &self.config
    }

    /// Installs the delegate receiving out-of-dialog requests.
    pub fn set_delegate(&mut self, delegate: Box<dyn UserAgentCoreDelegate>) {
        self.delegate = Some(delegate);
    }

    /// Installs the delegate of one dialog's session.
    pub fn set_session_delegate(&mut self, dialog: &DialogId, delegate: Box<dyn SessionDelegate>) -> DialogResult<()> {
        let session = self
            .dialogs
            .get_mut(dialog)
            .ok_or_else(|| DialogError::DialogNotFound { id: dialog.clone() })?;
        session.delegate = Some(delegate);
        Ok(())
    }

    /// Installs the delegate of one incoming request (CANCEL and transport
    /// error notifications).
    pub fn set_incoming_request_delegate(
        &mut self,
        transaction: &TransactionKey,
        delegate: Box<dyn IncomingRequestDelegate>,
    ) -> DialogResult<()> {
        let server = self
            .servers
            .get_mut(transaction)
            .ok_or_else(|| DialogError::TransactionNotFound { key: transaction.clone() })?;
        server.delegate = Some(delegate);
        Ok(())
    }

    /// Replaces the response delegate of an outgoing request.
    pub fn set_outgoing_request_delegate(
        &mut self,
        id: OutgoingRequestId,
        delegate: Box<dyn OutgoingRequestDelegate>,
    ) -> DialogResult<()> {
        let client = self
            .clients
            .get_mut(&id)
            .ok_or_else(|| DialogError::RequestNotFound { id })?;
        client.delegate = Some(delegate);
        Ok(())
    }

    pub fn dialog(&self, id: &DialogId) -> Option<&SessionDialog> {
        self.dialogs.get(id)
    }

    pub fn dialogs(&self) -> impl Iterator<Item = &SessionDialog> {
        self.dialogs.values()
    }

    pub fn outgoing_request(&self, id: OutgoingRequestId) -> Option<&UserAgentClient> {
        self.clients.get(&id)
    }

    pub fn incoming_request(&self, transaction: &TransactionKey) -> Option<&UserAgentServer> {
        self.servers.get(transaction)
    }

    pub fn client_transaction_state(&self, id: OutgoingRequestId) -> Option<TransactionState> {
        self.clients.get(&id).map(UserAgentClient::state)
    }

    pub fn server_transaction_state(&self, transaction: &TransactionKey) -> Option<TransactionState> {
        self.servers.get(transaction).map(UserAgentServer::state)
    }

    /// Live transactions, including ones retired by authentication retries
    pub fn transaction_count(&self) -> usize {
        self.client_index.len() + self.servers.len()
    }

    /// Entry point for every message read from the transport.
    ///
    /// Unparseable messages are dropped.
    pub fn receive_message(&mut self, raw: &str) {
        match parse_message(raw) {
            Ok(Message::Request(request)) => self.receive_request(request),
            Ok(Message::Response(response)) => self.receive_response(response),
            Err(error) => debug!(%error, "dropping unparseable message"),
        }
    }

    /// Routes a response to the client transaction it matches (RFC 3261
    /// §17.1.3). Responses matching nothing are dropped.
    pub(crate) fn receive_response(&mut self, response: Response) {
        let Some(key) = TransactionKey::from_response(&response) else {
            debug!(status = %response.status, "dropping response without branch");
            return;
        };
        let Some(id) = self.client_index.get(&key).copied() else {
            debug!(transaction = %key, status = %response.status, "dropping stray response");
            return;
        };
        let mut events = Vec::new();
        match self
            .clients
            .get_mut(&id)
            .and_then(|client| client.transaction_mut(&key))
        {
            Some(transaction) => transaction.receive_response(response, &mut events),
            None => debug!(transaction = %key, "client transaction already gone"),
        }
        self.dispatch(events);
    }

    /// Entry point for timer expiries.
    pub fn handle_timer(&mut self, id: &TimerId) {
        trace!(timer = %id, "timer fired");
        let mut events = Vec::new();
        match &id.owner {
            TimerOwner::Transaction(key) if key.is_server() => match self.servers.get_mut(key) {
                Some(server) => server.transaction_mut().handle_timer(id.timer, &mut events),
                None => trace!(transaction = %key, "timer for unknown server transaction"),
            },
            TimerOwner::Transaction(key) => {
                let transaction = self
                    .client_index
                    .get(key)
                    .and_then(|id| self.clients.get_mut(id))
                    .and_then(|client| client.transaction_mut(key));
                match transaction {
                    Some(transaction) => transaction.handle_timer(id.timer, &mut events),
                    None => trace!(transaction = %key, "timer for unknown client transaction"),
                }
            }
            TimerOwner::Dialog(dialog) => match id.timer {
                TimerType::Invite2xxRetransmit => self.retransmit_accepted(dialog),
                TimerType::ReliableProvisional => self.retransmit_reliable_provisional(dialog),
                other => debug!(%dialog, timer = %other, "unexpected dialog timer"),
            },
        }
        self.dispatch(events);
    }

    /// Processes events produced by transactions, in order.
    pub(crate) fn dispatch(&mut self, events: Vec<TransactionEvent>) {
        for event in events {
            match event {
                TransactionEvent::ProvisionalResponse {
                    transaction_id,
                    response,
                }
                | TransactionEvent::SuccessResponse {
                    transaction_id,
                    response,
                }
                | TransactionEvent::FailureResponse {
                    transaction_id,
                    response,
                } => self.handle_client_response(transaction_id, response),
                TransactionEvent::TransportError { transaction_id } => {
                    warn!(transaction = %transaction_id, "transport error on server transaction");
                    self.with_server_delegate(&transaction_id, |delegate, core| {
                        delegate.on_transport_error(core, &transaction_id)
                    });
                }
                TransactionEvent::TransactionTimeout { transaction_id } => {
                    warn!(transaction = %transaction_id, "no ACK for final response");
                }
                TransactionEvent::TransactionTerminated { transaction_id } => {
                    self.transaction_terminated(&transaction_id)
                }
            }
        }
    }

    fn transaction_terminated(&mut self, key: &TransactionKey) {
        if key.is_server() {
            if self.servers.remove(key).is_some() {
                trace!(transaction = %key, "server transaction removed");
            }
            self.server_transaction_gone(key);
            return;
        }

        let Some(id) = self.client_index.remove(key) else {
            return;
        };
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        if !client.is_current(key) {
            client.remove_retired(key);
            return;
        }
        for retired in client.dispose_retired() {
            self.client_index.remove(&retired);
        }
        let Some(client) = self.clients.remove(&id) else {
            return;
        };
        trace!(request = %id, transaction = %key, "outgoing request finished");

        // Early dialogs of an INVITE that never got a 2xx go with it.
        for dialog in client.created_dialogs {
            let early = self
                .dialogs
                .get(&dialog)
                .is_some_and(|session| session.dialog().is_early());
            if early {
                debug!(%dialog, "disposing early dialog of finished INVITE");
                self.discard_dialog(&dialog);
            }
        }
    }

    /// Dialog bookkeeping when a server transaction goes away.
    fn server_transaction_gone(&mut self, key: &TransactionKey) {
        let unacked: Vec<DialogId> = self
            .dialogs
            .iter()
            .filter(|(_, session)| session.awaiting_ack() == Some(key))
            .map(|(id, _)| id.clone())
            .collect();
        for dialog in unacked {
            self.ack_timeout(&dialog, key);
        }

        for (id, session) in self.dialogs.iter_mut() {
            if session.initial_transaction.as_ref() == Some(key) {
                session.initial_transaction = None;
            }
            if session.update_uas.as_ref() == Some(key) {
                session.update_uas = None;
            }
            if session
                .reinvite_uas
                .as_ref()
                .is_some_and(|pending| &pending.transaction == key)
            {
                session.reinvite_uas = None;
            }
            if session
                .reliable
                .as_ref()
                .is_some_and(|pending| &pending.transaction == key)
            {
                session.reliable = None;
                self.ctx
                    .timers
                    .cancel(&TimerId::dialog(id, TimerType::ReliableProvisional));
            }
        }
    }

    /// No ACK arrived for a 2xx within 64*T1 (RFC 3261 §13.3.1.4).
    fn ack_timeout(&mut self, dialog: &DialogId, key: &TransactionKey) {
        warn!(%dialog, transaction = %key, "no ACK received for 2xx");
        self.ctx
            .timers
            .cancel(&TimerId::dialog(dialog, TimerType::Invite2xxRetransmit));
        if let Some(session) = self.dialogs.get_mut(dialog) {
            session.ack_wait = false;
            if session
                .reinvite_uas
                .as_ref()
                .is_some_and(|pending| &pending.transaction == key)
            {
                session.reinvite_uas = None;
            }
        }

        let handled = self
            .with_session_delegate(dialog, |delegate, core| delegate.on_ack_timeout(core, key))
            .unwrap_or(false);
        if handled || !self.dialogs.contains_key(dialog) {
            return;
        }
        if let Err(error) = self.bye(dialog, Default::default(), None) {
            warn!(%dialog, %error, "failed to send BYE after ACK timeout");
            self.discard_dialog(dialog);
        }
    }

    pub(crate) fn allocate_request_id(&mut self) -> OutgoingRequestId {
        let id = OutgoingRequestId(self.next_request_id);
        self.next_request_id += 1;
        id
    }

    /// Calls the core delegate with the delegate temporarily taken out of
    /// its slot. `None` when no delegate is installed.
    pub(crate) fn with_core_delegate<R>(
        &mut self,
        f: impl FnOnce(&mut dyn UserAgentCoreDelegate, &mut Self) -> R,
    ) -> Option<R> {
        let mut delegate = self.delegate.take()?;
        let result = f(delegate.as_mut(), self);
        if self.delegate.is_none() {
            self.delegate = Some(delegate);
        }
        Some(result)
    }

    pub(crate) fn with_session_delegate<R>(
        &mut self,
        dialog: &DialogId,
        f: impl FnOnce(&mut dyn SessionDelegate, &mut Self) -> R,
    ) -> Option<R> {
        let mut delegate = self.dialogs.get_mut(dialog)?.delegate.take()?;
        let result = f(delegate.as_mut(), self);
        if let Some(session) = self.dialogs.get_mut(dialog) {
            if session.delegate.is_none() {
                session.delegate = Some(delegate);
            }
        }
        Some(result)
    }

    pub(crate) fn with_client_delegate<R>(
        &mut self,
        id: OutgoingRequestId,
        f: impl FnOnce(&mut dyn OutgoingRequestDelegate, &mut Self) -> R,
    ) -> Option<R> {
        let mut delegate = self.clients.get_mut(&id)?.delegate.take()?;
        let result = f(delegate.as_mut(), self);
        if let Some(client) = self.clients.get_mut(&id) {
            if client.delegate.is_none() {
                client.delegate = Some(delegate);
            }
        }
        Some(result)
    }

    pub(crate) fn with_server_delegate<R>(
        &mut self,
        key: &TransactionKey,
        f: impl FnOnce(&mut dyn IncomingRequestDelegate, &mut Self) -> R,
    ) -> Option<R> {
        let mut delegate = self.servers.get_mut(key)?.delegate.take()?;
        let result = f(delegate.as_mut(), self);
        if let Some(server) = self.servers.get_mut(key) {
            if server.delegate.is_none() {
                server.delegate = Some(delegate);
            }
        }
        Some(result)
    }

    /// Logs and swallows an error from an action the core takes on its own.
    pub(crate) fn log_failure(&self, action: &str, result: DialogResult<impl Sized>) {
        if let Err(error) = result {
            error!(%error, "{action} failed");
        }
    }
}

impl std::fmt::Debug for UserAgentCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserAgentCore")
            .field("aor", &self.config.aor)
            .field("clients", &self.clients.len())
            .field("servers", &self.servers.len())
            .field("dialogs", &self.dialogs.len())
            .finish_non_exhaustive()
    }
}
