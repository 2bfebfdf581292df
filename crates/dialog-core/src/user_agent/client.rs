//! User-agent client: one outgoing request and its transaction

use std::fmt;

use sipua_sip_core::{CSeq, HeaderName, Method, Request, SipMessage};

use super::delegates::OutgoingRequestDelegate;
use super::methods::RequestKind;
use super::OutgoingRequestId;
use crate::dialog::DialogId;
use crate::errors::DialogResult;
use crate::transaction::{ClientTransaction, TransactionKey, TransactionState};

/// Digest challenge bookkeeping for the one-retry-per-challenge rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthenticationState {
    /// A 401/407 has been answered with credentials
    pub challenged: bool,
    /// The challenge we answered carried `stale=true`
    pub stale: bool,
    /// Nonce count for `qop=auth`
    pub nonce_count: u32,
}

impl AuthenticationState {
    /// One retry per challenge generation: the first challenge, or a stale
    /// challenge following a non-stale one.
    pub fn may_retry(&self, stale: bool) -> bool {
        !self.challenged || (!self.stale && stale)
    }

    pub fn record(&mut self, stale: bool) {
        self.challenged = true;
        self.stale = stale;
    }
}

pub struct UserAgentClient {
    id: OutgoingRequestId,
    kind: RequestKind,
    transaction: ClientTransaction,
    /// Transactions replaced by authentication retries, kept until the
    /// current one terminates so retransmitted challenges are absorbed
    retired: Vec<ClientTransaction>,
    pub(crate) delegate: Option<Box<dyn OutgoingRequestDelegate>>,
    /// Dialog the request was sent in
    dialog: Option<DialogId>,
    /// Dialogs created by responses to an initial INVITE
    pub(crate) created_dialogs: Vec<DialogId>,
    pub(crate) auth: AuthenticationState,
    /// CANCEL requested while still Calling; sent on the first provisional
    pub(crate) pending_cancel: Option<Vec<(HeaderName, String)>>,
}

impl UserAgentClient {
    pub fn new(
        id: OutgoingRequestId,
        kind: RequestKind,
        transaction: ClientTransaction,
        delegate: Option<Box<dyn OutgoingRequestDelegate>>,
        dialog: Option<DialogId>,
    ) -> Self {
        Self {
            id,
            kind,
            transaction,
            retired: Vec::new(),
            delegate,
            dialog,
            created_dialogs: Vec::new(),
            auth: AuthenticationState::default(),
            pending_cancel: None,
        }
    }

    pub fn id(&self) -> OutgoingRequestId {
        self.id
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn dialog(&self) -> Option<&DialogId> {
        self.dialog.as_ref()
    }

    pub fn request(&self) -> &Request {
        self.transaction.request()
    }

    pub fn state(&self) -> TransactionState {
        self.transaction.state()
    }

    pub fn transaction_key(&self) -> &TransactionKey {
        self.transaction.key()
    }

    pub fn is_current(&self, key: &TransactionKey) -> bool {
        self.transaction.key() == key
    }

    /// The current transaction or a retired one
    pub fn transaction_mut(&mut self, key: &TransactionKey) -> Option<&mut ClientTransaction> {
        if self.transaction.key() == key {
            return Some(&mut self.transaction);
        }
        self.retired.iter_mut().find(|tx| tx.key() == key)
    }

    /// Swaps in the transaction of an authentication retry and returns the
    /// key of the one retired.
    pub fn replace_transaction(&mut self, transaction: ClientTransaction) -> TransactionKey {
        let old = std::mem::replace(&mut self.transaction, transaction);
        let key = old.key().clone();
        self.retired.push(old);
        key
    }

    /// Drops a retired transaction that terminated on its own.
    pub fn remove_retired(&mut self, key: &TransactionKey) -> bool {
        let before = self.retired.len();
        self.retired.retain(|tx| tx.key() != key);
        before != self.retired.len()
    }

    /// Disposes every retired transaction and returns their keys.
    pub fn dispose_retired(&mut self) -> Vec<TransactionKey> {
        self.retired
            .drain(..)
            .map(|mut tx| {
                tx.dispose();
                tx.key().clone()
            })
            .collect()
    }

    /// Builds the CANCEL for this INVITE (RFC 3261 §9.1): same Request-URI,
    /// Call-ID, From, To, Route and top Via, CSeq number with method CANCEL.
    pub fn build_cancel(&self, extra_headers: &[(HeaderName, String)]) -> DialogResult<Request> {
        let invite = self.transaction.request();
        let mut cancel = Request::new(Method::Cancel, invite.uri.clone());
        if let Some(via) = invite.headers.get(&HeaderName::Via) {
            cancel.headers.append(HeaderName::Via, via);
        }
        cancel.headers.append(HeaderName::MaxForwards, "70");
        for route in invite.headers.get_all(&HeaderName::Route) {
            cancel.headers.append(HeaderName::Route, route);
        }
        for name in [HeaderName::From, HeaderName::To, HeaderName::CallId] {
            if let Some(value) = invite.headers.get(&name) {
                cancel.headers.append(name, value);
            }
        }
        let seq = invite.cseq()?.seq;
        cancel
            .headers
            .append(HeaderName::CSeq, CSeq::new(seq, Method::Cancel).to_string());
        for (name, value) in extra_headers {
            cancel.headers.append(name.clone(), value.clone());
        }
        Ok(cancel)
    }
}

impl fmt::Debug for UserAgentClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserAgentClient")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("transaction", self.transaction.key())
            .field("state", &self.transaction.state())
            .field("retired", &self.retired.len())
            .field("dialog", &self.dialog)
            .field("has_delegate", &self.delegate.is_some())
            .finish_non_exhaustive()
    }
}
