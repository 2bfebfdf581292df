//! User-agent server: one incoming request and its transaction

use std::fmt;

use sipua_sip_core::{HeaderName, Request, Response, SipMessage};

use super::delegates::IncomingRequestDelegate;
use super::methods::RequestKind;
use super::{IncomingRequest, ResponseOptions};
use crate::dialog::DialogId;
use crate::transaction::{ServerTransaction, TransactionKey, TransactionState};

pub struct UserAgentServer {
    kind: RequestKind,
    transaction: ServerTransaction,
    pub(crate) delegate: Option<Box<dyn IncomingRequestDelegate>>,
    /// To tag used in every response except 100
    local_tag: String,
    pub(crate) dialog: Option<DialogId>,
}

impl UserAgentServer {
    pub fn new(kind: RequestKind, transaction: ServerTransaction, local_tag: String, dialog: Option<DialogId>) -> Self {
        Self {
            kind,
            transaction,
            delegate: None,
            local_tag,
            dialog,
        }
    }

    pub fn kind(&self) -> &RequestKind {
        &self.kind
    }

    pub fn key(&self) -> &TransactionKey {
        self.transaction.key()
    }

    pub fn request(&self) -> &Request {
        self.transaction.request()
    }

    pub fn state(&self) -> TransactionState {
        self.transaction.state()
    }

    pub fn local_tag(&self) -> &str {
        &self.local_tag
    }

    pub fn dialog(&self) -> Option<&DialogId> {
        self.dialog.as_ref()
    }

    pub fn transaction_mut(&mut self) -> &mut ServerTransaction {
        &mut self.transaction
    }

    pub fn incoming(&self) -> IncomingRequest {
        IncomingRequest {
            transaction: self.key().clone(),
            request: self.request().clone(),
            dialog: self.dialog.clone(),
        }
    }

    /// Builds a response (RFC 3261 §8.2.6.2).
    ///
    /// `contact` is added to INVITE responses from 101 to 299 together with
    /// the request's Record-Route, and to 2xx responses of UPDATE.
    pub fn build_response(&self, options: &ResponseOptions, contact: &str) -> Response {
        let status = options.status;
        let request = self.request();
        let mut response = Response::from_request(request, status, Some(&self.local_tag));
        if let Some(reason) = &options.reason {
            response.reason = reason.clone();
        }

        let code = status.as_u16();
        let dialog_forming = self.kind.is_invite() && (101..300).contains(&code);
        if dialog_forming {
            for route in request.headers.get_all(&HeaderName::RecordRoute) {
                response.headers.append(HeaderName::RecordRoute, route);
            }
        }
        if dialog_forming || (self.kind == RequestKind::Update && status.is_success()) {
            response.headers.append(HeaderName::Contact, contact);
        }

        for (name, value) in &options.extra_headers {
            response.headers.append(name.clone(), value.clone());
        }
        response.body = options.body.clone();
        response
    }

    /// True if the request advertised support for reliable provisionals
    pub fn supports_100rel(&self) -> bool {
        self.request().supports("100rel")
    }

    pub fn is_pending(&self) -> bool {
        self.transaction.state().is_pending()
    }
}

impl fmt::Debug for UserAgentServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserAgentServer")
            .field("kind", &self.kind)
            .field("transaction", self.transaction.key())
            .field("state", &self.transaction.state())
            .field("local_tag", &self.local_tag)
            .field("dialog", &self.dialog)
            .finish_non_exhaustive()
    }
}
