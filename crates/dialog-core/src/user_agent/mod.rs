//! User-agent client and server wrappers
//!
//! Every request this user agent sends is owned by a [`UserAgentClient`] and
//! every request it receives by a [`UserAgentServer`]. Each binds exactly one
//! transaction to the method-specific behavior selected by [`RequestKind`],
//! and dispatches responses to the delegate slot matching their class:
//!
//! | Status | [`ResponseClass`] | Callback |
//! |---|---|---|
//! | 100 | Trying | `on_trying` |
//! | 101-199 | Progress | `on_progress` |
//! | 200-299 | Accept | `on_accept` |
//! | 300-399 | Redirect | `on_redirect` |
//! | 400-699 | Reject | `on_reject` |

pub mod client;
pub mod delegates;
pub mod methods;
pub mod server;

use std::fmt;

use serde::{Deserialize, Serialize};
use sipua_sip_core::{Body, HeaderName, NameAddr, Request, Response, SipMessage, StatusCode};

pub use client::{AuthenticationState, UserAgentClient};
pub use delegates::{
    AckProcessing, IncomingRequestDelegate, OutgoingRequestDelegate, SessionDelegate, UserAgentCoreDelegate,
};
pub use methods::{DefaultReply, RequestKind};
pub use server::UserAgentServer;

use crate::dialog::DialogId;
use crate::errors::{DialogError, DialogResult};
use crate::transaction::TransactionKey;

/// Handle for a request sent through the core.
///
/// Stays valid across authentication retries, which replace the underlying
/// transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutgoingRequestId(pub u64);

impl fmt::Display for OutgoingRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// Response buckets used for delegate dispatch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResponseClass {
    Trying,
    Progress,
    Accept,
    Redirect,
    Reject,
}

impl ResponseClass {
    /// Classifies a status code. Codes outside 100-699 never come out of the
    /// parser, so one showing up here is an internal error.
    pub fn classify(status: StatusCode) -> DialogResult<Self> {
        match status.as_u16() {
            100 => Ok(ResponseClass::Trying),
            101..=199 => Ok(ResponseClass::Progress),
            200..=299 => Ok(ResponseClass::Accept),
            300..=399 => Ok(ResponseClass::Redirect),
            400..=699 => Ok(ResponseClass::Reject),
            code => Err(DialogError::internal_error(format!("unclassifiable status code {code}"))),
        }
    }
}

/// Extra content for a request built by the core
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Headers appended after the ones the core generates
    pub extra_headers: Vec<(HeaderName, String)>,
    pub body: Option<Body>,
    /// To header for out-of-dialog requests (defaults to the target URI)
    pub to: Option<NameAddr>,
    /// Call-ID for out-of-dialog requests (defaults to a fresh one)
    pub call_id: Option<String>,
    /// CSeq number for out-of-dialog requests (defaults to 1)
    pub cseq: Option<u32>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.extra_headers.push((name, value.into()));
        self
    }

    pub fn with_to(mut self, to: NameAddr) -> Self {
        self.to = Some(to);
        self
    }

    pub fn with_call_id(mut self, call_id: impl Into<String>) -> Self {
        self.call_id = Some(call_id.into());
        self
    }

    pub fn with_cseq(mut self, cseq: u32) -> Self {
        self.cseq = Some(cseq);
        self
    }
}

/// A response the application asks a [`UserAgentServer`] to send
#[derive(Debug, Clone)]
pub struct ResponseOptions {
    pub status: StatusCode,
    pub reason: Option<String>,
    pub extra_headers: Vec<(HeaderName, String)>,
    pub body: Option<Body>,
    /// Send a provisional response reliably (RFC 3262)
    pub reliable: bool,
}

impl ResponseOptions {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            extra_headers: Vec::new(),
            body: None,
            reliable: false,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.extra_headers.push((name, value.into()));
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    pub fn reliable(mut self) -> Self {
        self.reliable = true;
        self
    }
}

/// A request received by the core, as shown to delegates
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    /// Server transaction to answer through [`crate::UserAgentCore::reply`]
    pub transaction: TransactionKey,
    pub request: Request,
    pub dialog: Option<DialogId>,
}

/// A response to one of our requests, as shown to delegates
#[derive(Debug, Clone)]
pub struct IncomingResponse {
    pub id: OutgoingRequestId,
    pub response: Response,
    /// Dialog the response created, confirmed or belongs to
    pub dialog: Option<DialogId>,
}

impl IncomingResponse {
    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    /// True for a provisional sent reliably (`Require: 100rel`)
    pub fn is_reliable_provisional(&self) -> bool {
        self.response.status.is_provisional()
            && self.response.status != StatusCode::TRYING
            && self.response.requires("100rel")
    }
}
