use std::fmt;

use serde::{Deserialize, Serialize};
use sipua_sip_core::{Method, Request, Response, SipMessage};

/// Uniquely identifies a SIP transaction.
///
/// RFC 3261 §17.1.3 / §17.2.3: a transaction is matched by the branch of the
/// top Via plus the method (from the request line, or CSeq for responses).
/// `is_server` separates the client and server sides of the same branch so a
/// UA talking to itself never confuses the two.
///
/// An ACK for a non-2xx final response shares its branch with the INVITE and
/// is keyed with `Method::Invite` so it reaches the INVITE server transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionKey {
    pub branch: String,
    pub method: Method,
    pub is_server: bool,
}

impl TransactionKey {
    pub fn new(branch: impl Into<String>, method: Method, is_server: bool) -> Self {
        Self {
            branch: branch.into(),
            method,
            is_server,
        }
    }

    /// Server-side key for an inbound request
    pub fn from_request(request: &Request) -> Option<Self> {
        let branch = request.branch().filter(|b| !b.is_empty())?;
        let method = match request.method {
            Method::Ack => Method::Invite,
            ref other => other.clone(),
        };
        Some(Self::new(branch, method, true))
    }

    /// Client-side key for an inbound response
    pub fn from_response(response: &Response) -> Option<Self> {
        let branch = response.branch().filter(|b| !b.is_empty())?;
        let cseq = response.cseq().ok()?;
        Some(Self::new(branch, cseq.method, false))
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn is_server(&self) -> bool {
        self.is_server
    }
}

impl fmt::Display for TransactionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = if self.is_server { "server" } else { "client" };
        write!(f, "{}:{}:{}", self.branch, self.method, role)
    }
}
