use std::fmt;

use serde::{Deserialize, Serialize};
use sipua_sip_core::{Request, Response, SipMessage};

/// Dialog identifier per RFC 3261 §12: Call-ID plus the local and remote
/// tags, seen from this user agent's side.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DialogId {
    pub call_id: String,
    pub local_tag: String,
    pub remote_tag: String,
}

impl DialogId {
    pub fn new(call_id: impl Into<String>, local_tag: impl Into<String>, remote_tag: impl Into<String>) -> Self {
        Self {
            call_id: call_id.into(),
            local_tag: local_tag.into(),
            remote_tag: remote_tag.into(),
        }
    }

    /// Id of the dialog an inbound request belongs to (local tag from To,
    /// remote tag from From). `None` unless both tags are present.
    pub fn for_incoming_request(request: &Request) -> Option<Self> {
        Some(Self::new(request.call_id().ok()?, request.to_tag()?, request.from_tag()?))
    }

    /// Id of the dialog a response to one of our requests establishes.
    pub fn for_incoming_response(response: &Response) -> Option<Self> {
        Some(Self::new(response.call_id().ok()?, response.from_tag()?, response.to_tag()?))
    }
}

impl fmt::Display for DialogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.call_id, self.local_tag, self.remote_tag)
    }
}
