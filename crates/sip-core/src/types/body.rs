use serde::{Deserialize, Serialize};

/// Message body with the metadata needed for offer/answer decisions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    pub content: String,
    pub content_type: String,
    pub content_disposition: String,
}

impl Body {
    /// Creates a body whose disposition is inferred from its type:
    /// `session` for SDP, `render` for everything else (RFC 3261 §20.11).
    pub fn new(content: impl Into<String>, content_type: impl Into<String>) -> Self {
        let content_type = content_type.into();
        let content_disposition = default_disposition(&content_type).to_string();
        Self {
            content: content.into(),
            content_type,
            content_disposition,
        }
    }

    pub fn sdp(content: impl Into<String>) -> Self {
        Self::new(content, "application/sdp")
    }

    pub fn with_disposition(mut self, disposition: impl Into<String>) -> Self {
        self.content_disposition = disposition.into();
        self
    }

    /// True when the body participates in offer/answer
    pub fn is_session(&self) -> bool {
        self.content_disposition.eq_ignore_ascii_case("session")
    }

    pub(crate) fn has_default_disposition(&self) -> bool {
        self.content_disposition
            .eq_ignore_ascii_case(default_disposition(&self.content_type))
    }
}

fn default_disposition(content_type: &str) -> &'static str {
    let media = content_type.split(';').next().unwrap_or_default().trim();
    if media.eq_ignore_ascii_case("application/sdp") {
        "session"
    } else {
        "render"
    }
}
