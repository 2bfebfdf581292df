//! Header names and the ordered header multimap.
//!
//! Header names compare case-insensitively and compact forms (`v`, `i`,
//! `f`, ...) are expanded on parse, so `HeaderName` equality is the only
//! comparison callers ever need. `Headers` keeps every line in insertion
//! order; list-valued headers (Via, Route, Record-Route, Contact, ...) may
//! arrive either as repeated lines or comma separated in one line and
//! `Headers::values` flattens both shapes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Name of a SIP header
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeaderName {
    Accept,
    Allow,
    AllowEvents,
    Authorization,
    CallId,
    Contact,
    ContentDisposition,
    ContentEncoding,
    ContentLength,
    ContentType,
    CSeq,
    Event,
    Expires,
    From,
    MaxForwards,
    MinExpires,
    ProxyAuthenticate,
    ProxyAuthorization,
    RAck,
    Reason,
    RecordRoute,
    RecvInfo,
    ReferTo,
    ReferredBy,
    Require,
    RetryAfter,
    Route,
    RSeq,
    SessionExpires,
    Subject,
    SubscriptionState,
    Supported,
    To,
    Unsupported,
    UserAgent,
    Via,
    Warning,
    WwwAuthenticate,
    /// Any other header, stored lower-cased
    Other(String),
}

impl HeaderName {
    pub fn as_str(&self) -> &str {
        match self {
            HeaderName::Accept => "Accept",
            HeaderName::Allow => "Allow",
            HeaderName::AllowEvents => "Allow-Events",
            HeaderName::Authorization => "Authorization",
            HeaderName::CallId => "Call-ID",
            HeaderName::Contact => "Contact",
            HeaderName::ContentDisposition => "Content-Disposition",
            HeaderName::ContentEncoding => "Content-Encoding",
            HeaderName::ContentLength => "Content-Length",
            HeaderName::ContentType => "Content-Type",
            HeaderName::CSeq => "CSeq",
            HeaderName::Event => "Event",
            HeaderName::Expires => "Expires",
            HeaderName::From => "From",
            HeaderName::MaxForwards => "Max-Forwards",
            HeaderName::MinExpires => "Min-Expires",
            HeaderName::ProxyAuthenticate => "Proxy-Authenticate",
            HeaderName::ProxyAuthorization => "Proxy-Authorization",
            HeaderName::RAck => "RAck",
            HeaderName::Reason => "Reason",
            HeaderName::RecordRoute => "Record-Route",
            HeaderName::RecvInfo => "Recv-Info",
            HeaderName::ReferTo => "Refer-To",
            HeaderName::ReferredBy => "Referred-By",
            HeaderName::Require => "Require",
            HeaderName::RetryAfter => "Retry-After",
            HeaderName::Route => "Route",
            HeaderName::RSeq => "RSeq",
            HeaderName::SessionExpires => "Session-Expires",
            HeaderName::Subject => "Subject",
            HeaderName::SubscriptionState => "Subscription-State",
            HeaderName::Supported => "Supported",
            HeaderName::To => "To",
            HeaderName::Unsupported => "Unsupported",
            HeaderName::UserAgent => "User-Agent",
            HeaderName::Via => "Via",
            HeaderName::Warning => "Warning",
            HeaderName::WwwAuthenticate => "WWW-Authenticate",
            HeaderName::Other(name) => name,
        }
    }

    /// Headers whose value is a comma separated list (RFC 3261 §7.3.1).
    pub fn is_list(&self) -> bool {
        matches!(
            self,
            HeaderName::Via
                | HeaderName::Route
                | HeaderName::RecordRoute
                | HeaderName::Contact
                | HeaderName::Allow
                | HeaderName::Supported
                | HeaderName::Require
                | HeaderName::Unsupported
                | HeaderName::RecvInfo
                | HeaderName::AllowEvents
        )
    }
}

impl fmt::Display for HeaderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeaderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.chars().all(crate::parser::is_token_char) {
            return Err(Error::Parser(format!("invalid header name '{s}'")));
        }
        let lower = s.to_ascii_lowercase();
        let name = match lower.as_str() {
            "accept" => HeaderName::Accept,
            "allow" => HeaderName::Allow,
            "allow-events" | "u" => HeaderName::AllowEvents,
            "authorization" => HeaderName::Authorization,
            "call-id" | "i" => HeaderName::CallId,
            "contact" | "m" => HeaderName::Contact,
            "content-disposition" => HeaderName::ContentDisposition,
            "content-encoding" | "e" => HeaderName::ContentEncoding,
            "content-length" | "l" => HeaderName::ContentLength,
            "content-type" | "c" => HeaderName::ContentType,
            "cseq" => HeaderName::CSeq,
            "event" | "o" => HeaderName::Event,
            "expires" => HeaderName::Expires,
            "from" | "f" => HeaderName::From,
            "max-forwards" => HeaderName::MaxForwards,
            "min-expires" => HeaderName::MinExpires,
            "proxy-authenticate" => HeaderName::ProxyAuthenticate,
            "proxy-authorization" => HeaderName::ProxyAuthorization,
            "rack" => HeaderName::RAck,
            "reason" => HeaderName::Reason,
            "record-route" => HeaderName::RecordRoute,
            "recv-info" => HeaderName::RecvInfo,
            "refer-to" | "r" => HeaderName::ReferTo,
            "referred-by" | "b" => HeaderName::ReferredBy,
            "require" => HeaderName::Require,
            "retry-after" => HeaderName::RetryAfter,
            "route" => HeaderName::Route,
            "rseq" => HeaderName::RSeq,
            "session-expires" | "x" => HeaderName::SessionExpires,
            "subject" | "s" => HeaderName::Subject,
            "subscription-state" => HeaderName::SubscriptionState,
            "supported" | "k" => HeaderName::Supported,
            "to" | "t" => HeaderName::To,
            "unsupported" => HeaderName::Unsupported,
            "user-agent" => HeaderName::UserAgent,
            "via" | "v" => HeaderName::Via,
            "warning" => HeaderName::Warning,
            "www-authenticate" => HeaderName::WwwAuthenticate,
            _ => HeaderName::Other(lower),
        };
        Ok(name)
    }
}

/// A single header line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: HeaderName,
    pub value: String,
}

impl Header {
    pub fn new(name: HeaderName, value: impl Into<String>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// Ordered header multimap
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    entries: Vec<Header>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn has(&self, name: &HeaderName) -> bool {
        self.entries.iter().any(|h| &h.name == name)
    }

    /// First raw value of `name`
    pub fn get(&self, name: &HeaderName) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| &h.name == name)
            .map(|h| h.value.as_str())
    }

    /// Every raw line value of `name`, in order
    pub fn get_all<'a>(&'a self, name: &'a HeaderName) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |h| &h.name == name)
            .map(|h| h.value.as_str())
    }

    /// Every list element of `name` across all lines, in order.
    pub fn values(&self, name: &HeaderName) -> Vec<String> {
        self.get_all(name).flat_map(split_list).collect()
    }

    /// Adds a line after all existing lines.
    pub fn append(&mut self, name: HeaderName, value: impl Into<String>) {
        self.entries.push(Header::new(name, value));
    }

    /// Adds a line above the first existing line of the same name, or at the
    /// top when there is none. Used for Via and Route insertion.
    pub fn prepend(&mut self, name: HeaderName, value: impl Into<String>) {
        let index = self
            .entries
            .iter()
            .position(|h| h.name == name)
            .unwrap_or(0);
        self.entries.insert(index, Header::new(name, value));
    }

    /// Replaces every line of `name` with a single line kept at the position
    /// of the first one.
    pub fn set(&mut self, name: HeaderName, value: impl Into<String>) {
        let value = value.into();
        match self.entries.iter().position(|h| h.name == name) {
            Some(index) => {
                self.entries[index].value = value;
                let mut seen = 0usize;
                self.entries.retain(|h| {
                    if h.name != name {
                        return true;
                    }
                    seen += 1;
                    seen == 1
                });
            }
            None => self.entries.push(Header::new(name, value)),
        }
    }

    /// Removes every line of `name`, returning how many were removed.
    pub fn remove(&mut self, name: &HeaderName) -> usize {
        let before = self.entries.len();
        self.entries.retain(|h| &h.name != name);
        before - self.entries.len()
    }

    /// Removes the first list element of `name`.
    ///
    /// When the first line carries several comma separated elements only the
    /// leading element is removed and the rest of the line is kept.
    pub fn remove_first(&mut self, name: &HeaderName) -> Option<String> {
        let index = self.entries.iter().position(|h| &h.name == name)?;
        let mut elements = split_list(&self.entries[index].value);
        if elements.is_empty() {
            self.entries.remove(index);
            return None;
        }
        let first = elements.remove(0);
        if elements.is_empty() {
            self.entries.remove(index);
        } else {
            self.entries[index].value = elements.join(", ");
        }
        Some(first)
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Splits a list-valued header on commas that are outside quoted strings and
/// angle brackets.
pub fn split_list(value: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;
    let mut escaped = false;

    for c in value.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                escaped = true;
                current.push(c);
            }
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            '<' if !in_quotes => {
                in_angle = true;
                current.push(c);
            }
            '>' if !in_quotes => {
                in_angle = false;
                current.push(c);
            }
            ',' if !in_quotes && !in_angle => {
                let item = current.trim();
                if !item.is_empty() {
                    items.push(item.to_string());
                }
                current.clear();
            }
            _ => current.push(c),
        }
    }
    let item = current.trim();
    if !item.is_empty() {
        items.push(item.to_string());
    }
    items
}
