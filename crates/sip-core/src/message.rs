//! SIP requests and responses.
//!
//! A message is plain data: start line, ordered headers and an optional
//! [`Body`]. Content-Type, Content-Disposition and Content-Length are not kept
//! in the header list; they are derived from the body when the message is
//! serialized, so the length on the wire always matches the content.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::header::{HeaderName, Headers};
use crate::method::Method;
use crate::status::StatusCode;
use crate::types::{Body, CSeq, NameAddr, Via};
use crate::uri::Uri;

pub const SIP_VERSION: &str = "SIP/2.0";

/// Typed accessors shared by requests and responses
pub trait SipMessage {
    fn headers(&self) -> &Headers;
    fn headers_mut(&mut self) -> &mut Headers;
    fn body(&self) -> Option<&Body>;

    fn header(&self, name: &HeaderName) -> Option<&str> {
        self.headers().get(name)
    }

    fn has_header(&self, name: &HeaderName) -> bool {
        self.headers().has(name)
    }

    fn call_id(&self) -> Result<&str> {
        self.header(&HeaderName::CallId)
            .map(str::trim)
            .ok_or(Error::MissingHeader(HeaderName::CallId))
    }

    fn cseq(&self) -> Result<CSeq> {
        self.header(&HeaderName::CSeq)
            .ok_or(Error::MissingHeader(HeaderName::CSeq))?
            .parse()
    }

    fn from(&self) -> Result<NameAddr> {
        self.header(&HeaderName::From)
            .ok_or(Error::MissingHeader(HeaderName::From))?
            .parse()
    }

    fn to(&self) -> Result<NameAddr> {
        self.header(&HeaderName::To)
            .ok_or(Error::MissingHeader(HeaderName::To))?
            .parse()
    }

    fn from_tag(&self) -> Option<String> {
        self.from().ok().and_then(|a| a.tag().map(str::to_string))
    }

    fn to_tag(&self) -> Option<String> {
        self.to().ok().and_then(|a| a.tag().map(str::to_string))
    }

    fn top_via(&self) -> Result<Via> {
        self.headers()
            .values(&HeaderName::Via)
            .first()
            .ok_or(Error::MissingHeader(HeaderName::Via))?
            .parse()
    }

    /// Branch parameter of the top Via
    fn branch(&self) -> Option<String> {
        self.top_via().ok().and_then(|v| v.branch().map(str::to_string))
    }

    /// First Contact, if present and parseable
    fn contact(&self) -> Option<NameAddr> {
        self.headers()
            .values(&HeaderName::Contact)
            .first()
            .and_then(|c| c.parse().ok())
    }

    fn record_route(&self) -> Vec<String> {
        self.headers().values(&HeaderName::RecordRoute)
    }

    /// Option tags of a list header such as Require or Supported
    fn option_tags(&self, name: &HeaderName) -> Vec<String> {
        self.headers()
            .values(name)
            .into_iter()
            .map(|t| t.trim().to_ascii_lowercase())
            .collect()
    }

    fn requires(&self, option: &str) -> bool {
        self.option_tags(&HeaderName::Require)
            .iter()
            .any(|t| t.eq_ignore_ascii_case(option))
    }

    fn supports(&self, option: &str) -> bool {
        self.option_tags(&HeaderName::Supported)
            .iter()
            .any(|t| t.eq_ignore_ascii_case(option))
            || self.requires(option)
    }

    /// Body that takes part in offer/answer, if any
    fn session_body(&self) -> Option<&Body> {
        self.body().filter(|b| b.is_session())
    }
}

/// A SIP request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: Headers,
    pub body: Option<Body>,
}

impl Request {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: Headers::new(),
            body: None,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }
}

impl SipMessage for Request {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }
}

/// A SIP response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    pub reason: String,
    pub headers: Headers,
    pub body: Option<Body>,
}

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            reason: status.reason_phrase().to_string(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Builds a response to `request` (RFC 3261 §8.2.6.2).
    ///
    /// Copies every Via in order plus From, To, Call-ID and CSeq. `to_tag` is
    /// added to To when the request carried none and the status is not 100.
    pub fn from_request(request: &Request, status: StatusCode, to_tag: Option<&str>) -> Self {
        let mut response = Response::new(status);
        for via in request.headers.get_all(&HeaderName::Via) {
            response.headers.append(HeaderName::Via, via);
        }
        for name in [HeaderName::From, HeaderName::To, HeaderName::CallId, HeaderName::CSeq] {
            if let Some(value) = request.headers.get(&name) {
                response.headers.append(name, value);
            }
        }
        if let (Some(tag), true) = (to_tag, status != StatusCode::TRYING) {
            if let Ok(mut to) = request.to() {
                if to.tag().is_none() {
                    to.set_param("tag", Some(tag.to_string()));
                    response.headers.set(HeaderName::To, to.to_string());
                }
            }
        }
        response
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }
}

impl SipMessage for Response {
    fn headers(&self) -> &Headers {
        &self.headers
    }

    fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }
}

/// Either a request or a response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    Request(Request),
    Response(Response),
}

fn write_headers_and_body(f: &mut fmt::Formatter<'_>, headers: &Headers, body: Option<&Body>) -> fmt::Result {
    for header in headers {
        write!(f, "{header}\r\n")?;
    }
    match body {
        Some(body) => {
            write!(f, "Content-Type: {}\r\n", body.content_type)?;
            if !body.has_default_disposition() {
                write!(f, "Content-Disposition: {}\r\n", body.content_disposition)?;
            }
            write!(f, "Content-Length: {}\r\n\r\n{}", body.content.len(), body.content)
        }
        None => write!(f, "Content-Length: 0\r\n\r\n"),
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", self.method, self.uri, SIP_VERSION)?;
        write_headers_and_body(f, &self.headers, self.body.as_ref())
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}\r\n", SIP_VERSION, self.status, self.reason)?;
        write_headers_and_body(f, &self.headers, self.body.as_ref())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Request(request) => request.fmt(f),
            Message::Response(response) => response.fmt(f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn invite() -> Request {
        Request::new(Method::Invite, "sip:bob@biloxi.example.com".parse().unwrap())
            .with_header(HeaderName::Via, "SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bKnashds8")
            .with_header(HeaderName::Via, "SIP/2.0/UDP proxy.example.com;branch=z9hG4bK1")
            .with_header(HeaderName::From, "<sip:alice@atlanta.example.com>;tag=1928301774")
            .with_header(HeaderName::To, "<sip:bob@biloxi.example.com>")
            .with_header(HeaderName::CallId, "a84b4c76e66710")
            .with_header(HeaderName::CSeq, "314159 INVITE")
            .with_body(Body::sdp("v=0\r\n"))
    }

    #[test]
    fn test_response_copies_dialog_headers_and_adds_tag() {
        let request = invite();
        let response = Response::from_request(&request, StatusCode::RINGING, Some("abc"));
        assert_eq!(response.headers.get_all(&HeaderName::Via).count(), 2);
        assert_eq!(response.to_tag().as_deref(), Some("abc"));
        assert_eq!(response.cseq().unwrap(), CSeq::new(314159, Method::Invite));

        let trying = Response::from_request(&request, StatusCode::TRYING, Some("abc"));
        assert_eq!(trying.to_tag(), None);
    }

    #[test]
    fn test_serialization_derives_content_headers() {
        let text = invite().to_string();
        assert!(text.starts_with("INVITE sip:bob@biloxi.example.com SIP/2.0\r\n"));
        assert!(text.contains("Content-Type: application/sdp\r\n"));
        assert!(!text.contains("Content-Disposition"));
        assert!(text.ends_with("Content-Length: 5\r\n\r\nv=0\r\n"));
    }

    #[test]
    fn test_typed_accessors() {
        let request = invite();
        assert_eq!(request.branch().as_deref(), Some("z9hG4bKnashds8"));
        assert_eq!(request.from_tag().as_deref(), Some("1928301774"));
        assert_eq!(request.to_tag(), None);
        assert_eq!(request.call_id().unwrap(), "a84b4c76e66710");
        assert!(request.session_body().is_some());
    }
}
