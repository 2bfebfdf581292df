//! SIP message model for sipua
//!
//! This crate provides the structured representation of SIP requests and
//! responses used by the transaction and dialog engine, together with the
//! wire parser and serializer:
//!
//! - [`Request`], [`Response`] and [`Message`] with typed accessors through
//!   the [`SipMessage`] trait
//! - an ordered, case-insensitive header multimap ([`Headers`])
//! - typed header views ([`Via`], [`CSeq`], [`RAck`], [`NameAddr`]) and
//!   [`Body`] with content-disposition inference
//! - [`parse_message`] for inbound wire text and `Display` for outbound

pub mod error;
pub mod header;
pub mod message;
pub mod method;
pub mod parser;
pub mod status;
pub mod types;
pub mod uri;

pub use error::{Error, Result};
pub use header::{Header, HeaderName, Headers};
pub use message::{Message, Request, Response, SipMessage};
pub use method::Method;
pub use parser::parse_message;
pub use status::StatusCode;
pub use types::{Body, CSeq, NameAddr, RAck, Via, BRANCH_MAGIC_COOKIE};
pub use uri::Uri;

pub mod prelude {
    pub use crate::{
        Body, CSeq, HeaderName, Headers, Message, Method, NameAddr, RAck, Request, Response,
        SipMessage, StatusCode, Uri, Via,
    };
}
