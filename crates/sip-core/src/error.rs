use thiserror::Error;

use crate::header::HeaderName;

/// A type alias for handling `Result`s with `Error`
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while parsing or inspecting SIP messages
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Invalid SIP method token
    #[error("Invalid SIP method: {0}")]
    InvalidMethod(String),

    /// A header value could not be interpreted
    #[error("Invalid {name} header: {value}")]
    InvalidHeader {
        name: HeaderName,
        value: String,
    },

    /// A header required by the caller is absent
    #[error("Missing {0} header")]
    MissingHeader(HeaderName),

    /// Invalid SIP URI
    #[error("Invalid SIP URI: {0}")]
    InvalidUri(String),

    /// Invalid status code
    #[error("Invalid status code: {0}")]
    InvalidStatusCode(u16),

    /// The wire text is not a SIP message
    #[error("Parser error: {0}")]
    Parser(String),
}

impl Error {
    pub(crate) fn invalid_header(name: HeaderName, value: impl Into<String>) -> Self {
        Error::InvalidHeader {
            name,
            value: value.into(),
        }
    }
}

impl From<nom::Err<nom::error::Error<&str>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&str>>) -> Self {
        Error::Parser(format!("Parsing failed: {err}"))
    }
}
