use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A SIP (or other scheme) URI kept in its wire form.
///
/// The engine only needs scheme, host and parameter lookups, so the URI is
/// validated on construction and inspected lazily.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Uri(String);

impl Uri {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn scheme(&self) -> &str {
        self.0.split(':').next().unwrap_or_default()
    }

    pub fn is_secure(&self) -> bool {
        self.scheme().eq_ignore_ascii_case("sips")
    }

    /// Everything after the scheme up to the first parameter or header.
    fn address(&self) -> &str {
        let rest = self.0.splitn(2, ':').nth(1).unwrap_or_default();
        rest.split([';', '?']).next().unwrap_or_default()
    }

    pub fn user(&self) -> Option<&str> {
        self.address().split_once('@').map(|(user, _)| user)
    }

    /// Host and optional port
    pub fn host_port(&self) -> &str {
        let address = self.address();
        address.rsplit_once('@').map(|(_, host)| host).unwrap_or(address)
    }

    fn params(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        let without_headers = self.0.split('?').next().unwrap_or_default();
        without_headers.split(';').skip(1).map(|param| match param.split_once('=') {
            Some((name, value)) => (name.trim(), Some(value.trim())),
            None => (param.trim(), None),
        })
    }

    pub fn has_param(&self, name: &str) -> bool {
        self.params().any(|(n, _)| n.eq_ignore_ascii_case(name))
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value)
    }

    /// Loose routing marker (RFC 3261 §16.12.1.1)
    pub fn is_loose_route(&self) -> bool {
        self.has_param("lr")
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Uri {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let Some((scheme, rest)) = s.split_once(':') else {
            return Err(Error::InvalidUri(s.to_string()));
        };
        let scheme_ok = scheme
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic())
            && scheme
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
        if !scheme_ok || rest.is_empty() || s.chars().any(|c| c.is_whitespace() || c == '<' || c == '>') {
            return Err(Error::InvalidUri(s.to_string()));
        }
        Ok(Uri(s.to_string()))
    }
}

impl TryFrom<&str> for Uri {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        value.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspects_parts() {
        let uri: Uri = "sip:alice@atlanta.example.com:5060;transport=tcp;lr?subject=x"
            .parse()
            .unwrap();
        assert_eq!(uri.scheme(), "sip");
        assert_eq!(uri.user(), Some("alice"));
        assert_eq!(uri.host_port(), "atlanta.example.com:5060");
        assert_eq!(uri.param("transport"), Some("tcp"));
        assert!(uri.is_loose_route());
        assert!(!uri.is_secure());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("alice".parse::<Uri>().is_err());
        assert!("sip:".parse::<Uri>().is_err());
        assert!("sip:a b".parse::<Uri>().is_err());
        assert!("1sip:x".parse::<Uri>().is_err());
    }
}
