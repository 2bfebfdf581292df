use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::header::HeaderName;
use crate::types::name_addr::parse_params;

/// Magic cookie that marks an RFC 3261 branch parameter
pub const BRANCH_MAGIC_COOKIE: &str = "z9hG4bK";

/// One Via header element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Via {
    /// Transport token, e.g. `UDP`, `TCP`, `WSS`
    pub transport: String,
    /// `host[:port]`
    pub sent_by: String,
    pub params: Vec<(String, Option<String>)>,
}

impl Via {
    pub fn new(transport: impl Into<String>, sent_by: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            sent_by: sent_by.into(),
            params: vec![("branch".to_string(), Some(branch.into()))],
        }
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.as_deref())
    }

    pub fn branch(&self) -> Option<&str> {
        self.param("branch")
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}", self.transport, self.sent_by)?;
        for (name, value) in &self.params {
            match value {
                Some(value) => write!(f, ";{name}={value}")?,
                None => write!(f, ";{name}")?,
            }
        }
        Ok(())
    }
}

impl FromStr for Via {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::invalid_header(HeaderName::Via, s);
        let s = s.trim();
        let (protocol, rest) = s.split_once(char::is_whitespace).ok_or_else(invalid)?;
        let mut parts = protocol.split('/').map(str::trim);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(name), Some("2.0"), Some(transport))
                if name.eq_ignore_ascii_case("SIP") && !transport.is_empty() =>
            {
                let rest = rest.trim();
                let (sent_by, params) = match rest.find(';') {
                    Some(i) => (rest[..i].trim(), &rest[i..]),
                    None => (rest, ""),
                };
                if sent_by.is_empty() {
                    return Err(invalid());
                }
                Ok(Via {
                    transport: transport.to_ascii_uppercase(),
                    sent_by: sent_by.to_string(),
                    params: parse_params(params),
                })
            }
            _ => Err(invalid()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_branch_and_transport() {
        let via: Via = "SIP/2.0/udp pc33.atlanta.example.com;branch=z9hG4bK776asdhds;rport"
            .parse()
            .unwrap();
        assert_eq!(via.transport, "UDP");
        assert_eq!(via.sent_by, "pc33.atlanta.example.com");
        assert_eq!(via.branch(), Some("z9hG4bK776asdhds"));
        assert!(via.params.iter().any(|(n, v)| n == "rport" && v.is_none()));
    }

    #[test]
    fn test_rejects_wrong_version() {
        assert!("SIP/1.0/UDP host;branch=x".parse::<Via>().is_err());
    }
}
