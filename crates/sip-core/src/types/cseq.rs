use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::header::HeaderName;
use crate::method::Method;

/// Typed CSeq header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl CSeq {
    pub fn new(seq: u32, method: Method) -> Self {
        Self { seq, method }
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method)
    }
}

impl FromStr for CSeq {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next(), parts.next()) {
            (Some(seq), Some(method), None) => {
                let seq = seq
                    .parse::<u32>()
                    .map_err(|_| Error::invalid_header(HeaderName::CSeq, s))?;
                Ok(CSeq::new(seq, method.parse()?))
            }
            _ => Err(Error::invalid_header(HeaderName::CSeq, s)),
        }
    }
}

/// Typed RAck header (RFC 3262 §7.2)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RAck {
    pub rseq: u32,
    pub cseq: u32,
    pub method: Method,
}

impl fmt::Display for RAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.rseq, self.cseq, self.method)
    }
}

impl FromStr for RAck {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::invalid_header(HeaderName::RAck, s);
        let mut parts = s.split_whitespace();
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(rseq), Some(cseq), Some(method), None) => Ok(RAck {
                rseq: rseq.parse().map_err(|_| invalid())?,
                cseq: cseq.parse().map_err(|_| invalid())?,
                method: method.parse()?,
            }),
            _ => Err(invalid()),
        }
    }
}
