//! Digest authentication (RFC 2617, RFC 3261 §22)

pub mod digest;

pub use digest::{DigestChallenge, DigestResponse};
