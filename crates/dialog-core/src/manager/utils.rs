//! Identifier generation for requests and dialogs

use std::ops::RangeInclusive;

use rand::distributions::Alphanumeric;
use rand::Rng;
use sipua_sip_core::BRANCH_MAGIC_COOKIE;

/// Random alphanumeric token of `len` characters
pub fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// RFC 3261 compliant branch parameter (magic cookie + random suffix)
pub fn generate_branch() -> String {
    format!("{BRANCH_MAGIC_COOKIE}{}", random_token(12))
}

/// From/To tag
pub fn generate_tag() -> String {
    random_token(10)
}

pub fn generate_call_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Initial RSeq, uniformly chosen in 1..=2^31-1 (RFC 3262 §3)
pub fn initial_rseq() -> u32 {
    rand::thread_rng().gen_range(1..=0x7FFF_FFFF)
}

pub fn retry_after(range: RangeInclusive<u32>) -> u32 {
    if range.is_empty() {
        return *range.start();
    }
    rand::thread_rng().gen_range(range)
}
