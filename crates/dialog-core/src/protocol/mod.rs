//! SIP protocol handlers
//!
//! Inbound traffic of the [`crate::UserAgentCore`], split by method the way
//! RFC 3261 splits it:
//!
//! - [`request_handler`]: request intake, out-of-dialog validation and
//!   default replies (RFC 3261 §8.2)
//! - [`invite_handler`]: re-INVITE admission, ACK matching and PRACK
//!   (RFC 3261 §14, RFC 3262, RFC 5407)
//! - [`update_handler`]: UPDATE admission (RFC 3311)
//! - [`bye_handler`]: dialog termination and the remaining in-dialog
//!   methods (RFC 3261 §15)
//! - [`cancel_handler`]: CANCEL matching (RFC 3261 §9.2)
//! - [`response_handler`]: responses to our own requests, dialog creation
//!   on the UAC side and digest retries

pub mod bye_handler;
pub mod cancel_handler;
pub mod invite_handler;
pub mod request_handler;
pub mod response_handler;
pub mod update_handler;
