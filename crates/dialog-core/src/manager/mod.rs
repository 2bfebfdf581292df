//! User-agent core
//!
//! [`UserAgentCore`] owns every transaction, user-agent client and server,
//! and session dialog of one user agent. Its `impl` is split by concern:
//!
//! - `core`: construction, message intake, timer and event dispatch
//! - `outgoing`: out-of-dialog requests, CANCEL and digest retries
//! - `response_lifecycle`: responses we send and the dialog effects they have
//! - `dialog_operations`: requests sent inside a dialog and dialog disposal
//!
//! The inbound request and response paths live in [`crate::protocol`].

pub mod core;
pub mod dialog_operations;
pub mod outgoing;
pub mod response_lifecycle;
pub mod utils;

pub use core::UserAgentCore;
