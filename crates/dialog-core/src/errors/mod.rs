//! Error types for dialog-core
//!
//! This module defines the error types used throughout the crate: the main
//! [`DialogError`] returned by the user-agent core, plus the collaborator
//! errors for transports and session-description handlers.

pub mod dialog_errors;

pub use dialog_errors::{DescriptionError, DialogError, DialogResult, TransportError};
