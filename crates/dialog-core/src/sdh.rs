//! Session-description handler contract
//!
//! The engine never interprets bodies. Whoever owns the media side
//! implements [`SessionDescriptionHandler`]; the [`crate::negotiation`]
//! helpers drive it and turn its failures into SIP recovery actions.

use async_trait::async_trait;
use sipua_sip_core::Body;

use crate::errors::DescriptionError;

/// Media collaborator for offer/answer (RFC 3264).
///
/// Every method may fail; callers treat a failure as "the media side could
/// not accept this exchange" and recover at the SIP level.
#[async_trait]
pub trait SessionDescriptionHandler: Send {
    /// Produces a local offer, or an answer when a remote offer was set.
    async fn get_description(&mut self) -> Result<Body, DescriptionError>;

    /// Applies a remote offer or answer.
    async fn set_description(&mut self, body: &Body) -> Result<(), DescriptionError>;

    /// Whether bodies of `content_type` can be handled at all.
    fn has_description(&self, content_type: &str) -> bool;

    /// Reverts to the last stable description.
    async fn rollback_description(&mut self) -> Result<(), DescriptionError> {
        Ok(())
    }

    fn close(&mut self);
}
