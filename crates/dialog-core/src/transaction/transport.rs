//! Transport collaborator contract.

use crate::errors::TransportError;

/// Sends serialized SIP messages.
///
/// Implementations never block; a failed send is reported synchronously and
/// the transaction layer turns it into a synthetic 503.
pub trait Transport: Send + Sync {
    fn send(&self, message: &str) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;

    /// Reliable transports (TCP, TLS, WebSocket) disable retransmission
    /// timers and zero the linger timers.
    fn is_reliable(&self) -> bool;
}
