//! Transport over an mpsc channel
//!
//! Serialized messages are pushed to a receiver owned by whatever moves
//! bytes on the wire (a socket task, a test, another in-process agent).

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::trace;

use crate::errors::TransportError;
use crate::transaction::Transport;

#[derive(Debug)]
pub struct ChannelTransport {
    sender: mpsc::UnboundedSender<String>,
    reliable: bool,
    connected: AtomicBool,
}

impl ChannelTransport {
    pub fn new(reliable: bool) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let transport = Self {
            sender,
            reliable,
            connected: AtomicBool::new(true),
        };
        (transport, receiver)
    }

    /// Marks the transport down; later sends fail with
    /// [`TransportError::NotConnected`].
    pub fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        trace!(bytes = message.len(), "sending message");
        self.sender
            .send(message.to_string())
            .map_err(|_| TransportError::Closed)
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.sender.is_closed()
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivers_messages_in_order() {
        let (transport, mut receiver) = ChannelTransport::new(false);
        transport.send("first").unwrap();
        transport.send("second").unwrap();
        assert_eq!(receiver.try_recv().unwrap(), "first");
        assert_eq!(receiver.try_recv().unwrap(), "second");
    }

    #[test]
    fn test_fails_once_receiver_is_gone() {
        let (transport, receiver) = ChannelTransport::new(true);
        drop(receiver);
        assert!(!transport.is_connected());
        assert!(matches!(transport.send("x"), Err(TransportError::NotConnected)));
    }

    #[test]
    fn test_disconnect_rejects_sends() {
        let (transport, _receiver) = ChannelTransport::new(false);
        transport.disconnect();
        assert!(matches!(transport.send("x"), Err(TransportError::NotConnected)));
    }
}
