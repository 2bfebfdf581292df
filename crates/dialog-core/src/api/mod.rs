//! Async surface over the synchronous core
//!
//! [`UserAgent::spawn`] moves a [`crate::UserAgentCore`] into a tokio task
//! and hands back a [`UserAgentHandle`]. [`ChannelTransport`] is a ready
//! made transport for wiring agents to sockets or to each other.

pub mod channel_transport;
pub mod driver;

pub use channel_transport::ChannelTransport;
pub use driver::{UserAgent, UserAgentHandle};
