//! SIP user-agent transaction and dialog engine
//!
//! This crate implements the protocol core of a SIP user agent: the four
//! RFC 3261 transaction state machines, dialogs with offer/answer tracking,
//! and the [`UserAgentCore`] that ties them to a transport.
//!
//! ## Layers
//!
//! - [`transaction`]: client/server INVITE and non-INVITE transactions,
//!   timers and the transport contract
//! - [`user_agent`]: UAC/UAS wrappers, request kinds and the delegate
//!   traits applications implement
//! - [`dialog`]: dialog state, route sets, CSeq tracking and the
//!   signaling (offer/answer) state machine
//! - [`manager`]: [`UserAgentCore`], which routes messages and timers and
//!   exposes the outward operations
//! - [`protocol`]: per-method inbound handling
//! - [`auth`]: digest authentication for 401/407 retries
//! - [`api`]: the tokio driver and a channel transport
//! - [`sdh`] and [`negotiation`]: the media collaborator contract and the
//!   helpers that recover from its failures
//!
//! The core itself is synchronous. Either drive it directly (every entry
//! point takes `&mut self`) or spawn it with [`api::UserAgent::spawn`].
//!
//! ```rust
//! use std::sync::Arc;
//! use sipua_dialog_core::api::{ChannelTransport, UserAgent};
//! use sipua_dialog_core::{RequestOptions, Uri, UserAgentCoreConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # tokio_test::block_on(async {
//! let config = UserAgentCoreConfig::new("sip:alice@example.com".parse()?, "sip:alice@192.0.2.10:5060".parse()?);
//! let (transport, mut outbound) = ChannelTransport::new(false);
//! let (agent, _task) = UserAgent::spawn(config, Arc::new(transport))?;
//!
//! let target: Uri = "sip:bob@example.com".parse()?;
//! agent.execute(move |core| core.options(target, RequestOptions::new(), None)).await??;
//! let options = outbound.recv().await.expect("OPTIONS on the wire");
//! assert!(options.starts_with("OPTIONS sip:bob@example.com SIP/2.0"));
//! # Ok(())
//! # })
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod dialog;
pub mod errors;
pub mod manager;
pub mod negotiation;
pub mod protocol;
pub mod sdh;
pub mod transaction;
pub mod user_agent;

pub use config::{Credentials, RaceConditionPolicy, UserAgentCoreConfig};
pub use dialog::{DialogId, DialogState, SessionDialog, SessionState, SignalingState};
pub use errors::{DescriptionError, DialogError, DialogResult, TransportError};
pub use manager::UserAgentCore;
pub use sdh::SessionDescriptionHandler;
pub use transaction::{TimerSettings, TransactionKey, TransactionState, Transport};
pub use user_agent::{
    AckProcessing, IncomingRequest, IncomingRequestDelegate, IncomingResponse, OutgoingRequestDelegate,
    OutgoingRequestId, RequestKind, RequestOptions, ResponseOptions, SessionDelegate, UserAgentCoreDelegate,
};

pub use sipua_sip_core::{Body, Method, NameAddr, Request, Response, StatusCode, Uri};

pub mod prelude {
    pub use crate::api::{ChannelTransport, UserAgent, UserAgentHandle};
    pub use crate::{
        AckProcessing, Body, DialogError, DialogId, DialogResult, IncomingRequest, IncomingResponse, Method,
        OutgoingRequestDelegate, OutgoingRequestId, RequestOptions, ResponseOptions, SessionDelegate, StatusCode,
        Uri, UserAgentCore, UserAgentCoreConfig, UserAgentCoreDelegate,
    };
}
