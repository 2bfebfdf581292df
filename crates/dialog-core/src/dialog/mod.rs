//! Dialog layer
//!
//! - [`DialogId`]: Call-ID plus local and remote tag
//! - [`Dialog`]: route set, CSeq counters, remote target and in-dialog
//!   request construction (RFC 3261 §12)
//! - [`OfferAnswer`]: the offer/answer signaling machine (RFC 3264)
//! - [`SessionDialog`]: the INVITE usage built from the two
//!
//! ## Dialog Lifecycle
//!
//! ```text
//!   Early ──────► Confirmed ──────► Terminated
//!    ↑               ↑                 ↑
//!   1xx with       2xx to            BYE sent/received,
//!   To tag         INVITE            481/408, ACK timeout
//! ```

pub mod dialog_id;
pub mod dialog_impl;
pub mod dialog_state;
pub mod session_dialog;
pub mod signaling;

pub use dialog_id::DialogId;
pub use dialog_impl::{is_target_refresh, Dialog, SequenceCheck};
pub use dialog_state::{DialogState, SessionState};
pub use session_dialog::{AckTarget, Admission, PendingReinvite, PendingReliable, SessionDialog};
pub use signaling::{Direction, OfferAnswer, SignalingState};
