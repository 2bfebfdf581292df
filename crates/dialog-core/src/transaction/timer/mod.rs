//! Timers used by transactions and session dialogs

pub mod service;
pub mod types;

pub use service::{TimerExpiry, TimerService, TokioTimerService};
pub use types::{TimerId, TimerOwner, TimerSettings, TimerType};
