//! Timer identities and RFC 3261 timer durations.
//!
//! - [`TimerType`]: the lettered transaction timers plus the two dialog-level
//!   retransmission timers (2xx to INVITE, reliable provisional responses)
//! - [`TimerId`]: a timer type bound to its owner (a transaction or a dialog)
//! - [`TimerSettings`]: T1/T2/T4 and the derived waits
//!
//! Retransmission timers (A, E, G) start at T1 and double, E and G capped at
//! T2. Timeout timers (B, F, H, J, L, M) are 64×T1. Linger timers (D, I, K)
//! are zero on reliable transports.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::dialog::DialogId;
use crate::transaction::TransactionKey;

/// Specifies the type of a timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerType {
    /// INVITE client retransmission (RFC 3261 §17.1.1.2)
    A,
    /// INVITE client timeout while Calling
    B,
    /// INVITE client wait for response retransmissions in Completed
    D,
    /// Non-INVITE client retransmission (RFC 3261 §17.1.2.2)
    E,
    /// Non-INVITE client timeout
    F,
    /// INVITE server final response retransmission (RFC 3261 §17.2.1)
    G,
    /// INVITE server wait for ACK
    H,
    /// INVITE server wait for ACK retransmissions in Confirmed
    I,
    /// Non-INVITE server wait for request retransmissions (RFC 3261 §17.2.2)
    J,
    /// Non-INVITE client wait for response retransmissions
    K,
    /// INVITE server linger in Accepted (RFC 6026)
    L,
    /// INVITE client linger in Accepted (RFC 6026)
    M,
    /// Dialog-level 2xx retransmission until ACK (RFC 3261 §13.3.1.4)
    Invite2xxRetransmit,
    /// Dialog-level reliable provisional retransmission until PRACK (RFC 3262 §3)
    ReliableProvisional,
}

impl fmt::Display for TimerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerType::A => write!(f, "A"),
            TimerType::B => write!(f, "B"),
            TimerType::D => write!(f, "D"),
            TimerType::E => write!(f, "E"),
            TimerType::F => write!(f, "F"),
            TimerType::G => write!(f, "G"),
            TimerType::H => write!(f, "H"),
            TimerType::I => write!(f, "I"),
            TimerType::J => write!(f, "J"),
            TimerType::K => write!(f, "K"),
            TimerType::L => write!(f, "L"),
            TimerType::M => write!(f, "M"),
            TimerType::Invite2xxRetransmit => write!(f, "2xx-retransmit"),
            TimerType::ReliableProvisional => write!(f, "100rel-retransmit"),
        }
    }
}

/// Owner of a scheduled timer
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TimerOwner {
    Transaction(TransactionKey),
    Dialog(DialogId),
}

/// A timer bound to its owner.
///
/// Scheduling a `TimerId` that is already pending replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimerId {
    pub owner: TimerOwner,
    pub timer: TimerType,
}

impl TimerId {
    pub fn transaction(key: &TransactionKey, timer: TimerType) -> Self {
        Self {
            owner: TimerOwner::Transaction(key.clone()),
            timer,
        }
    }

    pub fn dialog(id: &DialogId, timer: TimerType) -> Self {
        Self {
            owner: TimerOwner::Dialog(id.clone()),
            timer,
        }
    }
}

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.owner {
            TimerOwner::Transaction(key) => write!(f, "Timer {} for transaction {}", self.timer, key),
            TimerOwner::Dialog(id) => write!(f, "Timer {} for dialog {}", self.timer, id),
        }
    }
}

/// Timer durations per RFC 3261 §17 and Table 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSettings {
    /// RTT estimate, initial retransmission interval
    pub t1: Duration,
    /// Maximum retransmission interval for non-INVITE requests and INVITE responses
    pub t2: Duration,
    /// Maximum duration a message may remain in the network
    pub t4: Duration,
    /// 64×T1: timers B, F, H, J, L and M
    pub transaction_timeout: Duration,
    /// Timer D on unreliable transports
    pub wait_time_d: Duration,
}

impl Default for TimerSettings {
    fn default() -> Self {
        Self::with_t1(Duration::from_millis(500))
    }
}

impl TimerSettings {
    /// Settings derived from a custom T1, keeping T2 = 4 s and T4 = 5 s.
    pub fn with_t1(t1: Duration) -> Self {
        Self {
            t1,
            t2: Duration::from_secs(4),
            t4: Duration::from_secs(5),
            transaction_timeout: t1 * 64,
            wait_time_d: Duration::from_secs(32),
        }
    }

    pub fn timer_d(&self, reliable: bool) -> Duration {
        if reliable { Duration::ZERO } else { self.wait_time_d }
    }

    pub fn timer_i(&self, reliable: bool) -> Duration {
        if reliable { Duration::ZERO } else { self.t4 }
    }

    pub fn timer_j(&self, reliable: bool) -> Duration {
        if reliable { Duration::ZERO } else { self.transaction_timeout }
    }

    pub fn timer_k(&self, reliable: bool) -> Duration {
        if reliable { Duration::ZERO } else { self.t4 }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.t1.is_zero() {
            return Err("T1 must be greater than zero".to_string());
        }
        if self.t2 < self.t1 {
            return Err("T2 must not be shorter than T1".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_follow_rfc3261() {
        let settings = TimerSettings::default();
        assert_eq!(settings.t1, Duration::from_millis(500));
        assert_eq!(settings.transaction_timeout, Duration::from_secs(32));
        assert_eq!(settings.timer_d(false), Duration::from_secs(32));
        assert_eq!(settings.timer_k(false), Duration::from_secs(5));
        assert_eq!(settings.timer_k(true), Duration::ZERO);
        assert_eq!(settings.timer_j(true), Duration::ZERO);
    }

    #[test]
    fn test_validation_rejects_inverted_intervals() {
        let mut settings = TimerSettings::with_t1(Duration::from_millis(100));
        assert!(settings.validate().is_ok());
        settings.t2 = Duration::from_millis(50);
        assert!(settings.validate().is_err());
    }
}
