//! Offer/answer signaling state machine (RFC 3264, RFC 6337)
//!
//! ```text
//!                  send offer                    receive answer
//!   Initial/Stable ──────────► HaveLocalOffer ───────────────► Stable
//!   Initial/Stable ──────────► HaveRemoteOffer ──────────────► Stable
//!                 receive offer                   send answer
//! ```
//!
//! Only session bodies (`Content-Disposition: session`) move the machine. A
//! second offer from the side that already has one outstanding is ignored, so
//! a dialog never carries two offers at once. Leaving Stable snapshots the
//! current offer/answer pair; [`OfferAnswer::rollback`] restores it.

use std::fmt;

use serde::{Deserialize, Serialize};
use sipua_sip_core::Body;
use tracing::trace;

/// Offer/answer state of a session dialog
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalingState {
    #[default]
    Initial,
    HaveLocalOffer,
    HaveRemoteOffer,
    Stable,
    Closed,
}

impl fmt::Display for SignalingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SignalingState::Initial => "Initial",
            SignalingState::HaveLocalOffer => "HaveLocalOffer",
            SignalingState::HaveRemoteOffer => "HaveRemoteOffer",
            SignalingState::Stable => "Stable",
            SignalingState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Which side a body came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Carried by a request or response we received
    Incoming,
    /// Carried by a request or response we sent
    Outgoing,
}

#[derive(Debug, Clone, Default)]
pub struct OfferAnswer {
    state: SignalingState,
    offer: Option<Body>,
    answer: Option<Body>,
    rollback: Option<(Body, Body)>,
}

impl OfferAnswer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SignalingState {
        self.state
    }

    pub fn offer(&self) -> Option<&Body> {
        self.offer.as_ref()
    }

    pub fn answer(&self) -> Option<&Body> {
        self.answer.as_ref()
    }

    /// An offer has been made and not yet answered
    pub fn offer_outstanding(&self) -> bool {
        matches!(
            self.state,
            SignalingState::HaveLocalOffer | SignalingState::HaveRemoteOffer
        )
    }

    /// Applies a message body. Bodies that are not session descriptions are
    /// ignored. Returns the resulting state.
    pub fn transition(&mut self, direction: Direction, body: Option<&Body>) -> SignalingState {
        let Some(body) = body.filter(|b| b.is_session()) else {
            return self.state();
        };
        let current = self.state();

        if current == SignalingState::Stable {
            if let (Some(offer), Some(answer)) = (&self.offer, &self.answer) {
                self.rollback = Some((offer.clone(), answer.clone()));
            }
        }

        let next = match (current, direction) {
            (SignalingState::Initial | SignalingState::Stable, Direction::Incoming) => {
                self.offer = Some(body.clone());
                self.answer = None;
                SignalingState::HaveRemoteOffer
            }
            (SignalingState::Initial | SignalingState::Stable, Direction::Outgoing) => {
                self.offer = Some(body.clone());
                self.answer = None;
                SignalingState::HaveLocalOffer
            }
            (SignalingState::HaveLocalOffer, Direction::Incoming)
            | (SignalingState::HaveRemoteOffer, Direction::Outgoing) => {
                self.answer = Some(body.clone());
                SignalingState::Stable
            }
            (state, _) => {
                trace!(%state, ?direction, "ignoring session body");
                state
            }
        };
        if next != current {
            trace!(from = %current, to = %next, "signaling transition");
        }
        self.state = next;
        next
    }

    /// Returns to the last Stable offer/answer pair if an offer is
    /// outstanding and a snapshot exists; otherwise does nothing.
    pub fn rollback(&mut self) -> SignalingState {
        if self.offer_outstanding() {
            if let Some((offer, answer)) = self.rollback.clone() {
                trace!(from = %self.state(), "signaling rollback to Stable");
                self.offer = Some(offer);
                self.answer = Some(answer);
                self.state = SignalingState::Stable;
            }
        }
        self.state()
    }

    pub fn close(&mut self) {
        self.state = SignalingState::Closed;
        self.offer = None;
        self.answer = None;
        self.rollback = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sdp(n: u32) -> Body {
        Body::sdp(format!("v=0\r\no=- {n} 0 IN IP4 0.0.0.0\r\n"))
    }

    #[test]
    fn test_uac_offer_then_answer_reaches_stable() {
        let mut oa = OfferAnswer::new();
        assert_eq!(oa.transition(Direction::Outgoing, Some(&sdp(1))), SignalingState::HaveLocalOffer);
        assert_eq!(oa.transition(Direction::Incoming, Some(&sdp(2))), SignalingState::Stable);
        assert_eq!(oa.offer(), Some(&sdp(1)));
        assert_eq!(oa.answer(), Some(&sdp(2)));
    }

    #[test]
    fn test_second_local_offer_is_ignored() {
        let mut oa = OfferAnswer::new();
        oa.transition(Direction::Outgoing, Some(&sdp(1)));
        assert_eq!(oa.transition(Direction::Outgoing, Some(&sdp(9))), SignalingState::HaveLocalOffer);
        assert_eq!(oa.offer(), Some(&sdp(1)));
    }

    #[test]
    fn test_render_bodies_do_not_count() {
        let mut oa = OfferAnswer::new();
        let text = Body::new("hello", "text/plain");
        assert_eq!(oa.transition(Direction::Incoming, Some(&text)), SignalingState::Initial);
        assert_eq!(oa.transition(Direction::Incoming, None), SignalingState::Initial);
    }

    #[test]
    fn test_rollback_restores_last_stable_pair() {
        let mut oa = OfferAnswer::new();
        oa.transition(Direction::Outgoing, Some(&sdp(0)));
        oa.transition(Direction::Incoming, Some(&sdp(1)));

        oa.transition(Direction::Outgoing, Some(&sdp(2)));
        assert_eq!(oa.state(), SignalingState::HaveLocalOffer);
        assert_eq!(oa.rollback(), SignalingState::Stable);
        assert_eq!(oa.offer(), Some(&sdp(0)));
        assert_eq!(oa.answer(), Some(&sdp(1)));
    }

    #[test]
    fn test_rollback_without_snapshot_is_a_no_op() {
        let mut oa = OfferAnswer::new();
        oa.transition(Direction::Incoming, Some(&sdp(0)));
        assert_eq!(oa.rollback(), SignalingState::HaveRemoteOffer);
        assert_eq!(oa.offer(), Some(&sdp(0)));
    }

    #[derive(Debug, Clone)]
    enum Op {
        Send(u32),
        Receive(u32),
        Rollback,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u32..100).prop_map(Op::Send),
            (0u32..100).prop_map(Op::Receive),
            Just(Op::Rollback),
        ]
    }

    proptest! {
        #[test]
        fn test_never_two_outstanding_offers(ops in proptest::collection::vec(op(), 0..40)) {
            let mut oa = OfferAnswer::new();
            for op in ops {
                let before = oa.state();
                let offer_before = oa.offer().cloned();
                match op {
                    Op::Send(n) => { oa.transition(Direction::Outgoing, Some(&sdp(n))); }
                    Op::Receive(n) => { oa.transition(Direction::Incoming, Some(&sdp(n))); }
                    Op::Rollback => { oa.rollback(); }
                }
                match oa.state() {
                    SignalingState::Initial => prop_assert!(oa.offer().is_none() && oa.answer().is_none()),
                    SignalingState::HaveLocalOffer | SignalingState::HaveRemoteOffer => {
                        prop_assert!(oa.offer().is_some());
                        prop_assert!(oa.answer().is_none());
                    }
                    SignalingState::Stable => prop_assert!(oa.offer().is_some() && oa.answer().is_some()),
                    SignalingState::Closed => {}
                }
                // an outstanding offer is only ever replaced by reaching Stable first
                if before == oa.state() && matches!(before, SignalingState::HaveLocalOffer | SignalingState::HaveRemoteOffer) {
                    prop_assert_eq!(oa.offer().cloned(), offer_before);
                }
            }
        }
    }
}
