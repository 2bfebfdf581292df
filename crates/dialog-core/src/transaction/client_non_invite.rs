//! Non-INVITE client transaction (RFC 3261 §17.1.2)
//!
//! ```text
//!              request sent
//!                   │  Timer E: retransmit (T1 doubling to T2)
//!                   ▼  Timer F: synthetic 408
//!               ┌────────┐ 1xx ┌────────────┐
//!               │ Trying ├────►│ Proceeding │  Timer E: retransmit at T2
//!               └───┬────┘     └─────┬──────┘
//!        200-699    │                │ 200-699
//!                   ▼                ▼
//!               ┌──────────────────────┐
//!               │      Completed       │  absorbs retransmitted responses
//!               └──────────┬───────────┘
//!                          │ Timer K (T4, or 0 on reliable transports)
//!                          ▼
//!                     Terminated
//! ```

use std::time::Duration;

use sipua_sip_core::{Request, Response, StatusCode};
use tracing::{debug, trace};

use super::{
    log_transport_failure, synthetic_response, TransactionContext, TransactionEvent, TransactionKey,
    TransactionState, TimerType,
};
use crate::errors::TransportError;

const TIMERS: [TimerType; 3] = [TimerType::E, TimerType::F, TimerType::K];

/// Client transaction for every method except INVITE and ACK
#[derive(Debug)]
pub struct ClientNonInviteTransaction {
    key: TransactionKey,
    request: Request,
    state: TransactionState,
    ctx: TransactionContext,
    retransmit_interval: Duration,
}

impl ClientNonInviteTransaction {
    /// Creates the transaction in Trying and hands the request to the
    /// transport.
    pub fn start(
        key: TransactionKey,
        request: Request,
        ctx: TransactionContext,
        events: &mut Vec<TransactionEvent>,
    ) -> Self {
        let retransmit_interval = ctx.settings.t1;
        let mut tx = Self {
            key,
            request,
            state: TransactionState::Trying,
            ctx,
            retransmit_interval,
        };
        debug!(transaction = %tx.key, "sending {} request", tx.request.method);

        if let Err(error) = tx.ctx.send(&tx.request) {
            tx.on_transport_error(&error, events);
            return tx;
        }
        tx.ctx.schedule(&tx.key, TimerType::F, tx.ctx.settings.transaction_timeout);
        if !tx.ctx.reliable() {
            tx.ctx.schedule(&tx.key, TimerType::E, tx.retransmit_interval);
        }
        tx
    }

    pub fn key(&self) -> &TransactionKey {
        &self.key
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn receive_response(&mut self, response: Response, events: &mut Vec<TransactionEvent>) {
        match self.state {
            TransactionState::Trying | TransactionState::Proceeding => {
                if response.status.is_provisional() {
                    self.transition(TransactionState::Proceeding);
                    events.push(TransactionEvent::response(self.key.clone(), response));
                    return;
                }
                self.ctx.cancel_all(&self.key, &[TimerType::E, TimerType::F]);
                self.transition(TransactionState::Completed);
                events.push(TransactionEvent::response(self.key.clone(), response));

                let linger = self.ctx.settings.timer_k(self.ctx.reliable());
                if linger.is_zero() {
                    self.terminate(events);
                } else {
                    self.ctx.schedule(&self.key, TimerType::K, linger);
                }
            }
            _ => {
                trace!(transaction = %self.key, status = %response.status, "absorbing response retransmission");
            }
        }
    }

    pub fn handle_timer(&mut self, timer: TimerType, events: &mut Vec<TransactionEvent>) {
        match (timer, self.state) {
            (TimerType::E, TransactionState::Trying) => {
                if self.retransmit(events) {
                    self.retransmit_interval = (self.retransmit_interval * 2).min(self.ctx.settings.t2);
                    self.ctx.schedule(&self.key, TimerType::E, self.retransmit_interval);
                }
            }
            (TimerType::E, TransactionState::Proceeding) => {
                if self.retransmit(events) {
                    self.retransmit_interval = self.ctx.settings.t2;
                    self.ctx.schedule(&self.key, TimerType::E, self.retransmit_interval);
                }
            }
            (TimerType::F, TransactionState::Trying | TransactionState::Proceeding) => {
                debug!(transaction = %self.key, "Timer F fired, reporting 408");
                let response = synthetic_response(&self.request, StatusCode::REQUEST_TIMEOUT);
                events.push(TransactionEvent::response(self.key.clone(), response));
                self.terminate(events);
            }
            (TimerType::K, TransactionState::Completed) => self.terminate(events),
            (timer, state) => {
                trace!(transaction = %self.key, %timer, %state, "ignoring stale timer");
            }
        }
    }

    pub fn dispose(&mut self) {
        self.ctx.cancel_all(&self.key, &TIMERS);
        self.state = TransactionState::Terminated;
    }

    fn retransmit(&mut self, events: &mut Vec<TransactionEvent>) -> bool {
        trace!(transaction = %self.key, "retransmitting request");
        match self.ctx.send(&self.request) {
            Ok(()) => true,
            Err(error) => {
                self.on_transport_error(&error, events);
                false
            }
        }
    }

    fn on_transport_error(&mut self, error: &TransportError, events: &mut Vec<TransactionEvent>) {
        log_transport_failure(&self.key, error);
        if self.state.is_pending() {
            let response = synthetic_response(&self.request, StatusCode::SERVICE_UNAVAILABLE);
            events.push(TransactionEvent::response(self.key.clone(), response));
        }
        self.terminate(events);
    }

    fn transition(&mut self, next: TransactionState) {
        if self.state != next {
            debug!(transaction = %self.key, from = %self.state, to = %next, "state transition");
            self.state = next;
        }
    }

    fn terminate(&mut self, events: &mut Vec<TransactionEvent>) {
        if self.state.is_terminated() {
            return;
        }
        self.ctx.cancel_all(&self.key, &TIMERS);
        self.transition(TransactionState::Terminated);
        events.push(TransactionEvent::TransactionTerminated {
            transaction_id: self.key.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::test_support::{request, response_to, RecordingTimers, RecordingTransport};
    use sipua_sip_core::Method;

    fn start(transport: &RecordingTransport, timers: &RecordingTimers) -> (ClientNonInviteTransaction, Vec<TransactionEvent>) {
        let mut events = Vec::new();
        let request = request(Method::Options, "z9hG4bKnon1");
        let key = TransactionKey::new("z9hG4bKnon1", Method::Options, false);
        let tx = ClientNonInviteTransaction::start(key, request, transport.context(timers), &mut events);
        (tx, events)
    }

    #[test]
    fn test_visits_every_state_in_order() {
        let transport = RecordingTransport::unreliable();
        let timers = RecordingTimers::default();
        let (mut tx, mut events) = start(&transport, &timers);
        assert_eq!(tx.state(), TransactionState::Trying);
        assert!(timers.is_scheduled(TimerType::E));
        assert!(timers.is_scheduled(TimerType::F));

        tx.receive_response(response_to(tx.request(), 100), &mut events);
        assert_eq!(tx.state(), TransactionState::Proceeding);
        tx.receive_response(response_to(tx.request(), 200), &mut events);
        assert_eq!(tx.state(), TransactionState::Completed);
        assert!(timers.is_scheduled(TimerType::K));
        assert!(!timers.is_scheduled(TimerType::F));

        tx.receive_response(response_to(tx.request(), 200), &mut events);
        tx.handle_timer(TimerType::K, &mut events);
        assert_eq!(tx.state(), TransactionState::Terminated);

        let delivered = events
            .iter()
            .filter(|e| !matches!(e, TransactionEvent::TransactionTerminated { .. }))
            .count();
        assert_eq!(delivered, 2, "retransmitted final must not be delivered");
    }

    #[test]
    fn test_timer_e_backs_off_to_t2() {
        let transport = RecordingTransport::unreliable();
        let timers = RecordingTimers::default();
        let (mut tx, mut events) = start(&transport, &timers);
        let settings = tx.ctx.settings;

        let mut expected = settings.t1;
        for _ in 0..5 {
            tx.handle_timer(TimerType::E, &mut events);
            expected = (expected * 2).min(settings.t2);
            assert_eq!(timers.delay_of(TimerType::E), Some(expected));
        }
        assert_eq!(transport.sent().len(), 6);

        tx.receive_response(response_to(tx.request(), 180), &mut events);
        tx.handle_timer(TimerType::E, &mut events);
        assert_eq!(timers.delay_of(TimerType::E), Some(settings.t2));
    }

    #[test]
    fn test_timer_f_delivers_synthetic_408() {
        let transport = RecordingTransport::unreliable();
        let timers = RecordingTimers::default();
        let (mut tx, mut events) = start(&transport, &timers);
        tx.handle_timer(TimerType::F, &mut events);
        assert!(matches!(
            &events[0],
            TransactionEvent::FailureResponse { response, .. } if response.status == StatusCode::REQUEST_TIMEOUT
        ));
        assert!(matches!(events[1], TransactionEvent::TransactionTerminated { .. }));
    }

    #[test]
    fn test_send_failure_in_trying_reports_503_and_stops() {
        let transport = RecordingTransport::unreliable();
        transport.fail_sends(true);
        let timers = RecordingTimers::default();
        let (tx, events) = start(&transport, &timers);
        assert_eq!(tx.state(), TransactionState::Terminated);
        assert!(matches!(
            &events[0],
            TransactionEvent::FailureResponse { response, .. } if response.status == StatusCode::SERVICE_UNAVAILABLE
        ));
        assert!(!timers.is_scheduled(TimerType::E));
        assert!(!timers.is_scheduled(TimerType::F));
    }

    #[test]
    fn test_reliable_transport_skips_retransmission_and_linger() {
        let transport = RecordingTransport::reliable();
        let timers = RecordingTimers::default();
        let (mut tx, mut events) = start(&transport, &timers);
        assert!(!timers.is_scheduled(TimerType::E));
        tx.receive_response(response_to(tx.request(), 404), &mut events);
        assert_eq!(tx.state(), TransactionState::Terminated);
    }
}
