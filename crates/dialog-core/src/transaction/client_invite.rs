//! INVITE client transaction (RFC 3261 §17.1.1, RFC 6026 §7.2)
//!
//! ```text
//!                INVITE sent
//!                    │  Timer A: retransmit (T1, doubling)
//!                    ▼  Timer B: synthetic 408
//!               ┌─────────┐  1xx  ┌────────────┐
//!               │ Calling ├──────►│ Proceeding │◄── 1xx
//!               └──┬───┬──┘       └──┬──────┬──┘
//!            2xx   │   │ 300-699     │      │ 2xx
//!       ┌──────────┘   └──────┐  ┌───┘      └──────────┐
//!       ▼                     ▼  ▼ 300-699             ▼
//!  ┌──────────┐          ┌───────────┐           ┌──────────┐
//!  │ Accepted │          │ Completed │ send ACK  │ Accepted │
//!  └────┬─────┘          └─────┬─────┘           └────┬─────┘
//!       │ Timer M              │ Timer D              │ Timer M
//!       ▼                      ▼                      ▼
//!                        Terminated
//! ```
//!
//! The ACK for a 2xx belongs to the dialog and is never sent from here. In
//! Accepted every 2xx, retransmissions included, is handed up so the dialog
//! can re-send its ACK.

use std::time::Duration;

use sipua_sip_core::{HeaderName, Method, Request, Response, SipMessage, StatusCode};
use tracing::{debug, trace};

use super::{
    log_transport_failure, synthetic_response, TransactionContext, TransactionEvent, TransactionKey,
    TransactionState, TimerType,
};
use crate::errors::TransportError;

const TIMERS: [TimerType; 4] = [TimerType::A, TimerType::B, TimerType::D, TimerType::M];

#[derive(Debug)]
pub struct ClientInviteTransaction {
    key: TransactionKey,
    request: Request,
    state: TransactionState,
    ctx: TransactionContext,
    retransmit_interval: Duration,
    ack: Option<Request>,
}

impl ClientInviteTransaction {
    /// Creates the transaction in Calling and sends the INVITE.
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
            state: TransactionState::Calling,
            ctx,
            retransmit_interval,
            ack: None,
        };
        debug!(transaction = %tx.key, uri = %tx.request.uri, "sending INVITE");

        if let Err(error) = tx.ctx.send(&tx.request) {
            tx.on_transport_error(&error, events);
            return tx;
        }
        tx.ctx.schedule(&tx.key, TimerType::B, tx.ctx.settings.transaction_timeout);
        if !tx.ctx.reliable() {
            tx.ctx.schedule(&tx.key, TimerType::A, tx.retransmit_interval);
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
        let status = response.status;
        match self.state {
            TransactionState::Calling | TransactionState::Proceeding => {
                if status.is_provisional() {
                    self.ctx.cancel_all(&self.key, &[TimerType::A, TimerType::B]);
                    self.transition(TransactionState::Proceeding);
                    events.push(TransactionEvent::response(self.key.clone(), response));
                } else if status.is_success() {
                    self.ctx.cancel_all(&self.key, &[TimerType::A, TimerType::B]);
                    self.transition(TransactionState::Accepted);
                    self.ctx.schedule(&self.key, TimerType::M, self.ctx.settings.transaction_timeout);
                    events.push(TransactionEvent::response(self.key.clone(), response));
                } else {
                    self.ctx.cancel_all(&self.key, &[TimerType::A, TimerType::B]);
                    self.transition(TransactionState::Completed);
                    self.ack = Some(self.build_ack(&response));
                    // The final response goes up even when its ACK cannot be sent.
                    events.push(TransactionEvent::response(self.key.clone(), response));
                    if !self.send_ack(events) {
                        return;
                    }

                    let linger = self.ctx.settings.timer_d(self.ctx.reliable());
                    if linger.is_zero() {
                        self.terminate(events);
                    } else {
                        self.ctx.schedule(&self.key, TimerType::D, linger);
                    }
                }
            }
            TransactionState::Accepted if status.is_success() => {
                trace!(transaction = %self.key, "2xx retransmission in Accepted");
                events.push(TransactionEvent::response(self.key.clone(), response));
            }
            TransactionState::Completed if status.is_final() && !status.is_success() => {
                trace!(transaction = %self.key, %status, "final response retransmission, resending ACK");
                self.send_ack(events);
            }
            _ => {
                trace!(transaction = %self.key, %status, state = %self.state, "dropping response");
            }
        }
    }

    pub fn handle_timer(&mut self, timer: TimerType, events: &mut Vec<TransactionEvent>) {
        match (timer, self.state) {
            (TimerType::A, TransactionState::Calling) => {
                trace!(transaction = %self.key, "retransmitting INVITE");
                if let Err(error) = self.ctx.send(&self.request) {
                    self.on_transport_error(&error, events);
                    return;
                }
                self.retransmit_interval *= 2;
                self.ctx.schedule(&self.key, TimerType::A, self.retransmit_interval);
            }
            (TimerType::B, TransactionState::Calling) => {
                debug!(transaction = %self.key, "Timer B fired, reporting 408");
                let response = synthetic_response(&self.request, StatusCode::REQUEST_TIMEOUT);
                events.push(TransactionEvent::response(self.key.clone(), response));
                self.terminate(events);
            }
            (TimerType::D, TransactionState::Completed) | (TimerType::M, TransactionState::Accepted) => {
                self.terminate(events)
            }
            (timer, state) => {
                trace!(transaction = %self.key, %timer, %state, "ignoring stale timer");
            }
        }
    }

    pub fn dispose(&mut self) {
        self.ctx.cancel_all(&self.key, &TIMERS);
        self.state = TransactionState::Terminated;
    }

    /// ACK for a non-2xx final response (RFC 3261 §17.1.1.3): same
    /// Request-URI, Call-ID, From and top Via as the INVITE, To from the
    /// response, the INVITE's Route set, CSeq number unchanged.
    fn build_ack(&self, response: &Response) -> Request {
        let mut ack = Request::new(Method::Ack, self.request.uri.clone());
        if let Some(via) = self.request.headers.values(&HeaderName::Via).into_iter().next() {
            ack.headers.append(HeaderName::Via, via);
        }
        ack.headers.append(HeaderName::MaxForwards, "70");
        for route in self.request.headers.get_all(&HeaderName::Route) {
            ack.headers.append(HeaderName::Route, route);
        }
        for name in [HeaderName::From, HeaderName::CallId] {
            if let Some(value) = self.request.headers.get(&name) {
                ack.headers.append(name, value);
            }
        }
        if let Some(to) = response.headers.get(&HeaderName::To) {
            ack.headers.append(HeaderName::To, to);
        }
        let seq = self.request.cseq().map(|c| c.seq).unwrap_or_default();
        ack.headers.append(HeaderName::CSeq, format!("{seq} ACK"));
        ack
    }

    fn send_ack(&mut self, events: &mut Vec<TransactionEvent>) -> bool {
        let Some(ack) = &self.ack else {
            return true;
        };
        match self.ctx.send(ack) {
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
