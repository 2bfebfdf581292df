//! INVITE server transaction (RFC 3261 §17.2.1, RFC 6026 §7.1)
//!
//! ```text
//!                 INVITE received
//!                        ▼
//!                 ┌────────────┐ 1xx sent
//!                 │ Proceeding │◄─────────
//!                 └──┬──────┬──┘
//!          2xx sent  │      │ 300-699 sent
//!                    ▼      ▼
//!          ┌──────────┐    ┌───────────┐  Timer G: resend final
//!          │ Accepted │    │ Completed │  Timer H: TransactionTimeout
//!          └────┬─────┘    └─────┬─────┘
//!               │ Timer L        │ ACK
//!               │                ▼
//!               │          ┌───────────┐
//!               │          │ Confirmed │
//!               │          └─────┬─────┘
//!               │                │ Timer I
//!               ▼                ▼
//!                   Terminated
//! ```
//!
//! While Accepted the session dialog drives 2xx retransmission through
//! [`ServerInviteTransaction::retransmit_accepted_response`]; Timer L bounds how
//! long it may do so.

use std::time::Duration;

use sipua_sip_core::{Method, Request, Response};
use tracing::{debug, trace, warn};

use super::{log_transport_failure, TransactionContext, TransactionEvent, TransactionKey, TransactionState, TimerType};
use crate::errors::{DialogError, DialogResult, TransportError};

const TIMERS: [TimerType; 4] = [TimerType::G, TimerType::H, TimerType::I, TimerType::L];

#[derive(Debug)]
pub struct ServerInviteTransaction {
    key: TransactionKey,
    request: Request,
    state: TransactionState,
    ctx: TransactionContext,
    last_response: Option<Response>,
    retransmit_interval: Duration,
}

impl ServerInviteTransaction {
    pub fn new(key: TransactionKey, request: Request, ctx: TransactionContext) -> Self {
        debug!(transaction = %key, "new INVITE server transaction");
        let retransmit_interval = ctx.settings.t1;
        Self {
            key,
            request,
            state: TransactionState::Proceeding,
            ctx,
            last_response: None,
            retransmit_interval,
        }
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

    /// Handles a retransmitted INVITE or the ACK for a non-2xx response.
    pub fn receive_request(&mut self, request: Request, events: &mut Vec<TransactionEvent>) {
        match (request.method == Method::Ack, self.state) {
            (true, TransactionState::Completed) => {
                self.ctx.cancel_all(&self.key, &[TimerType::G, TimerType::H]);
                self.transition(TransactionState::Confirmed);
                let linger = self.ctx.settings.timer_i(self.ctx.reliable());
                if linger.is_zero() {
                    self.terminate(events);
                } else {
                    self.ctx.schedule(&self.key, TimerType::I, linger);
                }
            }
            (false, TransactionState::Proceeding | TransactionState::Completed) => {
                if let Some(response) = &self.last_response {
                    trace!(transaction = %self.key, "INVITE retransmission, resending last response");
                    if let Err(error) = self.ctx.send(response) {
                        self.on_transport_error(&error, events);
                    }
                }
            }
            (_, state) => trace!(transaction = %self.key, method = %request.method, %state, "absorbing request"),
        }
    }

    pub fn send_response(&mut self, response: Response, events: &mut Vec<TransactionEvent>) -> DialogResult<()> {
        let status = response.status;
        let allowed = match self.state {
            TransactionState::Proceeding => true,
            // additional 2xx from forked answers share the Accepted window
            TransactionState::Accepted => status.is_success(),
            _ => false,
        };
        if !allowed {
            return Err(DialogError::invalid_state(format!(
                "cannot send {status} from INVITE server transaction in {}",
                self.state
            )));
        }

        if let Err(error) = self.ctx.send(&response) {
            self.on_transport_error(&error, events);
            return Err(error.into());
        }
        self.last_response = Some(response);

        if status.is_provisional() {
            return Ok(());
        }
        if status.is_success() {
            if self.state == TransactionState::Proceeding {
                self.transition(TransactionState::Accepted);
                self.ctx.schedule(&self.key, TimerType::L, self.ctx.settings.transaction_timeout);
            }
            return Ok(());
        }

        self.transition(TransactionState::Completed);
        if !self.ctx.reliable() {
            self.ctx.schedule(&self.key, TimerType::G, self.retransmit_interval);
        }
        self.ctx.schedule(&self.key, TimerType::H, self.ctx.settings.transaction_timeout);
        Ok(())
    }

    /// Re-sends the 2xx while Accepted. Returns false once the transaction
    /// has moved on (or the send failed).
    pub fn retransmit_accepted_response(&mut self, events: &mut Vec<TransactionEvent>) -> bool {
        if self.state != TransactionState::Accepted {
            return false;
        }
        let Some(response) = &self.last_response else {
            return false;
        };
        trace!(transaction = %self.key, "retransmitting 2xx");
        match self.ctx.send(response) {
            Ok(()) => true,
            Err(error) => {
                self.on_transport_error(&error, events);
                false
            }
        }
    }

    pub fn handle_timer(&mut self, timer: TimerType, events: &mut Vec<TransactionEvent>) {
        match (timer, self.state) {
            (TimerType::G, TransactionState::Completed) => {
                let Some(response) = &self.last_response else {
                    return;
                };
                trace!(transaction = %self.key, "Timer G fired, resending final response");
                if let Err(error) = self.ctx.send(response) {
                    self.on_transport_error(&error, events);
                    return;
                }
                self.retransmit_interval = (self.retransmit_interval * 2).min(self.ctx.settings.t2);
                self.ctx.schedule(&self.key, TimerType::G, self.retransmit_interval);
            }
            (TimerType::H, TransactionState::Completed) => {
                warn!(transaction = %self.key, "Timer H fired, no ACK received");
                events.push(TransactionEvent::TransactionTimeout {
                    transaction_id: self.key.clone(),
                });
                self.terminate(events);
            }
            (TimerType::I, TransactionState::Confirmed) | (TimerType::L, TransactionState::Accepted) => {
                self.terminate(events)
            }
            (timer, state) => trace!(transaction = %self.key, %timer, %state, "ignoring stale timer"),
        }
    }

    pub fn dispose(&mut self) {
        self.ctx.cancel_all(&self.key, &TIMERS);
        self.state = TransactionState::Terminated;
    }

    fn on_transport_error(&mut self, error: &TransportError, events: &mut Vec<TransactionEvent>) {
        log_transport_failure(&self.key, error);
        events.push(TransactionEvent::TransportError {
            transaction_id: self.key.clone(),
        });
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
