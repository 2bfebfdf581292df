//! Non-INVITE server transaction (RFC 3261 §17.2.2)
//!
//! Trying → (1xx sent) Proceeding → (final sent) Completed → (Timer J) Terminated.
//! Retransmitted requests are answered with the last response sent and never
//! reach the transaction user.

use sipua_sip_core::{Request, Response};
use tracing::{debug, trace};

use super::{log_transport_failure, TransactionContext, TransactionEvent, TransactionKey, TransactionState, TimerType};
use crate::errors::{DialogError, DialogResult, TransportError};

#[derive(Debug)]
pub struct ServerNonInviteTransaction {
    key: TransactionKey,
    request: Request,
    state: TransactionState,
    ctx: TransactionContext,
    last_response: Option<Response>,
}

impl ServerNonInviteTransaction {
    pub fn new(key: TransactionKey, request: Request, ctx: TransactionContext) -> Self {
        debug!(transaction = %key, "new {} server transaction", request.method);
        Self {
            key,
            request,
            state: TransactionState::Trying,
            ctx,
            last_response: None,
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

    pub fn receive_request(&mut self, _request: Request, events: &mut Vec<TransactionEvent>) {
        match (self.state, &self.last_response) {
            (TransactionState::Proceeding | TransactionState::Completed, Some(response)) => {
                trace!(transaction = %self.key, "request retransmission, resending last response");
                if let Err(error) = self.ctx.send(response) {
                    self.on_transport_error(&error, events);
                }
            }
            _ => trace!(transaction = %self.key, state = %self.state, "absorbing request retransmission"),
        }
    }

    pub fn send_response(&mut self, response: Response, events: &mut Vec<TransactionEvent>) -> DialogResult<()> {
        if !self.state.is_pending() {
            return Err(DialogError::invalid_state(format!(
                "cannot send {} from {} server transaction in {}",
                response.status, self.request.method, self.state
            )));
        }
        let status = response.status;
        if let Err(error) = self.ctx.send(&response) {
            self.on_transport_error(&error, events);
            return Err(error.into());
        }
        self.last_response = Some(response);

        if status.is_provisional() {
            self.transition(TransactionState::Proceeding);
            return Ok(());
        }
        self.transition(TransactionState::Completed);
        let linger = self.ctx.settings.timer_j(self.ctx.reliable());
        if linger.is_zero() {
            self.terminate(events);
        } else {
            self.ctx.schedule(&self.key, TimerType::J, linger);
        }
        Ok(())
    }

    pub fn handle_timer(&mut self, timer: TimerType, events: &mut Vec<TransactionEvent>) {
        match (timer, self.state) {
            (TimerType::J, TransactionState::Completed) => self.terminate(events),
            (timer, state) => trace!(transaction = %self.key, %timer, %state, "ignoring stale timer"),
        }
    }

    pub fn dispose(&mut self) {
        self.ctx.cancel(&self.key, TimerType::J);
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
        self.ctx.cancel(&self.key, TimerType::J);
        self.transition(TransactionState::Terminated);
        events.push(TransactionEvent::TransactionTerminated {
            transaction_id: self.key.clone(),
        });
    }
}
