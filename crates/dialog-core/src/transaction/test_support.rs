//! In-crate doubles for exercising transactions without a runtime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sipua_sip_core::{HeaderName, Method, Request, Response, StatusCode};

use super::{TimerId, TimerService, TimerSettings, TimerType, TransactionContext, Transport};
use crate::errors::TransportError;

#[derive(Clone)]
pub(crate) struct RecordingTransport {
    sent: Arc<Mutex<Vec<String>>>,
    fail: Arc<AtomicBool>,
    reliable: bool,
}

impl RecordingTransport {
    pub(crate) fn unreliable() -> Self {
        Self {
            sent: Arc::default(),
            fail: Arc::default(),
            reliable: false,
        }
    }

    pub(crate) fn reliable() -> Self {
        Self {
            reliable: true,
            ..Self::unreliable()
        }
    }

    pub(crate) fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    pub(crate) fn context(&self, timers: &RecordingTimers) -> TransactionContext {
        TransactionContext::new(
            Arc::new(self.clone()),
            Arc::new(timers.clone()),
            TimerSettings::default(),
        )
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: &str) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("test failure".to_string()));
        }
        self.sent.lock().push(message.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn is_reliable(&self) -> bool {
        self.reliable
    }
}

/// Remembers the most recent delay of every pending timer.
#[derive(Clone, Default)]
pub(crate) struct RecordingTimers {
    pending: Arc<Mutex<HashMap<TimerId, Duration>>>,
}

impl RecordingTimers {
    pub(crate) fn is_scheduled(&self, timer: TimerType) -> bool {
        self.delay_of(timer).is_some()
    }

    pub(crate) fn delay_of(&self, timer: TimerType) -> Option<Duration> {
        self.pending
            .lock()
            .iter()
            .find(|(id, _)| id.timer == timer)
            .map(|(_, delay)| *delay)
    }
}

impl TimerService for RecordingTimers {
    fn schedule(&self, id: TimerId, delay: Duration) {
        self.pending.lock().insert(id, delay);
    }

    fn cancel(&self, id: &TimerId) {
        self.pending.lock().remove(id);
    }
}

pub(crate) fn request(method: Method, branch: &str) -> Request {
    Request::new(method.clone(), "sip:bob@biloxi.example.com".parse().expect("uri"))
        .with_header(HeaderName::Via, format!("SIP/2.0/UDP pc33.atlanta.example.com;branch={branch}"))
        .with_header(HeaderName::MaxForwards, "70")
        .with_header(HeaderName::From, "<sip:alice@atlanta.example.com>;tag=1928301774")
        .with_header(HeaderName::To, "<sip:bob@biloxi.example.com>")
        .with_header(HeaderName::CallId, "a84b4c76e66710")
        .with_header(HeaderName::CSeq, format!("314159 {method}"))
}

pub(crate) fn response_to(request: &Request, code: u16) -> Response {
    Response::from_request(request, StatusCode::from_u16_unchecked(code), Some("a6c85cf"))
}
