//! Shared fixtures for the integration tests
//!
//! An [`Agent`] is a core wired to a recording transport and a manual timer
//! service. Two agents talk by relaying what one sent into the other.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use sipua_dialog_core::transaction::{TimerId, TimerService, TimerType};
use sipua_dialog_core::{
    DialogId, IncomingRequest, IncomingResponse, OutgoingRequestDelegate, RequestOptions, ResponseOptions, Transport,
    TransportError, UserAgentCore, UserAgentCoreConfig, UserAgentCoreDelegate,
};
use sipua_sip_core::{parse_message, Body, Message, Method, Request, Response, StatusCode, Uri};

#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl RecordingTransport {
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

impl Transport for RecordingTransport {
    fn send(&self, message: &str) -> Result<(), TransportError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(TransportError::SendFailed("link down".to_string()));
        }
        self.sent.lock().push(message.to_string());
        Ok(())
    }

    fn is_connected(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }

    fn is_reliable(&self) -> bool {
        false
    }
}

/// Timers that only fire when a test says so
#[derive(Default)]
pub struct ManualTimers {
    pending: Mutex<HashMap<TimerId, Duration>>,
}

impl ManualTimers {
    pub fn pending_of(&self, timer: TimerType) -> Vec<TimerId> {
        self.pending
            .lock()
            .keys()
            .filter(|id| id.timer == timer)
            .cloned()
            .collect()
    }

    pub fn delay(&self, id: &TimerId) -> Option<Duration> {
        self.pending.lock().get(id).copied()
    }

    fn take(&self, id: &TimerId) -> bool {
        self.pending.lock().remove(id).is_some()
    }
}

impl TimerService for ManualTimers {
    fn schedule(&self, id: TimerId, delay: Duration) {
        self.pending.lock().insert(id, delay);
    }

    fn cancel(&self, id: &TimerId) {
        self.pending.lock().remove(id);
    }
}

pub struct Agent {
    pub core: UserAgentCore,
    pub wire: Arc<RecordingTransport>,
    pub timers: Arc<ManualTimers>,
}

impl Agent {
    pub fn new(user: &str) -> Self {
        Self::with_config(config(user))
    }

    pub fn with_config(config: UserAgentCoreConfig) -> Self {
        let wire = Arc::new(RecordingTransport::default());
        let timers = Arc::new(ManualTimers::default());
        let core = UserAgentCore::new(config, wire.clone(), timers.clone()).expect("valid configuration");
        Self { core, wire, timers }
    }

    /// Everything sent since the last call, parsed.
    pub fn sent(&self) -> Vec<Message> {
        self.wire
            .take()
            .iter()
            .map(|raw| parse_message(raw).expect("agent sent an unparseable message"))
            .collect()
    }

    pub fn receive(&mut self, message: &impl ToString) {
        self.core.receive_message(&message.to_string());
    }

    /// Fires every pending timer of type `timer`; returns how many fired.
    pub fn fire(&mut self, timer: TimerType) -> usize {
        let due = self.timers.pending_of(timer);
        for id in &due {
            if self.timers.take(id) {
                self.core.handle_timer(id);
            }
        }
        due.len()
    }

    pub fn only_dialog(&self) -> DialogId {
        let ids: Vec<DialogId> = self.core.dialogs().map(|s| s.id().clone()).collect();
        assert_eq!(ids.len(), 1, "expected exactly one dialog, got {ids:?}");
        ids[0].clone()
    }
}

pub fn uri(user: &str) -> Uri {
    format!("sip:{user}@example.com").parse().expect("valid URI")
}

pub fn config(user: &str) -> UserAgentCoreConfig {
    let contact: Uri = format!("sip:{user}@{user}.example.com").parse().expect("valid URI");
    UserAgentCoreConfig::new(uri(user), contact)
}

/// Delivers what `from` sent into `to` and returns the delivered messages.
pub fn relay(from: &Agent, to: &mut Agent) -> Vec<Message> {
    let messages = from.sent();
    for message in &messages {
        to.receive(message);
    }
    messages
}

/// Relays in both directions until both sides are quiet.
pub fn settle(a: &mut Agent, b: &mut Agent) {
    for _ in 0..32 {
        let forward = relay(a, b);
        let backward = relay(b, a);
        if forward.is_empty() && backward.is_empty() {
            return;
        }
    }
    panic!("agents kept exchanging messages");
}

/// Core delegate that keeps every INVITE and leaves the answer to the test
#[derive(Clone, Default)]
pub struct InviteInbox(Arc<Mutex<Vec<IncomingRequest>>>);

impl InviteInbox {
    pub fn take(&self) -> Vec<IncomingRequest> {
        std::mem::take(&mut *self.0.lock())
    }

    pub fn take_one(&self) -> IncomingRequest {
        let mut invites = self.take();
        assert_eq!(invites.len(), 1, "expected one INVITE");
        invites.remove(0)
    }
}

impl UserAgentCoreDelegate for InviteInbox {
    fn on_invite(&mut self, _core: &mut UserAgentCore, request: &IncomingRequest) -> bool {
        self.0.lock().push(request.clone());
        true
    }
}

/// Outgoing request delegate recording `(callback, status)` pairs
#[derive(Clone, Default)]
pub struct ResponseLog(Arc<Mutex<Vec<(&'static str, u16)>>>);

impl ResponseLog {
    pub fn entries(&self) -> Vec<(&'static str, u16)> {
        self.0.lock().clone()
    }

    fn push(&self, callback: &'static str, response: &IncomingResponse) {
        self.0.lock().push((callback, response.status().as_u16()));
    }
}

impl OutgoingRequestDelegate for ResponseLog {
    fn on_trying(&mut self, _core: &mut UserAgentCore, response: &IncomingResponse) {
        self.push("trying", response);
    }

    fn on_progress(&mut self, _core: &mut UserAgentCore, response: &IncomingResponse) {
        self.push("progress", response);
    }

    fn on_accept(&mut self, _core: &mut UserAgentCore, response: &IncomingResponse) {
        self.push("accept", response);
    }

    fn on_redirect(&mut self, _core: &mut UserAgentCore, response: &IncomingResponse) {
        self.push("redirect", response);
    }

    fn on_reject(&mut self, _core: &mut UserAgentCore, response: &IncomingResponse) {
        self.push("reject", response);
    }
}

/// Alice calls Bob with an offer, Bob answers 200, Alice ACKs.
/// Returns the dialog ids on each side.
pub fn establish(alice: &mut Agent, bob: &mut Agent) -> (DialogId, DialogId) {
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));
    alice
        .core
        .invite(uri("bob"), RequestOptions::new().with_body(Body::sdp(OFFER)), None)
        .expect("INVITE sent");
    relay(alice, bob);
    let invite = inbox.take_one();
    bob.core
        .accept(
            &invite.transaction,
            ResponseOptions::new(StatusCode::OK).with_body(Body::sdp(ANSWER)),
        )
        .expect("200 sent");
    settle(alice, bob);
    (alice.only_dialog(), bob.only_dialog())
}

pub fn requests(messages: &[Message]) -> Vec<&Request> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Request(request) => Some(request),
            Message::Response(_) => None,
        })
        .collect()
}

pub fn responses(messages: &[Message]) -> Vec<&Response> {
    messages
        .iter()
        .filter_map(|m| match m {
            Message::Response(response) => Some(response),
            Message::Request(_) => None,
        })
        .collect()
}

pub fn methods(messages: &[Message]) -> Vec<Method> {
    requests(messages).into_iter().map(|r| r.method.clone()).collect()
}

pub fn statuses(messages: &[Message]) -> Vec<u16> {
    responses(messages).into_iter().map(|r| r.status.as_u16()).collect()
}

pub const OFFER: &str = "v=0\r\no=alice 1 1 IN IP4 192.0.2.1\r\ns=-\r\nc=IN IP4 192.0.2.1\r\nt=0 0\r\nm=audio 49170 RTP/AVP 0\r\n";
pub const ANSWER: &str = "v=0\r\no=bob 2 2 IN IP4 192.0.2.2\r\ns=-\r\nc=IN IP4 192.0.2.2\r\nt=0 0\r\nm=audio 3456 RTP/AVP 0\r\n";
