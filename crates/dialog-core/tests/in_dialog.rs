//! Requests inside an established dialog: re-INVITE glare and races,
//! UPDATE, INFO, BYE and CSeq ordering.

mod common;

use std::sync::Arc;

use common::*;
use parking_lot::Mutex;
use sipua_dialog_core::{
    AckProcessing, Body, IncomingRequest, Method, RaceConditionPolicy, RequestOptions, ResponseOptions,
    SessionDelegate, SignalingState, StatusCode, UserAgentCore,
};
use sipua_sip_core::{CSeq, HeaderName, Message, Request, SipMessage};

const NEW_OFFER: &str = "v=0\r\no=alice 1 2 IN IP4 192.0.2.1\r\ns=-\r\nc=IN IP4 192.0.2.1\r\nt=0 0\r\nm=audio 49172 RTP/AVP 0\r\n";
const COUNTER_OFFER: &str = "v=0\r\no=bob 2 3 IN IP4 192.0.2.2\r\ns=-\r\nc=IN IP4 192.0.2.2\r\nt=0 0\r\nm=audio 3458 RTP/AVP 0\r\n";

/// Session delegate that leaves ACK processing unfinished
struct SlowAck;

impl SessionDelegate for SlowAck {
    fn on_ack(&mut self, _core: &mut UserAgentCore, _request: &IncomingRequest) -> AckProcessing {
        AckProcessing::Pending
    }
}

/// Session delegate that records the methods it was handed
#[derive(Clone, Default)]
struct SeenRequests(Arc<Mutex<Vec<Method>>>);

impl SessionDelegate for SeenRequests {
    fn on_bye(&mut self, _core: &mut UserAgentCore, request: &IncomingRequest) -> bool {
        self.0.lock().push(request.request.method.clone());
        false
    }

    fn on_info(&mut self, _core: &mut UserAgentCore, request: &IncomingRequest) -> bool {
        self.0.lock().push(request.request.method.clone());
        false
    }
}

fn first_request(messages: &[Message]) -> Request {
    requests(messages)[0].clone()
}

/// Same request on a new transaction
fn on_new_branch(mut request: Request, branch: &str) -> Request {
    request
        .headers
        .set(HeaderName::Via, format!("SIP/2.0/UDP alice.example.com;branch=z9hG4bK{branch}"));
    request
}

#[test]
fn test_reinvite_glare_gets_491_on_both_sides() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let (a_dialog, b_dialog) = establish(&mut alice, &mut bob);

    alice
        .core
        .reinvite(&a_dialog, RequestOptions::new().with_body(Body::sdp(NEW_OFFER)), None)
        .unwrap();
    bob.core
        .reinvite(&b_dialog, RequestOptions::new().with_body(Body::sdp(COUNTER_OFFER)), None)
        .unwrap();

    let sent = relay(&alice, &mut bob);
    assert_eq!(methods(&sent), vec![Method::Invite]);
    // Bob keeps his own offer outstanding while refusing Alice's.
    assert_eq!(
        bob.core.dialog(&b_dialog).unwrap().signaling_state(),
        SignalingState::HaveLocalOffer
    );

    let sent = relay(&bob, &mut alice);
    assert_eq!(methods(&sent), vec![Method::Invite]);
    assert_eq!(statuses(&sent), vec![491]);
    settle(&mut alice, &mut bob);

    for (agent, dialog) in [(&alice, &a_dialog), (&bob, &b_dialog)] {
        let session = agent.core.dialog(dialog).unwrap();
        assert_eq!(session.signaling_state(), SignalingState::Stable);
        assert_eq!(session.signaling().offer().map(|b| b.content.as_str()), Some(OFFER));
        assert_eq!(session.signaling().answer().map(|b| b.content.as_str()), Some(ANSWER));
    }
}

#[test]
fn test_reinvite_during_ack_processing_gets_race_reply() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));

    alice
        .core
        .invite(uri("bob"), RequestOptions::new().with_body(Body::sdp(OFFER)), None)
        .unwrap();
    relay(&alice, &mut bob);
    let invite = inbox.take_one();
    bob.core
        .accept(&invite.transaction, ResponseOptions::new(StatusCode::OK).with_body(Body::sdp(ANSWER)))
        .unwrap();
    let b_dialog = bob.only_dialog();
    bob.core.set_session_delegate(&b_dialog, Box::new(SlowAck)).unwrap();
    settle(&mut alice, &mut bob);
    let a_dialog = alice.only_dialog();

    alice
        .core
        .reinvite(&a_dialog, RequestOptions::new().with_body(Body::sdp(NEW_OFFER)), None)
        .unwrap();
    relay(&alice, &mut bob);
    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![500]);
    let retry_after: u32 = responses(&sent)[0]
        .header(&HeaderName::RetryAfter)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert!((1..=10).contains(&retry_after));
    settle(&mut alice, &mut bob);
    assert_eq!(
        alice.core.dialog(&a_dialog).unwrap().signaling_state(),
        SignalingState::Stable
    );

    // Once processing is done the next re-INVITE reaches the session.
    bob.core.complete_ack_processing(&b_dialog).unwrap();
    alice
        .core
        .reinvite(&a_dialog, RequestOptions::new().with_body(Body::sdp(NEW_OFFER)), None)
        .unwrap();
    relay(&alice, &mut bob);
    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![488]);
}

#[test]
fn test_race_reply_follows_configured_policy() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::with_config(config("bob").with_race_policy(RaceConditionPolicy {
        status: 503,
        retry_after_min: 3,
        retry_after_max: 3,
    }));
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));

    alice
        .core
        .invite(uri("bob"), RequestOptions::new().with_body(Body::sdp(OFFER)), None)
        .unwrap();
    relay(&alice, &mut bob);
    let invite = inbox.take_one();
    bob.core
        .accept(&invite.transaction, ResponseOptions::new(StatusCode::OK).with_body(Body::sdp(ANSWER)))
        .unwrap();
    let b_dialog = bob.only_dialog();
    bob.core.set_session_delegate(&b_dialog, Box::new(SlowAck)).unwrap();
    settle(&mut alice, &mut bob);

    let a_dialog = alice.only_dialog();
    alice
        .core
        .reinvite(&a_dialog, RequestOptions::new().with_body(Body::sdp(NEW_OFFER)), None)
        .unwrap();
    relay(&alice, &mut bob);
    let sent = bob.sent();
    assert_eq!(statuses(&sent), vec![503]);
    assert_eq!(responses(&sent)[0].header(&HeaderName::RetryAfter), Some("3"));
}

#[test]
fn test_unhandled_update_is_rejected_and_rolled_back() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let (a_dialog, b_dialog) = establish(&mut alice, &mut bob);

    alice
        .core
        .update(&a_dialog, RequestOptions::new().with_body(Body::sdp(NEW_OFFER)), None)
        .unwrap();
    assert_eq!(
        alice.core.dialog(&a_dialog).unwrap().signaling_state(),
        SignalingState::HaveLocalOffer
    );
    relay(&alice, &mut bob);
    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![504]);

    for (agent, dialog) in [(&alice, &a_dialog), (&bob, &b_dialog)] {
        let session = agent.core.dialog(dialog).unwrap();
        assert_eq!(session.signaling_state(), SignalingState::Stable);
        assert_eq!(session.signaling().offer().map(|b| b.content.as_str()), Some(OFFER));
    }
}

#[test]
fn test_second_offer_refused_while_one_is_outstanding() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let (a_dialog, _) = establish(&mut alice, &mut bob);

    alice
        .core
        .reinvite(&a_dialog, RequestOptions::new().with_body(Body::sdp(NEW_OFFER)), None)
        .unwrap();
    let second = alice
        .core
        .update(&a_dialog, RequestOptions::new().with_body(Body::sdp(NEW_OFFER)), None);
    assert!(second.is_err());
    assert_eq!(methods(&alice.sent()), vec![Method::Invite]);
}

#[test]
fn test_info_and_bye_reach_the_session_delegate() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let (a_dialog, b_dialog) = establish(&mut alice, &mut bob);
    let seen = SeenRequests::default();
    bob.core.set_session_delegate(&b_dialog, Box::new(seen.clone())).unwrap();

    alice
        .core
        .info(
            &a_dialog,
            RequestOptions::new().with_body(Body::new("Signal=5\r\n", "application/dtmf-relay")),
            None,
        )
        .unwrap();
    relay(&alice, &mut bob);
    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![469]);
    // A rejected INFO leaves the dialog alone.
    assert!(alice.core.dialog(&a_dialog).is_some());

    let log = ResponseLog::default();
    alice.core.bye(&a_dialog, RequestOptions::new(), Some(Box::new(log.clone()))).unwrap();
    assert!(alice.core.dialog(&a_dialog).is_none());
    settle(&mut alice, &mut bob);

    assert_eq!(*seen.0.lock(), vec![Method::Info, Method::Bye]);
    assert!(bob.core.dialog(&b_dialog).is_none());
    assert_eq!(log.entries(), vec![("accept", 200)]);
}

#[test]
fn test_request_for_gone_dialog_gets_481() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let (a_dialog, _) = establish(&mut alice, &mut bob);

    alice.core.bye(&a_dialog, RequestOptions::new(), None).unwrap();
    let bye = first_request(&alice.sent());
    bob.receive(&bye);
    assert_eq!(statuses(&bob.sent()), vec![200]);

    bob.receive(&on_new_branch(bye, "late"));
    assert_eq!(statuses(&bob.sent()), vec![481]);
}

#[test]
fn test_lower_cseq_in_dialog_gets_500() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let (a_dialog, _) = establish(&mut alice, &mut bob);

    alice.core.message_in_dialog(&a_dialog, RequestOptions::new(), None).unwrap();
    let message = first_request(&alice.sent());
    bob.receive(&message);
    assert_eq!(statuses(&bob.sent()), vec![200]);

    let mut stale = on_new_branch(message, "stale");
    stale.headers.set(HeaderName::CSeq, CSeq::new(1, Method::Message).to_string());
    bob.receive(&stale);
    assert_eq!(statuses(&bob.sent()), vec![500]);
}

#[test]
fn test_bye_refused_in_early_dialog() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));

    alice.core.invite(uri("bob"), RequestOptions::new(), None).unwrap();
    relay(&alice, &mut bob);
    let invite = inbox.take_one();
    bob.core
        .progress(&invite.transaction, ResponseOptions::new(StatusCode::RINGING))
        .unwrap();
    relay(&bob, &mut alice);

    let a_dialog = alice.only_dialog();
    assert!(alice.core.bye(&a_dialog, RequestOptions::new(), None).is_err());
    assert!(alice.sent().is_empty());
}

#[test]
fn test_in_dialog_requests_use_increasing_cseq() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let (a_dialog, _) = establish(&mut alice, &mut bob);

    alice.core.message_in_dialog(&a_dialog, RequestOptions::new(), None).unwrap();
    alice.core.notify(&a_dialog, RequestOptions::new().with_header(HeaderName::Event, "refer"), None).unwrap();
    let sent = alice.sent();
    let seqs: Vec<u32> = requests(&sent).iter().map(|r| r.cseq().unwrap().seq).collect();
    assert_eq!(seqs, vec![2, 3]);
}

/// Session delegate that accepts every re-INVITE with an answer
struct AcceptReinvite;

impl SessionDelegate for AcceptReinvite {
    fn on_invite(&mut self, core: &mut UserAgentCore, request: &IncomingRequest) -> bool {
        core.accept(
            &request.transaction,
            ResponseOptions::new(StatusCode::OK).with_body(Body::sdp(ANSWER)),
        )
        .is_ok()
    }
}

fn with_contact(mut request: Request, contact: &str) -> Request {
    request.headers.set(HeaderName::Contact, contact);
    request
}

#[test]
fn test_refused_reinvite_keeps_remote_target() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let (a_dialog, b_dialog) = establish(&mut alice, &mut bob);
    let before = bob.core.dialog(&b_dialog).unwrap().dialog().remote_target().clone();

    alice
        .core
        .reinvite(&a_dialog, RequestOptions::new().with_body(Body::sdp(NEW_OFFER)), None)
        .unwrap();
    bob.core
        .reinvite(&b_dialog, RequestOptions::new().with_body(Body::sdp(COUNTER_OFFER)), None)
        .unwrap();
    bob.sent();

    let reinvite = with_contact(first_request(&alice.sent()), "<sip:alice@moved.example.com>");
    bob.receive(&reinvite);
    assert_eq!(statuses(&bob.sent()), vec![491]);
    assert_eq!(bob.core.dialog(&b_dialog).unwrap().dialog().remote_target(), &before);
}

#[test]
fn test_accepted_reinvite_refreshes_remote_target() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let (a_dialog, b_dialog) = establish(&mut alice, &mut bob);
    bob.core.set_session_delegate(&b_dialog, Box::new(AcceptReinvite)).unwrap();

    alice
        .core
        .reinvite(&a_dialog, RequestOptions::new().with_body(Body::sdp(NEW_OFFER)), None)
        .unwrap();
    let reinvite = with_contact(first_request(&alice.sent()), "<sip:alice@moved.example.com>");
    bob.receive(&reinvite);
    assert_eq!(statuses(&bob.sent()), vec![200]);
    assert_eq!(
        bob.core.dialog(&b_dialog).unwrap().dialog().remote_target().as_str(),
        "sip:alice@moved.example.com"
    );
}
