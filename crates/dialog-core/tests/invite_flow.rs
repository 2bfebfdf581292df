//! Initial INVITE transactions between two cores: answer, ACK, reliable
//! provisionals, CANCEL, retransmitted 2xx and the missing-ACK timeout.

mod common;

use std::sync::Arc;

use common::*;
use parking_lot::Mutex;
use sipua_dialog_core::transaction::TimerType;
use sipua_dialog_core::{
    Body, Method, RequestOptions, ResponseOptions, SessionDelegate, SessionState, SignalingState, StatusCode,
    TransactionKey, UserAgentCore,
};
use sipua_sip_core::{HeaderName, Message, SipMessage};

#[test]
fn test_basic_call_reaches_confirmed_on_both_sides() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));

    alice
        .core
        .invite(uri("bob"), RequestOptions::new().with_body(Body::sdp(OFFER)), None)
        .unwrap();
    let sent = relay(&alice, &mut bob);
    assert_eq!(methods(&sent), vec![Method::Invite]);
    let invite = inbox.take_one();
    assert!(invite.dialog.is_none());

    bob.core
        .progress(&invite.transaction, ResponseOptions::new(StatusCode::RINGING))
        .unwrap();
    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![100, 180]);

    // The 180 carried a To tag, so both sides hold an early dialog.
    let a_dialog = alice.only_dialog();
    let b_dialog = bob.only_dialog();
    assert_eq!(alice.core.dialog(&a_dialog).unwrap().session_state(), SessionState::Early);
    assert_eq!(
        alice.core.dialog(&a_dialog).unwrap().signaling_state(),
        SignalingState::HaveLocalOffer
    );
    assert_eq!(
        bob.core.dialog(&b_dialog).unwrap().signaling_state(),
        SignalingState::HaveRemoteOffer
    );

    bob.core
        .accept(
            &invite.transaction,
            ResponseOptions::new(StatusCode::OK).with_body(Body::sdp(ANSWER)),
        )
        .unwrap();
    assert_eq!(bob.core.dialog(&b_dialog).unwrap().session_state(), SessionState::AckWait);
    assert_eq!(bob.timers.pending_of(TimerType::Invite2xxRetransmit).len(), 1);

    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![200]);
    let ok = responses(&sent)[0];
    assert!(ok.header(&HeaderName::Allow).is_some());
    assert_eq!(ok.session_body().map(|b| b.content.as_str()), Some(ANSWER));

    let sent = relay(&alice, &mut bob);
    assert_eq!(methods(&sent), vec![Method::Ack]);
    assert!(requests(&sent)[0].body.is_none());

    for (agent, dialog) in [(&alice, &a_dialog), (&bob, &b_dialog)] {
        let session = agent.core.dialog(dialog).unwrap();
        assert_eq!(session.session_state(), SessionState::Confirmed);
        assert_eq!(session.signaling_state(), SignalingState::Stable);
        assert_eq!(session.signaling().answer().map(|b| b.content.as_str()), Some(ANSWER));
    }
    assert!(bob.timers.pending_of(TimerType::Invite2xxRetransmit).is_empty());
}

#[test]
fn test_unanswered_invite_gets_default_480() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let log = ResponseLog::default();

    alice
        .core
        .invite(uri("bob"), RequestOptions::new(), Some(Box::new(log.clone())))
        .unwrap();
    settle(&mut alice, &mut bob);

    assert_eq!(log.entries(), vec![("trying", 100), ("reject", 480)]);
    assert_eq!(alice.core.dialogs().count(), 0);
    assert_eq!(bob.core.dialogs().count(), 0);
}

#[test]
fn test_retransmitted_2xx_resends_the_same_ack() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));

    alice.core.invite(uri("bob"), RequestOptions::new(), None).unwrap();
    relay(&alice, &mut bob);
    let invite = inbox.take_one();
    bob.core
        .accept(&invite.transaction, ResponseOptions::new(StatusCode::OK).with_body(Body::sdp(OFFER)))
        .unwrap();
    relay(&bob, &mut alice);
    let first_ack = alice.sent();
    assert_eq!(methods(&first_ack), vec![Method::Ack]);

    // Bob never saw the ACK and retransmits the 200.
    assert_eq!(bob.fire(TimerType::Invite2xxRetransmit), 1);
    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![200]);
    assert_eq!(bob.timers.pending_of(TimerType::Invite2xxRetransmit).len(), 1);

    let second_ack = alice.sent();
    assert_eq!(methods(&second_ack), vec![Method::Ack]);
    assert_eq!(first_ack[0].to_string(), second_ack[0].to_string());

    for message in &second_ack {
        bob.receive(message);
    }
    assert!(bob.timers.pending_of(TimerType::Invite2xxRetransmit).is_empty());
}

#[test]
fn test_2xx_retransmissions_back_off_to_t2() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));

    alice.core.invite(uri("bob"), RequestOptions::new(), None).unwrap();
    relay(&alice, &mut bob);
    let invite = inbox.take_one();
    bob.core.accept(&invite.transaction, ResponseOptions::new(StatusCode::OK)).unwrap();

    let settings = bob.core.config().timers;
    let mut delays = Vec::new();
    for _ in 0..5 {
        let id = bob.timers.pending_of(TimerType::Invite2xxRetransmit)[0].clone();
        delays.push(bob.timers.delay(&id).unwrap());
        bob.fire(TimerType::Invite2xxRetransmit);
    }
    assert_eq!(delays[0], settings.t1);
    assert_eq!(delays[1], settings.t1 * 2);
    assert!(delays.iter().all(|delay| *delay <= settings.t2));
    assert_eq!(delays[4], settings.t2);
}

#[test]
fn test_missing_ack_ends_dialog_with_bye() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));

    alice.core.invite(uri("bob"), RequestOptions::new(), None).unwrap();
    relay(&alice, &mut bob);
    let invite = inbox.take_one();
    bob.core
        .accept(&invite.transaction, ResponseOptions::new(StatusCode::OK).with_body(Body::sdp(OFFER)))
        .unwrap();
    bob.sent();

    // Timer L ends the accepted server transaction without an ACK seen.
    assert_eq!(bob.fire(TimerType::L), 1);
    let sent = bob.sent();
    assert_eq!(methods(&sent), vec![Method::Bye]);
    assert_eq!(bob.core.dialogs().count(), 0);
    assert!(bob.timers.pending_of(TimerType::Invite2xxRetransmit).is_empty());
}

/// Session delegate that takes over when the ACK never comes
#[derive(Clone, Default)]
struct AckTimeouts(Arc<Mutex<Vec<TransactionKey>>>);

impl SessionDelegate for AckTimeouts {
    fn on_ack_timeout(&mut self, _core: &mut UserAgentCore, transaction: &TransactionKey) -> bool {
        self.0.lock().push(transaction.clone());
        true
    }
}

#[test]
fn test_missing_ack_is_left_to_session_delegate() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));

    alice.core.invite(uri("bob"), RequestOptions::new(), None).unwrap();
    relay(&alice, &mut bob);
    let invite = inbox.take_one();
    bob.core
        .accept(&invite.transaction, ResponseOptions::new(StatusCode::OK).with_body(Body::sdp(OFFER)))
        .unwrap();
    let b_dialog = bob.only_dialog();
    let timeouts = AckTimeouts::default();
    bob.core.set_session_delegate(&b_dialog, Box::new(timeouts.clone())).unwrap();
    bob.sent();

    assert_eq!(bob.fire(TimerType::L), 1);
    assert_eq!(*timeouts.0.lock(), vec![invite.transaction.clone()]);
    assert!(methods(&bob.sent()).is_empty());
    assert!(bob.core.dialog(&b_dialog).is_some());
    assert!(bob.timers.pending_of(TimerType::Invite2xxRetransmit).is_empty());
}

#[test]
fn test_cancel_before_provisional_is_deferred() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));
    let log = ResponseLog::default();

    let id = alice
        .core
        .invite(uri("bob"), RequestOptions::new(), Some(Box::new(log.clone())))
        .unwrap();
    alice.core.cancel(id, RequestOptions::new()).unwrap();
    let sent = alice.sent();
    assert_eq!(methods(&sent), vec![Method::Invite]);
    let invite_branch = requests(&sent)[0].branch();
    for message in &sent {
        bob.receive(message);
    }
    inbox.take_one();

    // The 100 releases the held CANCEL.
    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![100]);
    let sent = alice.sent();
    assert_eq!(methods(&sent), vec![Method::Cancel]);
    assert_eq!(requests(&sent)[0].branch(), invite_branch);

    for message in &sent {
        bob.receive(message);
    }
    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![200, 487]);
    let sent = relay(&alice, &mut bob);
    assert_eq!(methods(&sent), vec![Method::Ack]);

    assert_eq!(log.entries(), vec![("trying", 100), ("reject", 487)]);
    assert_eq!(alice.core.dialogs().count(), 0);
    assert_eq!(bob.core.dialogs().count(), 0);
}

#[test]
fn test_cancel_after_final_response_is_a_no_op() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let id = alice.core.invite(uri("bob"), RequestOptions::new(), None).unwrap();
    settle(&mut alice, &mut bob);

    alice.core.cancel(id, RequestOptions::new()).ok();
    assert!(alice.sent().is_empty());
}

#[test]
fn test_reliable_provisional_is_pracked() {
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
        .progress(
            &invite.transaction,
            ResponseOptions::new(StatusCode::SESSION_PROGRESS)
                .with_body(Body::sdp(ANSWER))
                .reliable(),
        )
        .unwrap();
    assert_eq!(bob.timers.pending_of(TimerType::ReliableProvisional).len(), 1);

    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![100, 183]);
    let progress = responses(&sent)[1];
    assert!(progress.requires("100rel"));
    let rseq = progress.header(&HeaderName::RSeq).unwrap().trim().to_string();

    // Without a delegate the core acknowledges the 183 itself.
    let sent = relay(&alice, &mut bob);
    assert_eq!(methods(&sent), vec![Method::Prack]);
    let rack = requests(&sent)[0].header(&HeaderName::RAck).unwrap().to_string();
    assert!(rack.starts_with(&format!("{rseq} 1 INVITE")));
    assert!(bob.timers.pending_of(TimerType::ReliableProvisional).is_empty());

    let sent = relay(&bob, &mut alice);
    assert_eq!(statuses(&sent), vec![200]);

    let a_dialog = alice.only_dialog();
    let b_dialog = bob.only_dialog();
    assert_eq!(alice.core.dialog(&a_dialog).unwrap().signaling_state(), SignalingState::Stable);
    assert_eq!(bob.core.dialog(&b_dialog).unwrap().signaling_state(), SignalingState::Stable);
    assert_eq!(alice.core.dialog(&a_dialog).unwrap().session_state(), SessionState::Early);

    // The answer went out in the 183, so the 200 carries none.
    bob.core.accept(&invite.transaction, ResponseOptions::new(StatusCode::OK)).unwrap();
    settle(&mut alice, &mut bob);
    assert_eq!(alice.core.dialog(&a_dialog).unwrap().session_state(), SessionState::Confirmed);
    assert_eq!(bob.core.dialog(&b_dialog).unwrap().session_state(), SessionState::Confirmed);
}

#[test]
fn test_reliable_provisional_retransmits_until_pracked() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));

    alice.core.invite(uri("bob"), RequestOptions::new(), None).unwrap();
    relay(&alice, &mut bob);
    let invite = inbox.take_one();
    bob.core
        .progress(&invite.transaction, ResponseOptions::new(StatusCode::RINGING).reliable())
        .unwrap();
    let first = bob.sent();
    assert_eq!(statuses(&first), vec![100, 180]);

    assert_eq!(bob.fire(TimerType::ReliableProvisional), 1);
    let again = bob.sent();
    assert_eq!(statuses(&again), vec![180]);
    assert_eq!(again[0].to_string(), first[1].to_string());

    // A second reliable provisional must wait for the PRACK.
    let busy = bob
        .core
        .progress(&invite.transaction, ResponseOptions::new(StatusCode::RINGING).reliable());
    assert!(busy.is_err());
}

#[test]
fn test_2xx_to_invite_without_offer_carries_offer_answered_in_ack() {
    let mut alice = Agent::new("alice");
    let mut bob = Agent::new("bob");
    let inbox = InviteInbox::default();
    bob.core.set_delegate(Box::new(inbox.clone()));

    let id = alice.core.invite(uri("bob"), RequestOptions::new(), Some(Box::new(AnswerInAck))).unwrap();
    relay(&alice, &mut bob);
    let invite = inbox.take_one();
    bob.core
        .accept(&invite.transaction, ResponseOptions::new(StatusCode::OK).with_body(Body::sdp(OFFER)))
        .unwrap();
    relay(&bob, &mut alice);
    let sent = relay(&alice, &mut bob);
    assert_eq!(methods(&sent), vec![Method::Ack]);
    let ack = match &sent[0] {
        Message::Request(request) => request,
        Message::Response(_) => unreachable!(),
    };
    assert_eq!(ack.session_body().map(|b| b.content.as_str()), Some(ANSWER));

    assert!(alice.core.outgoing_request(id).is_some());
    let b_dialog = bob.only_dialog();
    assert_eq!(bob.core.dialog(&b_dialog).unwrap().signaling_state(), SignalingState::Stable);
}

/// Answers the offer of a 2xx in the ACK
struct AnswerInAck;

impl sipua_dialog_core::OutgoingRequestDelegate for AnswerInAck {
    fn on_accept(
        &mut self,
        core: &mut sipua_dialog_core::UserAgentCore,
        response: &sipua_dialog_core::IncomingResponse,
    ) {
        let dialog = response.dialog.clone().unwrap();
        core.ack(&dialog, Some(Body::sdp(ANSWER))).unwrap();
    }
}
