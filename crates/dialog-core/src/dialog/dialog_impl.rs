//! Dialog implementation for RFC 3261 SIP dialogs
//!
//! This module contains the [`Dialog`] struct: the state shared by every dialog
//! regardless of usage (route set, tags, CSeq counters, remote target), the
//! construction of in-dialog requests and the sequence checks applied to
//! in-dialog requests we receive.

use rand::Rng;
use sipua_sip_core::{
    Body, CSeq, HeaderName, Method, NameAddr, Request, Response, SipMessage, StatusCode, Uri,
};
use tracing::debug;

use super::dialog_id::DialogId;
use super::dialog_state::DialogState;
use crate::errors::{DialogError, DialogResult};

/// Methods whose requests (and 2xx responses) replace the remote target
/// (RFC 3261 §12.2, RFC 3311, RFC 6665).
pub fn is_target_refresh(method: &Method) -> bool {
    matches!(
        method,
        Method::Invite | Method::Update | Method::Subscribe | Method::Notify
    )
}

/// Outcome of checking an in-dialog request against the remote CSeq
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Higher than anything seen so far; the remote CSeq was advanced
    InOrder,
    /// Lower than the remote CSeq: reject with 500 (RFC 3261 §12.2.2)
    OutOfOrder,
    /// Equal to the remote CSeq with no live transaction: drop
    Duplicate,
}

/// A SIP dialog as defined in RFC 3261 §12
#[derive(Debug, Clone)]
pub struct Dialog {
    id: DialogId,
    state: DialogState,
    /// From for requests we send, carrying the local tag
    local_party: NameAddr,
    /// To for requests we send, carrying the remote tag
    remote_party: NameAddr,
    local_seq: u32,
    remote_seq: Option<u32>,
    remote_target: Uri,
    /// Route set as Route header values, in the order they are sent
    route_set: Vec<String>,
    /// Contact we advertise in target refresh requests
    local_contact: String,
    is_initiator: bool,
}

impl Dialog {
    /// Dialog created by a response to a request we sent (RFC 3261 §12.1.2).
    ///
    /// A provisional response creates an early dialog, a 2xx a confirmed one.
    pub fn uac(request: &Request, response: &Response, local_contact: &str) -> DialogResult<Self> {
        let id = DialogId::for_incoming_response(response)
            .ok_or_else(|| DialogError::protocol_error("response has no To tag"))?;
        let state = dialog_state_for(response.status)?;
        let remote_target = contact_uri(response).unwrap_or_else(|| {
            debug!(dialog = %id, "response without Contact, targeting the Request-URI");
            request.uri.clone()
        });
        let local_seq = request.cseq()?.seq;

        let mut route_set = response.record_route();
        route_set.reverse();

        debug!(dialog = %id, %state, "creating UAC dialog");
        Ok(Self {
            id,
            state,
            local_party: request.from()?,
            remote_party: response.to()?,
            local_seq,
            remote_seq: None,
            remote_target,
            route_set,
            local_contact: local_contact.to_string(),
            is_initiator: true,
        })
    }

    /// Dialog created by a response we send to an inbound request
    /// (RFC 3261 §12.1.1). The local CSeq starts at a random value.
    pub fn uas(request: &Request, local_tag: &str, local_contact: &str, status: StatusCode) -> DialogResult<Self> {
        let remote_tag = request
            .from_tag()
            .ok_or_else(|| DialogError::protocol_error("request has no From tag"))?;
        let id = DialogId::new(request.call_id()?, local_tag, remote_tag);
        let state = dialog_state_for(status)?;
        let remote_target = contact_uri(request)
            .ok_or_else(|| DialogError::protocol_error("dialog-creating request has no Contact"))?;

        debug!(dialog = %id, %state, "creating UAS dialog");
        Ok(Self {
            id,
            state,
            local_party: request.to()?.with_tag(local_tag),
            remote_party: request.from()?,
            local_seq: rand::thread_rng().gen_range(1..=10_000),
            remote_seq: Some(request.cseq()?.seq),
            remote_target,
            route_set: request.record_route(),
            local_contact: local_contact.to_string(),
            is_initiator: false,
        })
    }

    pub fn id(&self) -> &DialogId {
        &self.id
    }

    pub fn state(&self) -> DialogState {
        self.state
    }

    pub fn is_early(&self) -> bool {
        self.state == DialogState::Early
    }

    pub fn is_terminated(&self) -> bool {
        self.state == DialogState::Terminated
    }

    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    pub fn local_seq(&self) -> u32 {
        self.local_seq
    }

    pub fn remote_seq(&self) -> Option<u32> {
        self.remote_seq
    }

    pub fn remote_target(&self) -> &Uri {
        &self.remote_target
    }

    pub fn route_set(&self) -> &[String] {
        &self.route_set
    }

    pub fn local_party(&self) -> &NameAddr {
        &self.local_party
    }

    pub fn remote_party(&self) -> &NameAddr {
        &self.remote_party
    }

    /// Moves an early dialog to Confirmed. For a UAC the route set is
    /// recomputed from the 2xx (RFC 3261 §12.1.2).
    pub fn confirm(&mut self, response: Option<&Response>) {
        if self.state != DialogState::Early {
            return;
        }
        if let (true, Some(response)) = (self.is_initiator, response) {
            let mut route_set = response.record_route();
            route_set.reverse();
            self.route_set = route_set;
            if let Some(target) = contact_uri(response) {
                self.remote_target = target;
            }
        }
        debug!(dialog = %self.id, "dialog confirmed");
        self.state = DialogState::Confirmed;
    }

    pub fn terminate(&mut self) {
        self.state = DialogState::Terminated;
    }

    /// Allocates the CSeq number for a new request. ACK and CANCEL reuse the
    /// number of the request they refer to and leave the counter alone.
    pub fn next_local_seq(&mut self, method: &Method) -> u32 {
        if !matches!(method, Method::Ack | Method::Cancel) {
            self.local_seq += 1;
        }
        self.local_seq
    }

    /// Builds an in-dialog request (RFC 3261 §12.2.1.1) with a fresh CSeq.
    pub fn create_request(&mut self, method: Method) -> Request {
        let seq = self.next_local_seq(&method);
        self.create_request_with_seq(method, seq)
    }

    /// Builds an in-dialog request carrying CSeq `seq`.
    ///
    /// With an empty route set or a loose-routing first hop the Request-URI is
    /// the remote target. Otherwise the first route becomes the Request-URI
    /// and the remote target is appended to the Route headers.
    pub fn create_request_with_seq(&self, method: Method, seq: u32) -> Request {
        let first_hop = self
            .route_set
            .first()
            .and_then(|route| route.parse::<NameAddr>().ok());

        let (uri, routes) = match first_hop {
            Some(hop) if !hop.uri.is_loose_route() => {
                let mut routes: Vec<String> = self.route_set[1..].to_vec();
                routes.push(format!("<{}>", self.remote_target));
                (hop.uri, routes)
            }
            _ => (self.remote_target.clone(), self.route_set.clone()),
        };

        let mut request = Request::new(method.clone(), uri);
        request.headers.append(HeaderName::MaxForwards, "70");
        for route in routes {
            request.headers.append(HeaderName::Route, route);
        }
        request.headers.append(HeaderName::From, self.local_party.to_string());
        request.headers.append(HeaderName::To, self.remote_party.to_string());
        request.headers.append(HeaderName::CallId, self.id.call_id.clone());
        request.headers.append(HeaderName::CSeq, CSeq::new(seq, method.clone()).to_string());
        if is_target_refresh(&method) {
            request.headers.append(HeaderName::Contact, self.local_contact.clone());
        }
        request
    }

    /// Convenience for requests that carry a body
    pub fn create_request_with_body(&mut self, method: Method, body: Option<Body>) -> Request {
        let mut request = self.create_request(method);
        request.body = body;
        request
    }

    /// Applies the remote CSeq rules to an inbound in-dialog request and, for
    /// SUBSCRIBE and NOTIFY, adopts the new Contact. A re-INVITE or UPDATE
    /// only moves the target once it is answered with 2xx (RFC 6141 §3.4).
    ///
    /// ACK and CANCEL are exempt: they reuse the CSeq of the request they
    /// belong to.
    pub fn receive_request(&mut self, request: &Request) -> DialogResult<SequenceCheck> {
        if matches!(request.method, Method::Ack | Method::Cancel) {
            return Ok(SequenceCheck::InOrder);
        }
        let seq = request.cseq()?.seq;
        match self.remote_seq {
            Some(remote) if seq < remote => {
                debug!(dialog = %self.id, seq, remote, "out of order request");
                return Ok(SequenceCheck::OutOfOrder);
            }
            Some(remote) if seq == remote => {
                debug!(dialog = %self.id, seq, "duplicate request");
                return Ok(SequenceCheck::Duplicate);
            }
            _ => self.remote_seq = Some(seq),
        }
        if is_target_refresh(&request.method) && !matches!(request.method, Method::Invite | Method::Update) {
            self.refresh_target(request);
        }
        Ok(SequenceCheck::InOrder)
    }

    /// Adopts the Contact of a target refresh request or of a 2xx to one.
    pub fn refresh_target(&mut self, message: &impl SipMessage) {
        if let Some(target) = contact_uri(message) {
            if target != self.remote_target {
                debug!(dialog = %self.id, %target, "remote target refreshed");
                self.remote_target = target;
            }
        }
    }
}

fn dialog_state_for(status: StatusCode) -> DialogResult<DialogState> {
    match status.as_u16() {
        101..=199 => Ok(DialogState::Early),
        200..=299 => Ok(DialogState::Confirmed),
        code => Err(DialogError::protocol_error(format!("{code} response cannot create a dialog"))),
    }
}

fn contact_uri(message: &impl SipMessage) -> Option<Uri> {
    message.contact().map(|c| c.uri)
}
