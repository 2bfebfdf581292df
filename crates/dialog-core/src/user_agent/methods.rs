//! Per-method behavior of user-agent clients and servers.

use std::fmt;

use sipua_sip_core::{Method, StatusCode};

/// What a server does with a request no delegate took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultReply {
    Accept,
    Reject(StatusCode),
}

/// Method-specific behavior selected by method and dialog context
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Invite,
    /// INVITE inside an established dialog
    ReInvite,
    Bye,
    Cancel,
    Info,
    Message,
    Notify,
    Options,
    Prack,
    Publish,
    Refer,
    Register,
    Subscribe,
    Update,
    Other(Method),
}

impl RequestKind {
    pub fn for_method(method: &Method, in_dialog: bool) -> Self {
        match method {
            Method::Invite if in_dialog => RequestKind::ReInvite,
            Method::Invite => RequestKind::Invite,
            Method::Bye => RequestKind::Bye,
            Method::Cancel => RequestKind::Cancel,
            Method::Info => RequestKind::Info,
            Method::Message => RequestKind::Message,
            Method::Notify => RequestKind::Notify,
            Method::Options => RequestKind::Options,
            Method::Prack => RequestKind::Prack,
            Method::Publish => RequestKind::Publish,
            Method::Refer => RequestKind::Refer,
            Method::Register => RequestKind::Register,
            Method::Subscribe => RequestKind::Subscribe,
            Method::Update => RequestKind::Update,
            other => RequestKind::Other(other.clone()),
        }
    }

    pub fn method(&self) -> Method {
        match self {
            RequestKind::Invite | RequestKind::ReInvite => Method::Invite,
            RequestKind::Bye => Method::Bye,
            RequestKind::Cancel => Method::Cancel,
            RequestKind::Info => Method::Info,
            RequestKind::Message => Method::Message,
            RequestKind::Notify => Method::Notify,
            RequestKind::Options => Method::Options,
            RequestKind::Prack => Method::Prack,
            RequestKind::Publish => Method::Publish,
            RequestKind::Refer => Method::Refer,
            RequestKind::Register => Method::Register,
            RequestKind::Subscribe => Method::Subscribe,
            RequestKind::Update => Method::Update,
            RequestKind::Other(method) => method.clone(),
        }
    }

    pub fn is_invite(&self) -> bool {
        matches!(self, RequestKind::Invite | RequestKind::ReInvite)
    }

    /// Requests that carry our Contact when built out of dialog
    pub fn adds_contact(&self) -> bool {
        matches!(
            self,
            RequestKind::Invite
                | RequestKind::ReInvite
                | RequestKind::Notify
                | RequestKind::Refer
                | RequestKind::Register
                | RequestKind::Subscribe
                | RequestKind::Update
        )
    }

    /// Requests (and their 2xx) that advertise Allow and Supported
    pub fn advertises_capabilities(&self) -> bool {
        matches!(
            self,
            RequestKind::Invite | RequestKind::ReInvite | RequestKind::Options | RequestKind::Update
        )
    }

    /// Only meaningful inside a dialog; out of dialog they get a 481
    pub fn requires_dialog(&self) -> bool {
        matches!(
            self,
            RequestKind::Bye | RequestKind::Prack | RequestKind::Update | RequestKind::Info | RequestKind::ReInvite
        )
    }

    /// Reply for an in-dialog request the session delegate did not take
    pub fn unhandled_in_dialog(&self) -> DefaultReply {
        match self {
            RequestKind::Bye
            | RequestKind::Message
            | RequestKind::Notify
            | RequestKind::Prack
            | RequestKind::Options => DefaultReply::Accept,
            RequestKind::Info => DefaultReply::Reject(StatusCode::BAD_INFO_PACKAGE),
            RequestKind::Refer => DefaultReply::Reject(StatusCode::TEMPORARILY_UNAVAILABLE),
            RequestKind::Update => DefaultReply::Reject(StatusCode::SERVER_TIMEOUT),
            RequestKind::ReInvite | RequestKind::Invite => DefaultReply::Reject(StatusCode::NOT_ACCEPTABLE_HERE),
            _ => DefaultReply::Reject(StatusCode::NOT_IMPLEMENTED),
        }
    }

    /// Reply for an out-of-dialog request the core delegate did not take
    pub fn unhandled_out_of_dialog(&self) -> DefaultReply {
        match self {
            RequestKind::Message | RequestKind::Options => DefaultReply::Accept,
            RequestKind::Invite | RequestKind::Subscribe => DefaultReply::Reject(StatusCode::TEMPORARILY_UNAVAILABLE),
            _ => DefaultReply::Reject(StatusCode::METHOD_NOT_ALLOWED),
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestKind::ReInvite => write!(f, "re-INVITE"),
            other => write!(f, "{}", other.method()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_inside_a_dialog_is_a_reinvite() {
        assert_eq!(RequestKind::for_method(&Method::Invite, true), RequestKind::ReInvite);
        assert_eq!(RequestKind::for_method(&Method::Invite, false), RequestKind::Invite);
        assert_eq!(RequestKind::ReInvite.method(), Method::Invite);
        assert_eq!(RequestKind::ReInvite.to_string(), "re-INVITE");
    }

    #[test]
    fn test_in_dialog_defaults() {
        assert_eq!(RequestKind::Bye.unhandled_in_dialog(), DefaultReply::Accept);
        assert_eq!(
            RequestKind::Info.unhandled_in_dialog(),
            DefaultReply::Reject(StatusCode::BAD_INFO_PACKAGE)
        );
        assert_eq!(
            RequestKind::Update.unhandled_in_dialog(),
            DefaultReply::Reject(StatusCode::SERVER_TIMEOUT)
        );
        assert_eq!(
            RequestKind::Other(Method::Extension("FOO".into())).unhandled_in_dialog(),
            DefaultReply::Reject(StatusCode::NOT_IMPLEMENTED)
        );
    }
}
