//! Messages as they arrive from real peers: bare LF line endings, comma
//! joined list headers, extension headers and non-session bodies.

use proptest::prelude::*;
use sipua_sip_core::prelude::*;
use sipua_sip_core::parse_message;

fn request(raw: &str) -> Request {
    match parse_message(raw).expect("parse failed") {
        Message::Request(request) => request,
        Message::Response(response) => panic!("expected a request, got {}", response.status),
    }
}

#[test]
fn test_bare_lf_message_with_body() {
    let raw = "MESSAGE sip:bob@example.com SIP/2.0\n\
Via: SIP/2.0/UDP alice.example.com;branch=z9hG4bK776sgdkse\n\
From: <sip:alice@example.com>;tag=49583\n\
To: <sip:bob@example.com>\n\
Call-ID: asd88asd77a@1.2.3.4\n\
CSeq: 1 MESSAGE\n\
Content-Type: text/plain\n\
Content-Length: 5\n\
\n\
hello";
    let request = request(raw);
    assert_eq!(request.method, Method::Message);
    let body = request.body.as_ref().unwrap();
    assert_eq!(body.content, "hello");
    assert_eq!(body.content_disposition, "render");
    assert!(request.session_body().is_none());
}

#[test]
fn test_comma_joined_via_values_are_flattened() {
    let raw = "SIP/2.0 200 OK\r\n\
Via: SIP/2.0/UDP first.example.com;branch=z9hG4bKa, SIP/2.0/UDP second.example.com;branch=z9hG4bKb\r\n\
Via: SIP/2.0/TCP third.example.com;branch=z9hG4bKc\r\n\
From: <sip:alice@example.com>;tag=1\r\n\
To: <sip:bob@example.com>;tag=2\r\n\
Call-ID: x\r\n\
CSeq: 7 OPTIONS\r\n\
Content-Length: 0\r\n\r\n";
    let Message::Response(response) = parse_message(raw).unwrap() else {
        panic!("expected response");
    };
    let vias = response.headers.values(&HeaderName::Via);
    assert_eq!(vias.len(), 3);
    assert_eq!(response.branch().as_deref(), Some("z9hG4bKa"));
    assert_eq!(response.cseq().unwrap(), CSeq::new(7, Method::Options));
}

#[test]
fn test_extension_headers_survive_reserialization() {
    let raw = "OPTIONS sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP alice.example.com;branch=z9hG4bK1\r\n\
From: <sip:alice@example.com>;tag=1\r\n\
To: <sip:bob@example.com>\r\n\
Call-ID: y\r\n\
CSeq: 1 OPTIONS\r\n\
X-Trace-Id: 42\r\n\
Content-Length: 0\r\n\r\n";
    let parsed = request(raw);
    let text = parsed.to_string();
    assert!(text.contains("X-Trace-Id: 42\r\n") || text.contains("x-trace-id: 42\r\n"));
    assert_eq!(request(&text), parsed);
}

#[test]
fn test_explicit_disposition_is_kept() {
    let request = Request::new(Method::Info, "sip:bob@example.com".parse().unwrap())
        .with_header(HeaderName::CSeq, "3 INFO")
        .with_body(Body::sdp("v=0\r\n").with_disposition("early-session"));
    let text = request.to_string();
    assert!(text.contains("Content-Disposition: early-session\r\n"));

    let parsed = parse_message(&text).unwrap();
    let Message::Request(parsed) = parsed else {
        panic!("expected request");
    };
    let body = parsed.body.unwrap();
    assert_eq!(body.content_disposition, "early-session");
    assert!(!body.is_session());
}

#[test]
fn test_missing_content_type_with_body_is_rejected() {
    let raw = "MESSAGE sip:bob@example.com SIP/2.0\r\nContent-Length: 2\r\n\r\nhi";
    assert!(parse_message(raw).is_err());
}

#[test]
fn test_status_line_without_reason() {
    let Message::Response(response) = parse_message("SIP/2.0 486\r\nContent-Length: 0\r\n\r\n").unwrap() else {
        panic!("expected response");
    };
    assert_eq!(response.status, StatusCode::BUSY_HERE);
    assert_eq!(response.reason, "");
}

#[test]
fn test_parsed_message_survives_json() {
    let raw = "INVITE sip:bob@example.com;transport=tcp SIP/2.0\r\n\
Via: SIP/2.0/TCP alice.example.com;branch=z9hG4bK74bf9;received=192.0.2.4\r\n\
Max-Forwards: 70\r\n\
From: \"Alice\" <sip:alice@example.com>;tag=9fxced76sl\r\n\
To: <sip:bob@example.com>\r\n\
Call-ID: 3848276298220188511@example.com\r\n\
CSeq: 1 INVITE\r\n\
Contact: <sip:alice@alice.example.com;transport=tcp>\r\n\
X-Trace: abc\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 4\r\n\
\r\n\
v=0\n";
    let message = parse_message(raw).unwrap();
    let json = serde_json::to_string(&message).unwrap();
    let back: Message = serde_json::from_str(&json).unwrap();
    assert_eq!(back, message);
    assert_eq!(back.to_string(), message.to_string());
}

proptest! {
    #[test]
    fn test_parser_never_panics(input in "\\PC{0,400}") {
        let _ = parse_message(&input);
    }

    #[test]
    fn test_any_valid_status_code_parses(code in 100u16..700) {
        let raw = format!("SIP/2.0 {code} Whatever\r\nContent-Length: 0\r\n\r\n");
        let Message::Response(response) = parse_message(&raw).unwrap() else {
            panic!("expected response");
        };
        prop_assert_eq!(response.status.as_u16(), code);
    }
}
