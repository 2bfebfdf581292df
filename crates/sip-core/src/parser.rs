//! Wire parser for SIP messages.
//!
//! The parser is tolerant about line endings (`\r\n` or bare `\n`) and
//! unfolds continuation lines before tokenizing. The body is delimited by
//! Content-Length when present, otherwise it runs to the end of the input.

use nom::{
    branch::alt,
    bytes::complete::{tag, take_till1, take_while1, take_while_m_n},
    character::complete::{char, not_line_ending, space0, space1},
    combinator::{all_consuming, eof, map, map_res, rest},
    sequence::{separated_pair, terminated, tuple},
    IResult,
};
use tracing::trace;

use crate::error::{Error, Result};
use crate::header::{HeaderName, Headers};
use crate::message::{Message, Request, Response, SIP_VERSION};
use crate::method::Method;
use crate::status::StatusCode;
use crate::types::Body;
use crate::uri::Uri;

/// `token` characters from RFC 3261 §25.1
pub fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "-.!%*_+`'~".contains(c)
}

enum StartLine {
    Request(Method, Uri),
    Status(StatusCode, String),
}

fn request_line(input: &str) -> IResult<&str, StartLine> {
    map_res(
        all_consuming(tuple((
            take_while1(is_token_char),
            space1,
            take_till1(|c: char| c == ' '),
            space1,
            tag(SIP_VERSION),
            space0,
        ))),
        |(method, _, uri, _, _, _): (&str, &str, &str, &str, &str, &str)| -> Result<StartLine> {
            Ok(StartLine::Request(method.parse()?, uri.parse()?))
        },
    )(input)
}

fn status_line(input: &str) -> IResult<&str, StartLine> {
    map_res(
        all_consuming(tuple((
            tag(SIP_VERSION),
            space1,
            take_while_m_n(3, 3, |c: char| c.is_ascii_digit()),
            alt((map(tuple((space1, rest)), |(_, reason): (&str, &str)| reason), eof)),
        ))),
        |(_, _, code, reason): (&str, &str, &str, &str)| -> Result<StartLine> {
            let code: u16 = code
                .parse()
                .map_err(|_| Error::Parser(format!("bad status code '{code}'")))?;
            Ok(StartLine::Status(StatusCode::new(code)?, reason.trim().to_string()))
        },
    )(input)
}

fn start_line(input: &str) -> IResult<&str, StartLine> {
    alt((status_line, request_line))(input)
}

fn header_line(input: &str) -> IResult<&str, (&str, &str)> {
    all_consuming(separated_pair(
        terminated(take_while1(is_token_char), space0),
        char(':'),
        map(tuple((space0, not_line_ending)), |(_, value): (&str, &str)| value),
    ))(input)
}

/// Joins folded header lines (a line starting with SP or HTAB continues the
/// previous one).
fn unfold(head: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l)) {
        if line.starts_with([' ', '\t']) {
            if let Some(last) = lines.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
                continue;
            }
        }
        lines.push(line.to_string());
    }
    lines
}

fn split_head_body(input: &str) -> (&str, &str) {
    let crlf = input.find("\r\n\r\n").map(|i| (i, 4));
    let lf = input.find("\n\n").map(|i| (i, 2));
    let separator = match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    };
    match separator {
        Some((index, len)) => (&input[..index], &input[index + len..]),
        None => (input.trim_end_matches(['\r', '\n']), ""),
    }
}

/// Parses one complete SIP message from `input`.
pub fn parse_message(input: &str) -> Result<Message> {
    let input = input.trim_start_matches(['\r', '\n']);
    let (head, raw_body) = split_head_body(input);
    let mut lines = unfold(head).into_iter();

    let first = lines
        .next()
        .ok_or_else(|| Error::Parser("empty message".to_string()))?;
    let (_, start) = start_line(first.trim_end())?;

    let mut headers = Headers::new();
    let mut content_length: Option<usize> = None;
    let mut content_type: Option<String> = None;
    let mut content_disposition: Option<String> = None;

    for line in lines.filter(|l| !l.trim().is_empty()) {
        let (_, (name, value)) = header_line(&line)?;
        let name: HeaderName = name.parse()?;
        let value = value.trim().to_string();
        match name {
            HeaderName::ContentLength => {
                let length = value
                    .parse::<usize>()
                    .map_err(|_| Error::invalid_header(HeaderName::ContentLength, &value))?;
                content_length = Some(length);
            }
            HeaderName::ContentType => content_type = Some(value),
            HeaderName::ContentDisposition => content_disposition = Some(value),
            _ => headers.append(name, value),
        }
    }

    let content = match content_length {
        Some(length) => raw_body
            .get(..length)
            .ok_or_else(|| Error::Parser(format!("body shorter than Content-Length {length}")))?,
        None => raw_body,
    };

    let body = if content.is_empty() {
        None
    } else {
        let content_type = content_type
            .clone()
            .ok_or(Error::MissingHeader(HeaderName::ContentType))?;
        let mut body = Body::new(content, content_type);
        if let Some(disposition) = &content_disposition {
            // disposition-type ; params
            let kind = disposition.split(';').next().unwrap_or_default().trim();
            if !kind.is_empty() {
                body.content_disposition = kind.to_ascii_lowercase();
            }
        }
        Some(body)
    };

    let message = match start {
        StartLine::Request(method, uri) => Message::Request(Request {
            method,
            uri,
            headers,
            body,
        }),
        StartLine::Status(status, reason) => Message::Response(Response {
            status,
            reason,
            headers,
            body,
        }),
    };
    trace!(len = input.len(), "parsed SIP message");
    Ok(message)
}
