//! Incremental request-head parser.
//!
//! The parser is called every time new bytes land in a connection's read
//! buffer. It either finds a complete head (request line plus headers ended by
//! `CRLF CRLF`) or reports that more data is needed. Size ceilings are checked
//! on every call so that an oversized head is rejected as soon as it crosses
//! the limit, and the outcome never depends on how the bytes were chunked.

use bytes::{Buf, BytesMut};

use crate::config::Limits;
use crate::http::fault::{FaultKind, HttpFault};
use crate::http::headers::Headers;
use crate::http::request::{Method, Request, Version};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// No complete head in the buffer yet
    Incomplete,
    Fault(FaultKind),
}

impl From<FaultKind> for ParseError {
    fn from(kind: FaultKind) -> Self {
        ParseError::Fault(kind)
    }
}

/// Parses one request head off the front of `buf`.
///
/// On success the head (terminator included) is consumed and any trailing
/// bytes stay buffered. On a fault the whole buffer is discarded, since the
/// connection is going away.
pub fn parse_request(buf: &mut BytesMut, limits: &Limits) -> Result<Option<Request>, HttpFault> {
    match parse_http_request(buf, limits) {
        Ok((request, consumed)) => {
            buf.advance(consumed);
            Ok(Some(request))
        }
        Err(ParseError::Incomplete) => Ok(None),
        Err(ParseError::Fault(kind)) => {
            // a target fault can fire before the version arrives; answering it
            // in HTTP/1.1 keeps the outcome independent of chunking
            let version = match kind {
                FaultKind::TargetTooLong { .. } => Version::Http11,
                _ => request_line_version(&buf[..buf.len().min(limits.max_header_bytes)]),
            };
            buf.clear();
            Err(HttpFault::fatal(kind, version))
        }
    }
}

/// Parses a request head from `buf` without consuming it.
///
/// Returns the request and the number of bytes the head occupies.
pub fn parse_http_request(buf: &[u8], limits: &Limits) -> Result<(Request, usize), ParseError> {
    let Some(headers_end) = find_headers_end(buf) else {
        check_target(buf, limits)?;
        if buf.len() > limits.max_header_bytes {
            return Err(FaultKind::HeaderTooLarge {
                limit: limits.max_header_bytes,
            }
            .into());
        }
        return Err(ParseError::Incomplete);
    };

    let header_bytes = &buf[..headers_end];
    let consumed = headers_end + 4;

    check_target(header_bytes, limits)?;
    if consumed > limits.max_header_bytes {
        return Err(FaultKind::HeaderTooLarge {
            limit: limits.max_header_bytes,
        }
        .into());
    }

    let headers_str = std::str::from_utf8(header_bytes)
        .map_err(|_| FaultKind::Malformed("request head is not valid UTF-8"))?;

    let mut lines = headers_str.split("\r\n");

    // Request line
    let request_line = lines.next().unwrap_or_default();
    let parts: Vec<&str> = request_line.split(' ').collect();
    let [method, target, version] = parts[..] else {
        return Err(FaultKind::Malformed("request line must have three parts").into());
    };
    if method.is_empty() || target.is_empty() {
        return Err(FaultKind::Malformed("empty request line token").into());
    }

    let version = match Version::parse(version) {
        Ok(Some(version)) => version,
        Ok(None) => return Err(FaultKind::UnsupportedVersion(version.to_string()).into()),
        Err(()) => return Err(FaultKind::Malformed("invalid protocol version").into()),
    };

    let (path, query) = match target.split_once('?') {
        Some((path, query)) => (path.to_string(), Some(query.to_string())),
        None => (target.to_string(), None),
    };

    // Headers
    let mut headers = Headers::new();
    for line in lines {
        let (name, value) = line.split_once(':').unwrap_or((line, ""));
        headers.append(name.trim(), value.trim());
    }

    let request = Request {
        method: Method::from_token(method),
        path,
        query,
        version,
        headers,
    };

    Ok((request, consumed))
}

/// Version named by a complete, well-formed request line; HTTP/1.1 otherwise.
fn request_line_version(buf: &[u8]) -> Version {
    let Some(line_end) = buf.windows(2).position(|w| w == b"\r\n") else {
        return Version::Http11;
    };
    let Ok(line) = std::str::from_utf8(&buf[..line_end]) else {
        return Version::Http11;
    };

    match line.split(' ').collect::<Vec<_>>()[..] {
        [_, _, version] => match Version::parse(version) {
            Ok(Some(version)) => version,
            _ => Version::Http11,
        },
        _ => Version::Http11,
    }
}

fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

/// Rejects a request target longer than the ceiling, even if the request
/// line is still incomplete.
fn check_target(head: &[u8], limits: &Limits) -> Result<(), ParseError> {
    let line_end = head
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(head.len());
    let line = &head[..line_end];

    let Some(start) = line.iter().position(|&b| b == b' ') else {
        return Ok(());
    };
    let rest = &line[start + 1..];
    let target_len = rest.iter().position(|&b| b == b' ').unwrap_or(rest.len());

    if target_len > limits.max_target_bytes {
        return Err(FaultKind::TargetTooLong {
            limit: limits.max_target_bytes,
        }
        .into());
    }
    Ok(())
}
