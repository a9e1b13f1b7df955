//! Protocol faults.
//!
//! A fault always carries a ready-made error response. Whether the connection
//! survives it is decided when the fault is raised: syntax and size errors
//! leave the stream in an unknown position and must disconnect, a missing
//! route follows the request's own close determination.

use crate::http::request::{Request, Version};
use crate::http::response::{Response, ResponseBuilder, StatusCode};

/// Header carrying the path that no handler claimed.
pub const UNROUTED_PATH_HEADER: &str = "X-Unrouted-Path";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FaultKind {
    #[error("malformed request: {0}")]
    Malformed(&'static str),
    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(String),
    #[error("request head exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },
    #[error("request target exceeds {limit} bytes")]
    TargetTooLong { limit: usize },
    #[error("no handler for {path}")]
    NoRoute { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpFault {
    pub kind: FaultKind,
    pub response: Response,
    pub must_disconnect: bool,
}

impl FaultKind {
    pub fn status(&self) -> StatusCode {
        match self {
            FaultKind::Malformed(_) => StatusCode::BadRequest,
            FaultKind::UnsupportedVersion(_) => StatusCode::HttpVersionNotSupported,
            FaultKind::HeaderTooLarge { .. } => StatusCode::RequestHeaderFieldsTooLarge,
            FaultKind::TargetTooLong { .. } => StatusCode::UriTooLong,
            FaultKind::NoRoute { .. } => StatusCode::NotFound,
        }
    }
}

impl HttpFault {
    /// Fault raised before a request could be read; always disconnects.
    ///
    /// `version` is the request line's version if it got that far, so an
    /// HTTP/1.0 client is answered in HTTP/1.0.
    pub fn fatal(kind: FaultKind, version: Version) -> Self {
        Self::build(kind, version, true)
    }

    /// No handler matched `request`.
    pub fn no_route(request: &Request) -> Self {
        Self::build(
            FaultKind::NoRoute {
                path: request.path.clone(),
            },
            request.version,
            request.should_close(),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    fn build(kind: FaultKind, version: Version, must_disconnect: bool) -> Self {
        let status = kind.status();
        let mut builder = ResponseBuilder::new(status)
            .version(version)
            .header("Content-Type", "text/plain")
            .close(must_disconnect);

        if let FaultKind::NoRoute { path } = &kind {
            builder = builder.header(UNROUTED_PATH_HEADER, path.as_str());
        }

        let body = format!("{} {}\n", status.as_u16(), status.reason_phrase());
        let response = builder.body(body).build();

        Self {
            kind,
            response,
            must_disconnect,
        }
    }
}

impl std::fmt::Display for HttpFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.kind, self.response.status.as_u16())
    }
}

impl std::error::Error for HttpFault {}
