use crate::http::headers::Headers;
use crate::http::request::{Request, Version};

/// HTTP status codes supported by the server.
///
/// Common HTTP status codes used in responses:
/// - `SwitchingProtocols` (101): Connection handed to another protocol
/// - `Ok` (200): Request successful
/// - `NoContent` (204): Successful request with no content
/// - `BadRequest` (400): Malformed request
/// - `NotFound` (404): No handler for the path
/// - `UriTooLong` (414): Request target over the configured ceiling
/// - `RequestHeaderFieldsTooLarge` (431): Request head over the configured ceiling
/// - `HttpVersionNotSupported` (505): Version other than 1.0 or 1.1
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    /// 101 Switching Protocols
    SwitchingProtocols,
    /// 200 OK
    Ok,
    /// 204 No Content
    NoContent,
    /// 400 Bad Request
    BadRequest,
    /// 404 Not Found
    NotFound,
    /// 414 URI Too Long
    UriTooLong,
    /// 431 Request Header Fields Too Large
    RequestHeaderFieldsTooLarge,
    /// 505 HTTP Version Not Supported
    HttpVersionNotSupported,
}

impl StatusCode {
    /// Returns the numeric HTTP status code.
    ///
    /// # Example
    ///
    /// ```
    /// # use spindle::http::response::StatusCode;
    /// assert_eq!(StatusCode::Ok.as_u16(), 200);
    /// assert_eq!(StatusCode::RequestHeaderFieldsTooLarge.as_u16(), 431);
    /// ```
    pub fn as_u16(&self) -> u16 {
        match self {
            StatusCode::SwitchingProtocols => 101,
            StatusCode::Ok => 200,
            StatusCode::NoContent => 204,
            StatusCode::BadRequest => 400,
            StatusCode::NotFound => 404,
            StatusCode::UriTooLong => 414,
            StatusCode::RequestHeaderFieldsTooLarge => 431,
            StatusCode::HttpVersionNotSupported => 505,
        }
    }

    /// Returns the standard HTTP reason phrase for this status code.
    pub fn reason_phrase(&self) -> &'static str {
        match self {
            StatusCode::SwitchingProtocols => "Switching Protocols",
            StatusCode::Ok => "OK",
            StatusCode::NoContent => "No Content",
            StatusCode::BadRequest => "Bad Request",
            StatusCode::NotFound => "Not Found",
            StatusCode::UriTooLong => "URI Too Long",
            StatusCode::RequestHeaderFieldsTooLarge => "Request Header Fields Too Large",
            StatusCode::HttpVersionNotSupported => "HTTP Version Not Supported",
        }
    }

    /// Statuses that never carry a body and so never get `Content-Length`.
    pub fn is_bodiless(&self) -> bool {
        matches!(self, StatusCode::SwitchingProtocols | StatusCode::NoContent)
    }
}

/// Represents a complete HTTP response ready to be sent to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: StatusCode,
    /// Version written on the status line
    pub version: Version,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Close the connection once this response has been flushed
    pub close: bool,
}

/// Builder for constructing HTTP responses in a fluent style.
///
/// # Example
///
/// ```ignore
/// let response = ResponseBuilder::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(b"{}".to_vec())
///     .build();
/// ```
pub struct ResponseBuilder {
    status: StatusCode,
    version: Version,
    headers: Headers,
    body: Vec<u8>,
    close: bool,
}

impl ResponseBuilder {
    /// Creates a new response builder with the specified status code.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            version: Version::Http11,
            headers: Headers::new(),
            body: Vec::new(),
            close: false,
        }
    }

    /// Adds a header, keeping earlier values with the same name.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Sets the response body.
    pub fn body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn close(mut self, close: bool) -> Self {
        self.close = close;
        self
    }

    /// Answers `request` in its own version and connection mode.
    pub fn reply_to(self, request: &Request) -> Self {
        self.version(request.version).close(request.should_close())
    }

    /// Builds the final Response.
    ///
    /// Automatically sets `Content-Length` from the body unless the status is
    /// bodiless.
    pub fn build(mut self) -> Response {
        if !self.status.is_bodiless() && !self.headers.contains("Content-Length") {
            self.headers
                .append("Content-Length", self.body.len().to_string());
        }

        Response {
            status: self.status,
            version: self.version,
            headers: self.headers,
            body: self.body,
            close: self.close,
        }
    }
}

impl Response {
    pub fn builder(status: StatusCode) -> ResponseBuilder {
        ResponseBuilder::new(status)
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key)
    }
}
