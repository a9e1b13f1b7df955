use crate::http::response::Response;

/// Anything the server can queue on a connection.
///
/// The connection only needs the wire bytes and whether the connection should
/// be closed once those bytes are flushed.
pub trait Outgoing {
    fn to_bytes(&self) -> Vec<u8>;

    fn should_close(&self) -> bool;
}

/// Serializes a response into its wire form.
///
/// `Connection: close` is added when the response closes the connection and
/// no `Connection` header was set explicitly.
pub fn serialize_response(resp: &Response) -> Vec<u8> {
    let mut buf = Vec::with_capacity(128 + resp.body.len());

    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        resp.version,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.extend_from_slice(status_line.as_bytes());

    // Headers
    for (k, v) in resp.headers.pairs() {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }
    if resp.close && !resp.headers.contains("Connection") {
        buf.extend_from_slice(b"Connection: close\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    // Body
    buf.extend_from_slice(&resp.body);

    buf
}

impl Outgoing for Response {
    fn to_bytes(&self) -> Vec<u8> {
        serialize_response(self)
    }

    fn should_close(&self) -> bool {
        self.close
    }
}
