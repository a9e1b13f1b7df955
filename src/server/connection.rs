//! Buffered, non-blocking connection.
//!
//! A [`Connection`] owns one client socket together with its read and write
//! buffers. The reactor pulls bytes in with [`Connection::drain_read`] and
//! pushes them out with [`Connection::flush_write`]; handlers only ever queue
//! output with [`Connection::push`] / [`Connection::send`] or ask for the
//! connection to end with [`Connection::teardown`].
//!
//! ```text
//!   Open ──half_close / teardown(false)──▶ Draining ──write buffer empty──▶ Closed
//!     │                                                                     ▲
//!     └──────────── teardown(true) / peer EOF / socket error ───────────────┘
//! ```

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use mio::Token;
use mio::event::Source;
use tracing::{debug, warn};

use crate::config::Limits;
use crate::http::request::Request;
use crate::http::writer::Outgoing;
use crate::server::signal::Signal;

/// The byte stream under a connection.
pub trait Transport: Read + Write + Source {
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;
}

impl Transport for mio::net::TcpStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        mio::net::TcpStream::shutdown(self, how)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Open,
    /// Input is refused; pending output is still flushed.
    Draining,
    Closed,
}

/// Per-connection notification flags.
///
/// The server keeps a template that is copied onto every accepted connection;
/// each connection may then change its own copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subscriptions {
    /// Notify when the write buffer has just been flushed empty.
    pub drained: bool,
    /// Let the fault hook rewrite canned error responses.
    pub fault: bool,
}

/// Result of one [`Connection::drain_read`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Bytes were appended to the read buffer.
    Data(usize),
    /// Bytes arrived after a half-close and were dropped.
    Discarded(usize),
    /// The socket has nothing more for now.
    WouldBlock,
    /// The peer closed after we half-closed; nothing to do.
    Eof,
}

pub struct Connection {
    token: Token,
    peer: String,
    stream: Box<dyn Transport>,
    read_buf: BytesMut,
    write_buf: BytesMut,
    state: StreamState,
    pending: Option<Request>,
    subscriptions: Subscriptions,
    read_chunk: usize,
    max_write_buffer: Option<usize>,
    last_active: Instant,
}

impl Connection {
    pub fn new(
        stream: Box<dyn Transport>,
        token: Token,
        peer: impl Into<String>,
        subscriptions: Subscriptions,
        limits: &Limits,
    ) -> Self {
        Self {
            token,
            peer: peer.into(),
            stream,
            read_buf: BytesMut::with_capacity(limits.read_chunk_bytes),
            write_buf: BytesMut::new(),
            state: StreamState::Open,
            pending: None,
            subscriptions,
            read_chunk: limits.read_chunk_bytes,
            max_write_buffer: limits.max_write_buffer_bytes,
            last_active: Instant::now(),
        }
    }

    pub fn token(&self) -> Token {
        self.token
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == StreamState::Open
    }

    /// True iff output is queued and the connection is not closed.
    pub fn is_write_ready(&self) -> bool {
        !self.write_buf.is_empty() && self.state != StreamState::Closed
    }

    /// Closed, or draining with nothing left to send.
    pub(crate) fn is_finished(&self) -> bool {
        match self.state {
            StreamState::Open => false,
            StreamState::Draining => self.write_buf.is_empty(),
            StreamState::Closed => true,
        }
    }

    pub fn write_pending(&self) -> usize {
        self.write_buf.len()
    }

    /// Time since bytes last moved in either direction.
    pub fn idle_for(&self) -> Duration {
        self.last_active.elapsed()
    }

    pub fn subscriptions(&self) -> Subscriptions {
        self.subscriptions
    }

    pub fn subscriptions_mut(&mut self) -> &mut Subscriptions {
        &mut self.subscriptions
    }

    pub fn read_buffer(&self) -> &[u8] {
        &self.read_buf
    }

    /// Inbound bytes not consumed yet; upgraded protocols take from here.
    pub fn read_buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.read_buf
    }

    pub fn pending_request(&self) -> Option<&Request> {
        self.pending.as_ref()
    }

    pub(crate) fn set_request(&mut self, request: Request) {
        self.pending = Some(request);
    }

    pub fn take_request(&mut self) -> Option<Request> {
        self.pending.take()
    }

    pub(crate) fn source_mut(&mut self) -> &mut dyn Transport {
        &mut *self.stream
    }

    /// Reads at most one chunk from the socket.
    ///
    /// A zero-length read means the peer closed. That is expected after a
    /// half-close; otherwise buffered input is dropped and the connection
    /// asks to be torn down.
    pub fn drain_read(&mut self) -> Result<ReadOutcome, Signal> {
        if self.state == StreamState::Closed {
            return Err(Signal::Teardown);
        }

        let start = self.read_buf.len();
        self.read_buf.resize(start + self.read_chunk, 0);

        let result = loop {
            match self.stream.read(&mut self.read_buf[start..]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(0) => {
                self.read_buf.truncate(start);
                if self.state == StreamState::Draining {
                    return Ok(ReadOutcome::Eof);
                }
                debug!(peer = %self.peer, "peer closed connection");
                Err(self.close())
            }
            Ok(n) if self.state == StreamState::Draining => {
                self.read_buf.truncate(start);
                Ok(ReadOutcome::Discarded(n))
            }
            Ok(n) => {
                self.read_buf.truncate(start + n);
                self.last_active = Instant::now();
                Ok(ReadOutcome::Data(n))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.read_buf.truncate(start);
                Ok(ReadOutcome::WouldBlock)
            }
            Err(e) => {
                self.read_buf.truncate(start);
                Err(self.abort(&e))
            }
        }
    }

    /// Writes as much queued output as the socket accepts.
    ///
    /// Returns whether the write buffer is now empty. Emptying the buffer of a
    /// draining connection completes the graceful close.
    pub fn flush_write(&mut self) -> Result<bool, Signal> {
        if self.state == StreamState::Closed {
            return Err(Signal::Teardown);
        }

        while !self.write_buf.is_empty() {
            match self.stream.write(&self.write_buf) {
                Ok(0) => {
                    let e = io::Error::from(io::ErrorKind::WriteZero);
                    return Err(self.abort(&e));
                }
                Ok(n) => {
                    self.write_buf.advance(n);
                    self.last_active = Instant::now();
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.abort(&e)),
            }
        }

        let empty = self.write_buf.is_empty();
        if empty && self.state == StreamState::Draining {
            debug!(peer = %self.peer, "output drained, closing");
            return Err(self.close());
        }
        Ok(empty)
    }

    /// Queues raw bytes for sending.
    pub fn push(&mut self, bytes: &[u8]) -> Result<(), Signal> {
        if self.state == StreamState::Closed {
            return Err(Signal::Teardown);
        }

        let pending = self.write_buf.len() + bytes.len();
        if let Some(limit) = self.max_write_buffer {
            if pending > limit {
                return Err(Signal::Overflow { pending, limit });
            }
        }

        self.write_buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Queues a response and starts a graceful close if it asks for one.
    pub fn send(&mut self, out: &impl Outgoing) -> Result<(), Signal> {
        self.push(&out.to_bytes())?;
        if out.should_close() {
            self.teardown(false)?;
        }
        Ok(())
    }

    /// Stops accepting input while still flushing queued output.
    pub fn half_close(&mut self) {
        if self.state != StreamState::Open {
            return;
        }
        if let Err(e) = self.stream.shutdown(Shutdown::Read) {
            debug!(peer = %self.peer, error = %e, "read shutdown failed");
        }
        self.state = StreamState::Draining;
        self.read_buf.clear();
        self.pending = None;
    }

    /// Ends the connection.
    ///
    /// A forced teardown, or one with nothing left to send, closes at once and
    /// returns [`Signal::Teardown`]. Otherwise the connection half-closes and
    /// finishes once its output is flushed.
    pub fn teardown(&mut self, force: bool) -> Result<(), Signal> {
        if force || self.write_buf.is_empty() || self.state == StreamState::Closed {
            return Err(self.close());
        }
        self.half_close();
        Ok(())
    }

    /// Drops a connection after an error that leaves its stream unusable.
    pub(crate) fn abort(&mut self, error: &io::Error) -> Signal {
        warn!(peer = %self.peer, error = %error, "stream fault, dropping connection");
        self.close()
    }

    fn close(&mut self) -> Signal {
        if self.state != StreamState::Closed {
            // the socket itself is released when the connection is dropped
            let _ = self.stream.shutdown(Shutdown::Both);
            self.state = StreamState::Closed;
        }
        self.read_buf.clear();
        self.write_buf.clear();
        self.pending = None;
        Signal::Teardown
    }
}
