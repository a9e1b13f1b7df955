//! In-memory transport for unit tests.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::rc::Rc;

use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::config::Limits;
use crate::server::connection::{Connection, Subscriptions, Transport};

#[derive(Default)]
struct MockState {
    input: VecDeque<u8>,
    input_closed: bool,
    read_error: Option<io::ErrorKind>,
    write_budget: usize,
    written: Vec<u8>,
    read_shut: bool,
}

/// Scripted socket: reads return fed bytes then `WouldBlock` (or EOF once
/// closed); writes accept only what the current budget allows.
#[derive(Clone, Default)]
pub(crate) struct MockStream {
    state: Rc<RefCell<MockState>>,
}

impl MockStream {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn feed(&self, bytes: &[u8]) {
        self.state.borrow_mut().input.extend(bytes);
    }

    pub(crate) fn close_input(&self) {
        self.state.borrow_mut().input_closed = true;
    }

    pub(crate) fn fail_next_read(&self, kind: io::ErrorKind) {
        self.state.borrow_mut().read_error = Some(kind);
    }

    pub(crate) fn allow_write(&self, bytes: usize) {
        self.state.borrow_mut().write_budget += bytes;
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.borrow().written.clone()
    }

    pub(crate) fn read_shut(&self) -> bool {
        self.state.borrow().read_shut
    }
}

impl Read for MockStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if let Some(kind) = state.read_error.take() {
            return Err(kind.into());
        }
        if state.input.is_empty() {
            return if state.input_closed || state.read_shut {
                Ok(0)
            } else {
                Err(io::ErrorKind::WouldBlock.into())
            };
        }
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.borrow_mut();
        if state.write_budget == 0 {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(state.write_budget);
        state.write_budget -= n;
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Source for MockStream {
    fn register(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
        Ok(())
    }

    fn reregister(&mut self, _: &Registry, _: Token, _: Interest) -> io::Result<()> {
        Ok(())
    }

    fn deregister(&mut self, _: &Registry) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for MockStream {
    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        if matches!(how, Shutdown::Read | Shutdown::Both) {
            self.state.borrow_mut().read_shut = true;
        }
        Ok(())
    }
}

pub(crate) fn mock_connection() -> (Connection, MockStream) {
    let mock = MockStream::new();
    let conn = Connection::new(
        Box::new(mock.clone()),
        Token(2),
        "mock",
        Subscriptions::default(),
        &Limits::default(),
    );
    (conn, mock)
}
