//! Control-flow signals.
//!
//! Everything below the reactor loop (buffer I/O, parsing, routing, handlers)
//! reports state changes by returning a [`Signal`] as the error side of a
//! `Result`. Only the loop matches on it, so cleanup for a connection lives in
//! one place and nested code never touches the connection table.

use std::fmt;

use crate::http::fault::HttpFault;
use crate::server::connection::Connection;

pub enum Signal {
    /// The connection is finished and must leave the table.
    Teardown,
    /// Hand the connection over to another protocol.
    Upgrade(Box<dyn Upgraded>),
    /// The request could not be served; answer with the fault's response.
    Fault(HttpFault),
    /// Queued output would exceed the write ceiling.
    Overflow { pending: usize, limit: usize },
}

/// A protocol that takes over a connection after an upgrade.
///
/// The connection keeps its socket, buffers and token; only the code that
/// interprets inbound bytes changes.
pub trait Upgraded {
    /// Called whenever the read buffer holds bytes, including bytes that
    /// were already buffered when the upgrade happened. Consume what you use.
    fn on_data(&mut self, conn: &mut Connection) -> Result<(), Signal>;

    /// Called when the write buffer has just been flushed empty.
    fn on_drained(&mut self, _conn: &mut Connection) -> Result<(), Signal> {
        Ok(())
    }

    fn name(&self) -> &str {
        "upgraded"
    }
}

impl Signal {
    pub fn upgrade(protocol: impl Upgraded + 'static) -> Self {
        Signal::Upgrade(Box::new(protocol))
    }
}

impl From<HttpFault> for Signal {
    fn from(fault: HttpFault) -> Self {
        Signal::Fault(fault)
    }
}

impl fmt::Debug for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Teardown => f.write_str("Teardown"),
            Signal::Upgrade(protocol) => f.debug_tuple("Upgrade").field(&protocol.name()).finish(),
            Signal::Fault(fault) => f.debug_tuple("Fault").field(fault).finish(),
            Signal::Overflow { pending, limit } => f
                .debug_struct("Overflow")
                .field("pending", pending)
                .field("limit", limit)
                .finish(),
        }
    }
}
