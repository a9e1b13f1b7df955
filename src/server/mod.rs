//! Reactor layer: sockets, buffers, the connection table and the loop.

pub mod connection;
pub mod listener;
pub mod reactor;
pub mod signal;
pub mod table;

#[cfg(test)]
pub(crate) mod testing;
