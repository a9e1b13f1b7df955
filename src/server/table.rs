use std::collections::HashMap;

use mio::{Interest, Token};

use crate::server::connection::Connection;
use crate::server::signal::Upgraded;

/// What interprets a connection's inbound bytes.
pub(crate) enum Protocol {
    Http,
    Upgraded(Box<dyn Upgraded>),
}

/// One entry of the connection table.
pub(crate) struct Node {
    pub(crate) conn: Connection,
    pub(crate) protocol: Protocol,
    /// Interest currently registered with the poller
    pub(crate) interest: Interest,
}

impl Node {
    pub(crate) fn http(conn: Connection) -> Self {
        Self {
            conn,
            protocol: Protocol::Http,
            interest: Interest::READABLE,
        }
    }

    /// Interest the node should be registered with right now.
    pub(crate) fn wanted_interest(&self) -> Interest {
        if self.conn.is_write_ready() {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        }
    }
}

/// The active connections, keyed by poll token.
///
/// Only the reactor inserts and removes entries. The heartbeat hook gets
/// mutable access to the connections themselves, e.g. to close idle ones.
#[derive(Default)]
pub struct ConnectionSet {
    nodes: HashMap<Token, Node>,
}

impl ConnectionSet {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, token: Token) -> Option<&Connection> {
        self.nodes.get(&token).map(|node| &node.conn)
    }

    pub fn get_mut(&mut self, token: Token) -> Option<&mut Connection> {
        self.nodes.get_mut(&token).map(|node| &mut node.conn)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.nodes.values().map(|node| &node.conn)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.nodes.values_mut().map(|node| &mut node.conn)
    }

    pub(crate) fn insert(&mut self, token: Token, node: Node) {
        self.nodes.insert(token, node);
    }

    pub(crate) fn remove(&mut self, token: Token) -> Option<Node> {
        self.nodes.remove(&token)
    }

    pub(crate) fn node_mut(&mut self, token: Token) -> Option<&mut Node> {
        self.nodes.get_mut(&token)
    }

    pub(crate) fn nodes_mut(&mut self) -> impl Iterator<Item = (&Token, &mut Node)> {
        self.nodes.iter_mut()
    }

    pub(crate) fn tokens(&self) -> Vec<Token> {
        self.nodes.keys().copied().collect()
    }

    /// Tokens of connections that are closed or done draining.
    pub(crate) fn finished(&self) -> Vec<Token> {
        self.nodes
            .iter()
            .filter(|(_, node)| node.conn.is_finished())
            .map(|(token, _)| *token)
            .collect()
    }
}
