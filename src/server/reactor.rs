//! The reactor loop.
//!
//! One thread, one poller. Each turn of the loop:
//!
//! 1. runs the heartbeat hook if it is due,
//! 2. registers write interest for every connection with queued output,
//! 3. blocks in `poll` until a socket is ready or the heartbeat is due,
//! 4. accepts new connections / reads, parses and dispatches requests,
//! 5. flushes queued output and fires drained notifications,
//! 6. settles every [`Signal`] raised along the way.
//!
//! A connection gets a bounded number of reads per turn. One that still has
//! input when its budget runs out is read again on the next turn, which then
//! polls without blocking.
//!
//! Signals are matched in exactly one place, [`Server::settle`], which is also
//! the only code besides accept and shutdown that changes the connection table.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use mio::event::Event;
use mio::{Events, Interest, Poll, Token, Waker};
use tracing::{debug, error, info, warn};

use crate::config::{Config, Limits};
use crate::http::fault::HttpFault;
use crate::http::parser;
use crate::http::response::Response;
use crate::http::router::Router;
use crate::server::connection::{Connection, ReadOutcome, Subscriptions};
use crate::server::listener::Listener;
use crate::server::signal::{Signal, Upgraded};
use crate::server::table::{ConnectionSet, Node, Protocol};

const LISTENER: Token = Token(0);
const WAKER: Token = Token(1);
const FIRST_CONNECTION: usize = 2;
const EVENT_CAPACITY: usize = 1024;
/// Reads per connection per turn before yielding to other sockets.
const READS_PER_TURN: usize = 16;

type HeartbeatHook = Box<dyn FnMut(&mut ConnectionSet)>;
type DrainedHook = Box<dyn FnMut(&mut Connection) -> Result<(), Signal>>;
type FaultHook = Box<dyn FnMut(&HttpFault, &mut Connection) -> Option<Response>>;

#[derive(Default)]
struct Hooks {
    heartbeat: Option<HeartbeatHook>,
    drained: Option<DrainedHook>,
    fault: Option<FaultHook>,
}

/// Asks a running [`Server`] to leave its loop. Usable from any thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) -> io::Result<()> {
        self.stop.store(true, Ordering::Release);
        self.waker.wake()
    }
}

pub struct Server {
    poll: Poll,
    listener: Listener,
    connections: ConnectionSet,
    router: Router,
    hooks: Hooks,
    /// Subscriptions copied onto every accepted connection
    template: Subscriptions,
    config: Config,
    next_token: usize,
    /// Connections whose read budget ran out with input possibly left in the
    /// socket; readiness is edge-triggered, so they are read again next turn
    rearmed: Vec<Token>,
    /// The last accept failed for lack of descriptors or memory
    accept_stalled: bool,
    last_heartbeat: Instant,
    stop: Arc<AtomicBool>,
    waker: Arc<Waker>,
    shut_down: bool,
}

impl Server {
    /// Binds the listener and prepares the poller; nothing is served until
    /// [`Server::run`] is called.
    pub fn bind(config: Config, router: Router) -> anyhow::Result<Self> {
        config.validate()?;

        let poll = Poll::new().context("failed to create poller")?;
        let mut listener = Listener::bind(&config.server.listen_addr)?;
        listener
            .register(poll.registry(), LISTENER)
            .context("failed to register listener")?;
        let waker = Waker::new(poll.registry(), WAKER).context("failed to create waker")?;

        Ok(Self {
            poll,
            listener,
            connections: ConnectionSet::default(),
            router,
            hooks: Hooks::default(),
            template: Subscriptions::default(),
            config,
            next_token: FIRST_CONNECTION,
            rearmed: Vec::new(),
            accept_stalled: false,
            last_heartbeat: Instant::now(),
            stop: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(waker),
            shut_down: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn connections(&self) -> &ConnectionSet {
        &self.connections
    }

    pub fn router_mut(&mut self) -> &mut Router {
        &mut self.router
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stop: Arc::clone(&self.stop),
            waker: Arc::clone(&self.waker),
        }
    }

    /// Runs `hook` every `server.heartbeat_interval_ms`, before polling.
    pub fn on_heartbeat(&mut self, hook: impl FnMut(&mut ConnectionSet) + 'static) -> &mut Self {
        self.hooks.heartbeat = Some(Box::new(hook));
        self
    }

    /// Runs `hook` whenever a subscribed connection's output is fully flushed.
    /// New connections are subscribed by default once this is set.
    pub fn on_drained(
        &mut self,
        hook: impl FnMut(&mut Connection) -> Result<(), Signal> + 'static,
    ) -> &mut Self {
        self.hooks.drained = Some(Box::new(hook));
        self.template.drained = true;
        self
    }

    /// Lets `hook` replace the canned response of a fault on subscribed
    /// connections. Returning `None` keeps the canned response.
    pub fn on_fault(
        &mut self,
        hook: impl FnMut(&HttpFault, &mut Connection) -> Option<Response> + 'static,
    ) -> &mut Self {
        self.hooks.fault = Some(Box::new(hook));
        self.template.fault = true;
        self
    }

    /// Serves clients until a [`ShutdownHandle`] fires or a fatal error occurs.
    ///
    /// Either way every connection and the listener are torn down before
    /// returning.
    pub fn run(&mut self) -> anyhow::Result<()> {
        let mut events = Events::with_capacity(EVENT_CAPACITY);
        info!(
            addr = %self.local_addr(),
            max_connections = self.config.server.max_connections,
            heartbeat = ?self.config.server.heartbeat_interval(),
            "Reactor started"
        );

        let outcome = loop {
            if self.stop.load(Ordering::Acquire) {
                info!("Shutdown requested");
                break Ok(());
            }
            if let Err(e) = self.turn(&mut events) {
                error!(error = %e, "Reactor stopped");
                break Err(e);
            }
        };

        self.shutdown();
        outcome
    }

    fn turn(&mut self, events: &mut Events) -> anyhow::Result<()> {
        let mut timeout = self.beat();
        self.sync_interests();
        if !self.rearmed.is_empty() {
            timeout = Some(Duration::ZERO);
        }

        match self.poll.poll(events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e).context("poll failed"),
        }

        let rearmed = std::mem::take(&mut self.rearmed);
        for event in events.iter() {
            match event.token() {
                LISTENER => self.accept()?,
                WAKER => {}
                token => self.service(token, event),
            }
        }
        for token in rearmed {
            self.read_ready(token);
            self.reap(token);
        }

        // connections closed this turn may have freed descriptors
        if self.accept_stalled {
            self.accept()?;
        }
        Ok(())
    }

    /// Fires the heartbeat if due; returns how long the poll may block.
    fn beat(&mut self) -> Option<Duration> {
        let interval = self.config.server.heartbeat_interval()?;
        let hook = self.hooks.heartbeat.as_mut()?;

        if self.last_heartbeat.elapsed() >= interval {
            hook(&mut self.connections);
            self.last_heartbeat = Instant::now();

            for token in self.connections.finished() {
                self.remove(token);
            }
        }

        Some(interval.saturating_sub(self.last_heartbeat.elapsed()))
    }

    /// Registers write interest exactly for connections with queued output.
    fn sync_interests(&mut self) {
        let registry = self.poll.registry();
        let mut failed = Vec::new();

        for (&token, node) in self.connections.nodes_mut() {
            let wanted = node.wanted_interest();
            if wanted == node.interest {
                continue;
            }
            match registry.reregister(node.conn.source_mut(), token, wanted) {
                Ok(()) => node.interest = wanted,
                Err(e) => {
                    warn!(peer = node.conn.peer(), error = %e, "failed to update interest");
                    failed.push(token);
                }
            }
        }

        for token in failed {
            self.remove(token);
        }
    }

    fn accept(&mut self) -> anyhow::Result<()> {
        let was_stalled = std::mem::take(&mut self.accept_stalled);

        loop {
            let (stream, peer) = match self.listener.accept() {
                Ok(Some(pair)) => pair,
                Ok(None) => return Ok(()),
                Err(e) if is_transient_accept_error(&e) => {
                    debug!(error = %e, "accept failed, skipping");
                    continue;
                }
                Err(e) if is_resource_exhaustion(&e) => {
                    // pending clients wait in the backlog until a connection closes
                    if was_stalled {
                        debug!(error = %e, "still out of resources, accept paused");
                    } else {
                        warn!(
                            error = %e,
                            active = self.connections.len(),
                            "out of resources, pausing accept"
                        );
                    }
                    self.accept_stalled = true;
                    return Ok(());
                }
                Err(e) => return Err(e).context("listener failed to accept"),
            };

            let limit = self.config.server.max_connections;
            if self.connections.len() >= limit {
                warn!(peer = %peer, limit, "connection limit reached, dropping new connection");
                drop(stream);
                continue;
            }

            let token = Token(self.next_token);
            self.next_token += 1;

            let mut conn = Connection::new(
                Box::new(stream),
                token,
                peer.to_string(),
                self.template,
                &self.config.limits,
            );
            if let Err(e) = self
                .poll
                .registry()
                .register(conn.source_mut(), token, Interest::READABLE)
            {
                warn!(peer = %peer, error = %e, "failed to register connection");
                continue;
            }

            self.connections.insert(token, Node::http(conn));
            debug!(
                peer = %peer,
                token = token.0,
                active = self.connections.len(),
                "Accepted connection"
            );
        }
    }

    /// Handles one readiness event for a connection.
    fn service(&mut self, token: Token, event: &Event) {
        if event.is_error() {
            if let Some(conn) = self.connections.get_mut(token) {
                let signal = conn.abort(&io::Error::other("error reported by poller"));
                self.settle(token, signal);
            }
            return;
        }

        if event.is_readable() || event.is_read_closed() {
            self.read_ready(token);
        }

        if event.is_writable() || event.is_write_closed() {
            if let Err(signal) = self.on_writable(token) {
                self.settle(token, signal);
            }
        }

        self.reap(token);
    }

    fn read_ready(&mut self, token: Token) {
        let mut outcome = self.on_readable(token);
        while let Err(signal) = outcome {
            // a surviving connection may still hold buffered input
            if !self.settle(token, signal) {
                break;
            }
            outcome = self.on_readable(token);
        }
    }

    fn on_readable(&mut self, token: Token) -> Result<(), Signal> {
        let limits = self.config.limits;
        let Some(node) = self.connections.node_mut(token) else {
            return Ok(());
        };

        Self::process_input(node, &self.router, &limits)?;
        for _ in 0..READS_PER_TURN {
            match node.conn.drain_read()? {
                ReadOutcome::Data(_) => Self::process_input(node, &self.router, &limits)?,
                ReadOutcome::Discarded(_) => {}
                ReadOutcome::WouldBlock | ReadOutcome::Eof => return Ok(()),
            }
        }

        if !self.rearmed.contains(&token) {
            self.rearmed.push(token);
        }
        Ok(())
    }

    /// Consumes buffered input until no more progress is possible.
    fn process_input(node: &mut Node, router: &Router, limits: &Limits) -> Result<(), Signal> {
        let Node { conn, protocol, .. } = node;

        match protocol {
            Protocol::Upgraded(upgraded) => {
                if conn.is_open() && !conn.read_buffer().is_empty() {
                    upgraded.on_data(conn)?;
                }
            }
            Protocol::Http => {
                while conn.is_open() {
                    let Some(request) = parser::parse_request(conn.read_buffer_mut(), limits)?
                    else {
                        break;
                    };
                    debug!(
                        peer = conn.peer(),
                        method = %request.method,
                        path = %request.path,
                        version = %request.version,
                        "Request received"
                    );
                    conn.set_request(request);
                    router.dispatch(conn)?;
                }
            }
        }
        Ok(())
    }

    fn on_writable(&mut self, token: Token) -> Result<(), Signal> {
        let Some(node) = self.connections.node_mut(token) else {
            return Ok(());
        };
        if !node.conn.is_write_ready() || !node.conn.flush_write()? {
            return Ok(());
        }

        match &mut node.protocol {
            Protocol::Upgraded(upgraded) => upgraded.on_drained(&mut node.conn),
            Protocol::Http => match self.hooks.drained.as_mut() {
                Some(hook) if node.conn.subscriptions().drained => hook(&mut node.conn),
                _ => Ok(()),
            },
        }
    }

    /// Acts on a signal raised while servicing `token`.
    ///
    /// Returns whether the connection is still open for input afterwards.
    fn settle(&mut self, token: Token, signal: Signal) -> bool {
        let mut next = Some(signal);

        while let Some(signal) = next.take() {
            match signal {
                Signal::Teardown => {
                    self.remove(token);
                    return false;
                }
                Signal::Overflow { pending, limit } => {
                    if let Some(conn) = self.connections.get(token) {
                        warn!(
                            peer = conn.peer(),
                            pending,
                            limit,
                            "write buffer ceiling exceeded, dropping connection"
                        );
                    }
                    self.remove(token);
                    return false;
                }
                Signal::Fault(fault) => next = self.answer_fault(token, fault).err(),
                Signal::Upgrade(protocol) => self.upgrade(token, protocol),
            }
        }

        self.connections
            .get(token)
            .is_some_and(Connection::is_open)
    }

    fn answer_fault(&mut self, token: Token, fault: HttpFault) -> Result<(), Signal> {
        let Some(conn) = self.connections.get_mut(token) else {
            return Ok(());
        };
        debug!(
            peer = conn.peer(),
            status = fault.status().as_u16(),
            error = %fault.kind,
            disconnect = fault.must_disconnect,
            "Answering request fault"
        );

        let rewritten = match self.hooks.fault.as_mut() {
            Some(hook) if conn.subscriptions().fault => hook(&fault, conn),
            _ => None,
        };
        let response = rewritten.unwrap_or(fault.response);

        conn.send(&response)?;
        if fault.must_disconnect {
            conn.teardown(false)?;
        }
        Ok(())
    }

    /// Moves the connection under `token` to a new protocol. The connection
    /// itself is carried over untouched.
    fn upgrade(&mut self, token: Token, protocol: Box<dyn Upgraded>) {
        let Some(node) = self.connections.remove(token) else {
            return;
        };
        debug!(peer = node.conn.peer(), protocol = protocol.name(), "Connection upgraded");

        self.connections.insert(
            token,
            Node {
                conn: node.conn,
                protocol: Protocol::Upgraded(protocol),
                interest: node.interest,
            },
        );
    }

    /// Removes a connection that closed or finished draining.
    fn reap(&mut self, token: Token) {
        if self
            .connections
            .get(token)
            .is_some_and(Connection::is_finished)
        {
            self.remove(token);
        }
    }

    fn remove(&mut self, token: Token) {
        let Some(mut node) = self.connections.remove(token) else {
            return;
        };
        if let Err(e) = self.poll.registry().deregister(node.conn.source_mut()) {
            debug!(peer = node.conn.peer(), error = %e, "deregister failed");
        }
        // the signal is already being handled
        let _ = node.conn.teardown(true);

        debug!(
            peer = node.conn.peer(),
            active = self.connections.len(),
            "Connection closed"
        );
    }

    fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;

        let active = self.connections.len();
        for token in self.connections.tokens() {
            self.remove(token);
        }
        if let Err(e) = self.listener.deregister(self.poll.registry()) {
            debug!(error = %e, "listener deregister failed");
        }
        info!(closed = active, "Server shut down");
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Accept failed because the process or system ran out of descriptors or
/// memory. The listener itself is fine.
fn is_resource_exhaustion(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::OutOfMemory || is_out_of_descriptors(e)
}

#[cfg(unix)]
fn is_out_of_descriptors(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_out_of_descriptors(_: &io::Error) -> bool {
    false
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}
