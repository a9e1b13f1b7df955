use std::io;
use std::net::{SocketAddr, ToSocketAddrs};

use anyhow::Context;
use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use tracing::info;

/// The bound, non-blocking listening socket.
///
/// It never carries payload; its only event is "a connection is waiting".
pub struct Listener {
    socket: TcpListener,
    addr: SocketAddr,
}

impl Listener {
    pub fn bind(listen_addr: &str) -> anyhow::Result<Self> {
        let addr = listen_addr
            .to_socket_addrs()
            .with_context(|| format!("invalid listen address {listen_addr}"))?
            .next()
            .with_context(|| format!("listen address {listen_addr} resolved to nothing"))?;

        let socket =
            TcpListener::bind(addr).with_context(|| format!("failed to bind {addr}"))?;
        let addr = socket.local_addr()?;
        info!("Listening on {}", addr);

        Ok(Self { socket, addr })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn register(&mut self, registry: &Registry, token: Token) -> io::Result<()> {
        registry.register(&mut self.socket, token, Interest::READABLE)
    }

    pub fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        registry.deregister(&mut self.socket)
    }

    /// Accepts one pending connection, or `None` once the backlog is empty.
    pub fn accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        loop {
            match self.socket.accept() {
                Ok(pair) => return Ok(Some(pair)),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }
}
