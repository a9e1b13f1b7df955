//! Shared helpers for tests that run a real server on a background thread.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use spindle::{Config, Router, Server, ShutdownHandle};

pub struct TestServer {
    pub addr: SocketAddr,
    handle: ShutdownHandle,
    thread: Option<JoinHandle<()>>,
}

/// Starts a server on an ephemeral port. `setup` runs on the server thread
/// before the loop starts, so it can register routes and hooks.
pub fn start<F>(mut config: Config, setup: F) -> TestServer
where
    F: FnOnce(&mut Server) + Send + 'static,
{
    config.server.listen_addr = "127.0.0.1:0".to_string();
    let (tx, rx) = mpsc::channel();

    let thread = thread::spawn(move || {
        let mut server = Server::bind(config, Router::new()).expect("bind test server");
        setup(&mut server);
        tx.send((server.local_addr(), server.shutdown_handle()))
            .expect("report address");
        server.run().expect("reactor failed");
    });

    let (addr, handle) = rx.recv().expect("server thread died during startup");
    TestServer {
        addr,
        handle,
        thread: Some(thread),
    }
}

impl TestServer {
    pub fn connect(&self) -> TcpStream {
        let stream = TcpStream::connect(self.addr).expect("connect");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set read timeout");
        stream
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.handle.shutdown().expect("wake server");
            thread.join().expect("server thread panicked");
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// A response as seen by the client.
#[derive(Debug)]
pub struct ClientResponse {
    pub head: String,
    pub body: Vec<u8>,
    /// Bytes read past the end of the response
    pub rest: Vec<u8>,
}

impl ClientResponse {
    pub fn status_line(&self) -> &str {
        self.head.lines().next().unwrap_or_default()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.head.lines().skip(1).find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim())
        })
    }
}

/// Reads one response: the head, then `Content-Length` body bytes.
pub fn read_response(stream: &mut TcpStream) -> ClientResponse {
    let mut buf = Vec::new();
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = read_some(stream, &mut buf);
        assert!(n > 0, "connection closed before response head: {buf:?}");
    };

    let head = String::from_utf8(buf[..head_end].to_vec()).expect("utf-8 head");
    let mut response = ClientResponse {
        head,
        body: Vec::new(),
        rest: Vec::new(),
    };
    let length: usize = response
        .header("Content-Length")
        .map(|v| v.parse().expect("numeric content-length"))
        .unwrap_or(0);

    while buf.len() < head_end + length {
        let n = read_some(stream, &mut buf);
        assert!(n > 0, "connection closed before response body");
    }
    response.body = buf[head_end..head_end + length].to_vec();
    response.rest = buf[head_end + length..].to_vec();
    response
}

/// Reads until the server closes the connection.
pub fn read_to_close(stream: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).expect("read until close");
    buf
}

/// True if the server closed the connection (EOF or reset) without sending
/// anything.
pub fn closed_silently(stream: &mut TcpStream) -> bool {
    let mut byte = [0u8; 1];
    match stream.read(&mut byte) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => matches!(
            e.kind(),
            std::io::ErrorKind::ConnectionReset | std::io::ErrorKind::ConnectionAborted
        ),
    }
}

pub fn send(stream: &mut TcpStream, bytes: &[u8]) {
    stream.write_all(bytes).expect("send");
}

/// Polls `check` until it holds or the deadline passes.
pub fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    check()
}

fn read_some(stream: &mut TcpStream, buf: &mut Vec<u8>) -> usize {
    let mut chunk = [0u8; 4096];
    let n = stream.read(&mut chunk).expect("read");
    buf.extend_from_slice(&chunk[..n]);
    n
}
