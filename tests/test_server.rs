mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use common::{closed_silently, eventually, read_response, read_to_close, send, start};
use spindle::http::fault::HttpFault;
use spindle::{Config, Connection, Request, Response, Server, Signal, StatusCode, Upgraded};

fn hello(conn: &mut Connection, req: &Request) -> Result<(), Signal> {
    let response = Response::builder(StatusCode::Ok)
        .reply_to(req)
        .body("hello")
        .build();
    conn.send(&response)
}

fn with_hello(server: &mut Server) {
    server.router_mut().add_handler(&["/hello"], hello);
}

struct Echo;

impl Upgraded for Echo {
    fn on_data(&mut self, conn: &mut Connection) -> Result<(), Signal> {
        let data = conn.read_buffer_mut().split();
        conn.push(&data)
    }
}

#[test]
fn test_request_split_across_reads() {
    let hosts = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&hosts);

    let server = start(Config::default(), move |server| {
        server.router_mut().add_handler(
            &["/hello"],
            move |conn: &mut Connection, req: &Request| {
                seen.lock()
                    .unwrap()
                    .push(req.header("host").unwrap_or_default().to_string());
                hello(conn, req)
            },
        );
    });

    let mut client = server.connect();
    send(&mut client, b"GET /hello HTTP/1.1\r\nHo");
    thread::sleep(Duration::from_millis(50));
    send(&mut client, b"st: x\r\n\r\n");

    let response = read_response(&mut client);
    assert_eq!(response.status_line(), "HTTP/1.1 200 OK");
    assert_eq!(response.body, b"hello");
    assert_eq!(*hosts.lock().unwrap(), vec!["x".to_string()]);
}

#[test]
fn test_keep_alive_serves_several_requests() {
    let server = start(Config::default(), with_hello);
    let mut client = server.connect();

    for _ in 0..3 {
        send(&mut client, b"GET /hello HTTP/1.1\r\nHost: x\r\n\r\n");
        let response = read_response(&mut client);
        assert_eq!(response.status_line(), "HTTP/1.1 200 OK");
        assert_eq!(response.header("Connection"), None);
    }
}

#[test]
fn test_back_to_back_requests_answered_in_order() {
    let server = start(Config::default(), with_hello);
    let mut client = server.connect();

    send(
        &mut client,
        b"GET /hello HTTP/1.1\r\n\r\nGET /hello HTTP/1.1\r\nConnection: close\r\n\r\n",
    );
    let raw = String::from_utf8(read_to_close(&mut client)).unwrap();

    assert_eq!(raw.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(raw.contains("Connection: close"));
}

#[test]
fn test_http10_closes_after_response() {
    let server = start(Config::default(), with_hello);
    let mut client = server.connect();

    send(&mut client, b"GET /hello HTTP/1.0\r\n\r\n");
    let raw = String::from_utf8(read_to_close(&mut client)).unwrap();

    assert!(raw.starts_with("HTTP/1.0 200 OK\r\n"));
    assert!(raw.contains("Connection: close\r\n"));
    assert!(raw.ends_with("hello"));
}

#[test]
fn test_unknown_path_gets_404_and_connection_survives() {
    let server = start(Config::default(), with_hello);
    let mut client = server.connect();

    send(&mut client, b"GET /nope HTTP/1.1\r\n\r\n");
    let response = read_response(&mut client);
    assert_eq!(response.status_line(), "HTTP/1.1 404 Not Found");
    assert_eq!(response.header("X-Unrouted-Path"), Some("/nope"));

    send(&mut client, b"GET /hello HTTP/1.1\r\n\r\n");
    let response = read_response(&mut client);
    assert_eq!(response.status_line(), "HTTP/1.1 200 OK");
}

#[test]
fn test_oversized_header_block() {
    let server = start(Config::default(), with_hello);
    let mut client = server.connect();

    let mut request = b"GET /hello HTTP/1.1\r\nX-Filler: ".to_vec();
    request.extend(std::iter::repeat_n(b'a', 8300));
    request.extend_from_slice(b"\r\n\r\n");
    send(&mut client, &request);

    let response = read_response(&mut client);
    assert_eq!(
        response.status_line(),
        "HTTP/1.1 431 Request Header Fields Too Large"
    );
    assert!(closed_silently(&mut client));
}

#[test]
fn test_oversized_header_answered_in_http10() {
    let server = start(Config::default(), with_hello);
    let mut client = server.connect();

    let mut request = b"GET /hello HTTP/1.0\r\nX-Filler: ".to_vec();
    request.extend(std::iter::repeat_n(b'a', 8300));
    request.extend_from_slice(b"\r\n\r\n");
    send(&mut client, &request);

    let response = read_response(&mut client);
    assert_eq!(
        response.status_line(),
        "HTTP/1.0 431 Request Header Fields Too Large"
    );
}

#[test]
fn test_malformed_request_line() {
    let server = start(Config::default(), with_hello);
    let mut client = server.connect();

    send(&mut client, b"GARBAGE\r\n\r\n");
    let response = read_response(&mut client);
    assert_eq!(response.status_line(), "HTTP/1.1 400 Bad Request");
    assert_eq!(response.header("Connection"), Some("close"));
    assert!(closed_silently(&mut client));
}

#[test]
fn test_unsupported_version() {
    let server = start(Config::default(), with_hello);
    let mut client = server.connect();

    send(&mut client, b"GET /hello HTTP/2.0\r\n\r\n");
    let response = read_response(&mut client);
    assert_eq!(
        response.status_line(),
        "HTTP/1.1 505 HTTP Version Not Supported"
    );
    assert!(closed_silently(&mut client));
}

#[test]
fn test_connection_limit_drops_extra_clients() {
    let mut config = Config::default();
    config.server.max_connections = 1;
    let server = start(config, with_hello);

    let mut first = server.connect();
    send(&mut first, b"GET /hello HTTP/1.1\r\n\r\n");
    assert_eq!(read_response(&mut first).status_line(), "HTTP/1.1 200 OK");

    let mut second = server.connect();
    assert!(closed_silently(&mut second));

    // the first connection is unaffected
    send(&mut first, b"GET /hello HTTP/1.1\r\n\r\n");
    assert_eq!(read_response(&mut first).status_line(), "HTTP/1.1 200 OK");
}

#[test]
fn test_upgrade_keeps_buffered_bytes() {
    let server = start(Config::default(), |server| {
        server.router_mut().add_handler(
            &["/echo"],
            |conn: &mut Connection, req: &Request| {
                let response = Response::builder(StatusCode::SwitchingProtocols)
                    .version(req.version)
                    .header("Upgrade", "echo")
                    .header("Connection", "Upgrade")
                    .build();
                conn.send(&response)?;
                Err(Signal::upgrade(Echo))
            },
        );
    });
    let mut client = server.connect();

    send(&mut client, b"GET /echo HTTP/1.1\r\nUpgrade: echo\r\n\r\nping");
    let response = read_response(&mut client);
    assert_eq!(response.status_line(), "HTTP/1.1 101 Switching Protocols");

    let mut echoed = response.rest;
    while echoed.len() < 4 {
        let mut chunk = [0u8; 16];
        let n = std::io::Read::read(&mut client, &mut chunk).unwrap();
        assert!(n > 0, "closed before echo");
        echoed.extend_from_slice(&chunk[..n]);
    }
    assert_eq!(echoed, b"ping");

    send(&mut client, b"pong");
    let mut chunk = [0u8; 4];
    std::io::Read::read_exact(&mut client, &mut chunk).unwrap();
    assert_eq!(&chunk, b"pong");
}

#[test]
fn test_handler_teardown_closes_without_response() {
    let server = start(Config::default(), |server| {
        server.router_mut().add_handler(
            &["/drop"],
            |_conn: &mut Connection, _req: &Request| Err(Signal::Teardown),
        );
    });
    let mut client = server.connect();

    send(&mut client, b"GET /drop HTTP/1.1\r\n\r\n");
    assert!(closed_silently(&mut client));
}

#[test]
fn test_fault_hook_rewrites_response() {
    let server = start(Config::default(), |server| {
        with_hello(server);
        server.on_fault(|fault: &HttpFault, _conn: &mut Connection| {
            Some(Response::builder(fault.status()).body("custom").build())
        });
    });
    let mut client = server.connect();

    send(&mut client, b"GET /missing HTTP/1.1\r\n\r\n");
    let response = read_response(&mut client);
    assert_eq!(response.status_line(), "HTTP/1.1 404 Not Found");
    assert_eq!(response.body, b"custom");
}

#[test]
fn test_drained_hook_fires_after_flush() {
    let drained = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&drained);

    let server = start(Config::default(), move |server| {
        with_hello(server);
        server.on_drained(move |_conn: &mut Connection| {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    });
    let mut client = server.connect();

    send(&mut client, b"GET /hello HTTP/1.1\r\n\r\n");
    read_response(&mut client);

    assert!(eventually(|| drained.load(Ordering::SeqCst) >= 1));
}

#[test]
fn test_heartbeat_closes_idle_connections() {
    let beats = Arc::new(AtomicUsize::new(0));
    let count = Arc::clone(&beats);

    let mut config = Config::default();
    config.server.heartbeat_interval_ms = Some(20);

    let server = start(config, move |server| {
        with_hello(server);
        server.on_heartbeat(move |connections| {
            count.fetch_add(1, Ordering::SeqCst);
            for conn in connections.iter_mut() {
                if conn.idle_for() >= Duration::from_millis(100) {
                    let _ = conn.teardown(false);
                }
            }
        });
    });
    let mut client = server.connect();

    assert!(closed_silently(&mut client));
    assert!(beats.load(Ordering::SeqCst) >= 2);
}

#[test]
fn test_shutdown_closes_clients() {
    let server = start(Config::default(), with_hello);
    let mut client = server.connect();

    send(&mut client, b"GET /hello HTTP/1.1\r\n\r\n");
    assert_eq!(read_response(&mut client).status_line(), "HTTP/1.1 200 OK");

    server.stop();
    assert!(closed_silently(&mut client));
}

#[test]
fn test_write_ceiling_drops_only_the_offending_connection() {
    let mut config = Config::default();
    config.limits.max_write_buffer_bytes = Some(64);

    let server = start(config, |server| {
        with_hello(server);
        server.router_mut().add_handler(
            &["/big"],
            |conn: &mut Connection, _req: &Request| conn.push(&[b'x'; 128]),
        );
    });

    let mut greedy = server.connect();
    let mut other = server.connect();

    send(&mut greedy, b"GET /big HTTP/1.1\r\n\r\n");
    assert!(closed_silently(&mut greedy));

    send(&mut other, b"GET /hello HTTP/1.1\r\n\r\n");
    let response = read_response(&mut other);
    assert_eq!(response.status_line(), "HTTP/1.1 200 OK");
    assert_eq!(response.body, b"hello");
}

#[test]
fn test_long_request_burst_is_fully_served() {
    let mut config = Config::default();
    // small reads so the burst outlasts one turn's read budget
    config.limits.read_chunk_bytes = 64;
    let server = start(config, with_hello);

    let mut burst = Vec::new();
    for _ in 0..399 {
        burst.extend_from_slice(b"GET /hello HTTP/1.1\r\n\r\n");
    }
    burst.extend_from_slice(b"GET /hello HTTP/1.1\r\nConnection: close\r\n\r\n");

    let mut client = server.connect();
    let mut bystander = server.connect();
    send(&mut client, &burst);

    send(&mut bystander, b"GET /hello HTTP/1.1\r\n\r\n");
    assert_eq!(read_response(&mut bystander).status_line(), "HTTP/1.1 200 OK");

    let raw = String::from_utf8(read_to_close(&mut client)).unwrap();
    assert_eq!(raw.matches("HTTP/1.1 200 OK").count(), 400);
}
