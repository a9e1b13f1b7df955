use std::time::Duration;

use spindle::http::request::Request;
use spindle::{Config, Connection, Response, Router, Server, Signal, StatusCode, Upgraded};

/// Connections idle for longer than this are closed by the heartbeat.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Heartbeat used when the config leaves it unset, so idle connections are
/// still swept.
const DEFAULT_HEARTBEAT_MS: u64 = 1000;

fn hello(conn: &mut Connection, req: &Request) -> Result<(), Signal> {
    let response = Response::builder(StatusCode::Ok)
        .reply_to(req)
        .header("Content-Type", "text/plain")
        .body("Hello from Spindle\n")
        .build();
    conn.send(&response)
}

fn health(conn: &mut Connection, req: &Request) -> Result<(), Signal> {
    let response = Response::builder(StatusCode::NoContent).reply_to(req).build();
    conn.send(&response)
}

/// Switches the connection to a raw byte echo.
fn echo(conn: &mut Connection, req: &Request) -> Result<(), Signal> {
    let response = Response::builder(StatusCode::SwitchingProtocols)
        .version(req.version)
        .header("Upgrade", "echo")
        .header("Connection", "Upgrade")
        .build();
    conn.send(&response)?;
    Err(Signal::upgrade(Echo))
}

struct Echo;

impl Upgraded for Echo {
    fn on_data(&mut self, conn: &mut Connection) -> Result<(), Signal> {
        let data = conn.read_buffer_mut().split();
        conn.push(&data)
    }

    fn name(&self) -> &str {
        "echo"
    }
}

fn enable_idle_sweep(cfg: &mut Config) {
    if cfg.server.heartbeat_interval_ms.is_none() {
        cfg.server.heartbeat_interval_ms = Some(DEFAULT_HEARTBEAT_MS);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let mut cfg = Config::load()?;
    enable_idle_sweep(&mut cfg);

    let mut router = Router::new();
    router.add_handler(&["/", "/hello"], hello);
    router.add_handler(&["/health"], health);
    router.add_handler(&["/echo"], echo);

    let mut server = Server::bind(cfg, router)?;
    server.on_heartbeat(|connections| {
        for conn in connections.iter_mut() {
            if conn.is_open() && conn.idle_for() >= IDLE_TIMEOUT {
                tracing::debug!(peer = conn.peer(), "closing idle connection");
                // closed connections are reaped right after the heartbeat
                let _ = conn.teardown(false);
            }
        }
    });

    server.run()
}
