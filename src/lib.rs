//! Spindle - single-threaded HTTP server core
//!
//! One thread serves every client: a `mio` poller reports socket readiness
//! and the reactor moves bytes between sockets, the request parser and the
//! router. There is no thread or task per connection.

pub mod config;
pub mod http;
pub mod server;

pub use config::Config;
pub use http::request::Request;
pub use http::response::{Response, ResponseBuilder, StatusCode};
pub use http::router::{Handler, HandlerId, Router, WILDCARD};
pub use server::connection::Connection;
pub use server::reactor::{Server, ShutdownHandle};
pub use server::signal::{Signal, Upgraded};
