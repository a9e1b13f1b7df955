//! HTTP protocol layer.
//!
//! # Architecture
//!
//! - **`headers`**: Ordered, case-insensitive header multimap
//! - **`request`**: Request head representation and close determination
//! - **`parser`**: Incremental parsing of request heads out of a read buffer
//! - **`fault`**: Protocol faults with their canned error responses
//! - **`response`**: HTTP response representation with builder pattern
//! - **`writer`**: Serializes responses into wire bytes
//! - **`router`**: Maps request paths to handlers
//!
//! # Request flow on one connection
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← bytes accumulate in the read buffer
//!        └──────┬──────┘
//!               │ CRLF CRLF found
//!               ▼
//!        ┌──────────────────┐
//!        │   Dispatching    │ ← router hands the request to a handler
//!        └──────┬───────────┘
//!               │ handler queued a response
//!               ▼
//!        ┌──────────────────┐
//!        │    Flushing      │ ← reactor writes on write readiness
//!        └──────┬───────────┘
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Draining → Closed
//! ```
//!
//! # Example
//!
//! ```no_run
//! use spindle::{Config, Connection, Request, Response, Router, Server, Signal};
//!
//! fn hello(conn: &mut Connection, req: &Request) -> Result<(), Signal> {
//!     let response = Response::builder(spindle::StatusCode::Ok)
//!         .reply_to(req)
//!         .body("hello\n")
//!         .build();
//!     conn.send(&response)
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut router = Router::new();
//!     router.add_handler(&["/hello"], hello);
//!
//!     let mut server = Server::bind(Config::default(), router)?;
//!     server.run()
//! }
//! ```

pub mod fault;
pub mod headers;
pub mod parser;
pub mod request;
pub mod response;
pub mod router;
pub mod writer;
