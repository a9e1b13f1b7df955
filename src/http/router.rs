//! Path router.
//!
//! Routes map an exact request path to a handler. One handler may be
//! registered under the wildcard path [`WILDCARD`], which receives every
//! request no exact route claims. Registering a path that is already taken
//! replaces the earlier handler for that path only.

use std::collections::HashMap;
use std::rc::Rc;

use tracing::{debug, warn};

use crate::http::fault::HttpFault;
use crate::http::request::Request;
use crate::server::connection::Connection;
use crate::server::signal::Signal;

/// Path that matches any request without an exact route.
pub const WILDCARD: &str = "*";

/// Serves a request by queueing output on the connection, or by returning a
/// signal (teardown, upgrade, fault) for the reactor to act on.
pub trait Handler {
    fn handle(&self, conn: &mut Connection, request: &Request) -> Result<(), Signal>;
}

impl<F> Handler for F
where
    F: Fn(&mut Connection, &Request) -> Result<(), Signal>,
{
    fn handle(&self, conn: &mut Connection, request: &Request) -> Result<(), Signal> {
        self(conn, request)
    }
}

/// Handle returned on registration; used to remove the handler again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
struct Route {
    id: HandlerId,
    handler: Rc<dyn Handler>,
}

#[derive(Default)]
pub struct Router {
    routes: HashMap<String, Route>,
    wildcard: Option<Route>,
    next_id: u64,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under every path in `paths`.
    pub fn add_handler<H>(&mut self, paths: &[&str], handler: H) -> HandlerId
    where
        H: Handler + 'static,
    {
        let id = HandlerId(self.next_id);
        self.next_id += 1;

        let route = Route {
            id,
            handler: Rc::new(handler),
        };

        for &path in paths {
            let previous = if path == WILDCARD {
                self.wildcard.replace(route.clone())
            } else {
                self.routes.insert(path.to_string(), route.clone())
            };

            match previous {
                Some(old) => warn!(
                    path,
                    previous = old.id.0,
                    handler = id.0,
                    "route already registered, replacing"
                ),
                None => debug!(path, handler = id.0, "route registered"),
            }
        }

        id
    }

    /// Removes every route currently pointing at `id`; returns how many.
    pub fn remove_handler(&mut self, id: HandlerId) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, route| route.id != id);
        let mut removed = before - self.routes.len();

        if self.wildcard.as_ref().is_some_and(|route| route.id == id) {
            self.wildcard = None;
            removed += 1;
        }
        removed
    }

    /// Whether a request for `path` would reach a handler.
    pub fn handles(&self, path: &str) -> bool {
        self.routes.contains_key(path) || self.wildcard.is_some()
    }

    pub fn len(&self) -> usize {
        self.routes.len() + usize::from(self.wildcard.is_some())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Serves the connection's pending request.
    ///
    /// The request is detached from the connection before the handler runs.
    /// Without a matching route this returns a 404 fault whose close mode
    /// follows the request.
    pub fn dispatch(&self, conn: &mut Connection) -> Result<(), Signal> {
        let Some(request) = conn.take_request() else {
            return Ok(());
        };
        self.route(conn, &request)
    }

    /// Runs the handler for `request` on `conn`.
    pub fn route(&self, conn: &mut Connection, request: &Request) -> Result<(), Signal> {
        let route = self
            .routes
            .get(&request.path)
            .or(self.wildcard.as_ref())
            .ok_or_else(|| HttpFault::no_route(request))?;

        debug!(
            peer = conn.peer(),
            method = %request.method,
            path = %request.path,
            handler = route.id.0,
            "dispatching request"
        );

        let handler = Rc::clone(&route.handler);
        handler.handle(conn, request)
    }
}
