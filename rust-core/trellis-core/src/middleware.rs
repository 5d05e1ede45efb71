//! # Middleware System
//!
//! Ordered request interception. The dispatcher runs the global chain, then
//! the matched route's chain; any middleware may short-circuit with its own
//! outcome. After dispatch, `after_response` runs in reverse order.

use crate::reply::{Outcome, Reply};
use crate::request::Request;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// Middleware trait for request/response interception
///
/// Middlewares are called in order before the handler, and in reverse order after.
pub trait Middleware: Send + Sync {
    /// Called before the request handler
    ///
    /// Return `Respond` to skip the rest of the chain and the handler.
    fn before_request(&self, _req: &Request) -> MiddlewareResult {
        MiddlewareResult::Continue
    }

    /// Called after the outcome is known
    fn after_response(&self, _req: &Request, _outcome: &mut Outcome) {}

    /// Middleware name for logging
    fn name(&self) -> &'static str {
        "Unknown"
    }
}

/// Result of middleware execution
#[derive(Debug)]
pub enum MiddlewareResult {
    /// Continue to next middleware/handler
    Continue,
    /// Short-circuit with this outcome (skip handler)
    Respond(Outcome),
}

/// Middleware chain for processing requests
#[derive(Default, Clone)]
pub struct MiddlewareChain {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl fmt::Debug for MiddlewareChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.middlewares.iter().map(|mw| mw.name()))
            .finish()
    }
}

impl MiddlewareChain {
    /// Create a new empty middleware chain
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a middleware to the chain
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) {
        self.middlewares.push(Arc::new(middleware));
    }

    /// Add a shared middleware to the chain
    pub fn add_shared(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    /// Builder form of [`add`](Self::add)
    #[must_use]
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.add(middleware);
        self
    }

    /// New chain running `outer` first, then this chain
    #[must_use]
    pub fn prepended(&self, outer: &Self) -> Self {
        Self {
            middlewares: outer
                .middlewares
                .iter()
                .chain(&self.middlewares)
                .cloned()
                .collect(),
        }
    }

    /// Execute `before_request` in order, stopping at the first `Respond`
    pub fn run_before(&self, req: &Request) -> MiddlewareResult {
        for mw in &self.middlewares {
            if let MiddlewareResult::Respond(outcome) = mw.before_request(req) {
                warn!(
                    middleware = mw.name(),
                    method = %req.method(),
                    path = %req.path(),
                    status = outcome.status(),
                    "Request short-circuited"
                );
                return MiddlewareResult::Respond(outcome);
            }
        }
        MiddlewareResult::Continue
    }

    /// Execute `after_response` for all middlewares (in reverse order)
    pub fn run_after(&self, req: &Request, outcome: &mut Outcome) {
        for mw in self.middlewares.iter().rev() {
            mw.after_response(req, outcome);
        }
    }

    /// Get the number of middlewares
    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Check if chain is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Names in execution order
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.middlewares.iter().map(|mw| mw.name())
    }
}

/// Logs every request and the status it produced
#[derive(Debug, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    /// Create a new logging middleware
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for LoggingMiddleware {
    fn before_request(&self, req: &Request) -> MiddlewareResult {
        info!(
            method = %req.method(),
            path = %req.path(),
            request_id = %req.header("x-request-id").unwrap_or("-"),
            "Request received"
        );
        MiddlewareResult::Continue
    }

    fn after_response(&self, req: &Request, outcome: &mut Outcome) {
        info!(
            method = %req.method(),
            path = %req.path(),
            status = outcome.status(),
            request_id = %req.header("x-request-id").unwrap_or("-"),
            "Response sent"
        );
    }

    fn name(&self) -> &'static str {
        "LoggingMiddleware"
    }
}

type TokenCheck = Arc<dyn Fn(&str, &Request) -> bool + Send + Sync>;

/// Interception point for authentication
///
/// Rejects requests without an `Authorization: Bearer` token with 401.
/// Token verification is delegated to the configured check, which accepts
/// every token unless replaced.
#[derive(Clone)]
pub struct AuthMiddleware {
    check: TokenCheck,
}

impl Default for AuthMiddleware {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AuthMiddleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthMiddleware").finish_non_exhaustive()
    }
}

impl AuthMiddleware {
    /// Accept any bearer token
    #[must_use]
    pub fn new() -> Self {
        Self {
            check: Arc::new(|_, _| true),
        }
    }

    /// Verify tokens with `check`
    #[must_use]
    pub fn with_check<F>(check: F) -> Self
    where
        F: Fn(&str, &Request) -> bool + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
        }
    }

    fn unauthorized(reason: &str) -> MiddlewareResult {
        MiddlewareResult::Respond(Outcome::Reply(
            Reply::json(json!({ "msg": reason })).with_status(401),
        ))
    }
}

impl Middleware for AuthMiddleware {
    fn before_request(&self, req: &Request) -> MiddlewareResult {
        match req.bearer_token() {
            None => Self::unauthorized("Missing or invalid Authorization header"),
            Some(token) if !(self.check)(token, req) => Self::unauthorized("Unauthorized"),
            Some(_) => MiddlewareResult::Continue,
        }
    }

    fn name(&self) -> &'static str {
        "AuthMiddleware"
    }
}
