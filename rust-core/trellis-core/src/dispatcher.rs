//! # Dispatcher
//!
//! Runs one request through the global middleware, the route matcher, the
//! route's middleware and its target. Validation failures become a
//! [`Outcome::ValidationFailure`] in [`ValidationMode::Respond`] and are
//! returned as `Err(Error::Validation)` in [`ValidationMode::Raise`]. Every
//! other failure is returned as `Err`.

use crate::config::ValidationMode;
use crate::container::Container;
use crate::error::{Error, Result};
use crate::handler::DispatchContext;
use crate::middleware::{Middleware, MiddlewareChain, MiddlewareResult};
use crate::reply::Outcome;
use crate::request::Request;
use crate::router::Router;
use crate::validation::Validator;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Request dispatcher
#[derive(Debug, Clone)]
pub struct Dispatcher {
    router: Arc<Router>,
    container: Arc<Container>,
    validator: Validator,
    middleware: MiddlewareChain,
    mode: ValidationMode,
}

impl Dispatcher {
    /// Dispatcher over a finished route table
    #[must_use]
    pub fn new(router: Router, container: Arc<Container>) -> Self {
        Self {
            router: Arc::new(router),
            container,
            validator: Validator::new(),
            middleware: MiddlewareChain::new(),
            mode: ValidationMode::default(),
        }
    }

    /// Validator used for request kinds
    #[must_use]
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.validator = validator;
        self
    }

    /// Append a global middleware
    #[must_use]
    pub fn with_middleware<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middleware.add(middleware);
        self
    }

    /// How validation failures are reported
    #[must_use]
    pub const fn validation_mode(mut self, mode: ValidationMode) -> Self {
        self.mode = mode;
        self
    }

    /// The route table
    #[must_use]
    pub fn router(&self) -> &Router {
        &self.router
    }

    /// The service container
    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Dispatch `method path` with a raw parameter map
    ///
    /// # Errors
    ///
    /// See [`handle`](Self::handle).
    pub async fn dispatch(
        &self,
        method: &str,
        path: &str,
        params: Map<String, Value>,
    ) -> Result<Outcome> {
        self.handle(Request::new(method, path).with_params(params)).await
    }

    /// Dispatch a request
    ///
    /// # Errors
    ///
    /// Resolution, parameter and handler faults; `Error::Validation` only
    /// in [`ValidationMode::Raise`].
    pub async fn handle(&self, request: Request) -> Result<Outcome> {
        if let MiddlewareResult::Respond(mut outcome) = self.middleware.run_before(&request) {
            self.middleware.run_after(&request, &mut outcome);
            return Ok(outcome);
        }

        let Some((route, captures)) = self.router.resolve(request.method(), request.path()) else {
            debug!(method = %request.method(), path = %request.path(), "No route matched");
            let mut outcome = Outcome::NotFound;
            self.middleware.run_after(&request, &mut outcome);
            return Ok(outcome);
        };

        let mut outcome = match route.middleware().run_before(&request) {
            MiddlewareResult::Respond(outcome) => outcome,
            MiddlewareResult::Continue => {
                debug!(
                    route = %route.pattern(),
                    target = %route.action().label(),
                    captures = captures.len(),
                    "Dispatching"
                );
                let cx = DispatchContext::new(
                    request.clone(),
                    self.container.clone(),
                    self.validator.clone(),
                    route.pattern(),
                    captures,
                );
                self.settle(route.action().invoke(cx).await)?
            }
        };

        route.middleware().run_after(&request, &mut outcome);
        self.middleware.run_after(&request, &mut outcome);
        Ok(outcome)
    }

    fn settle(&self, result: Result<Outcome>) -> Result<Outcome> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(Error::Validation(errors)) if self.mode == ValidationMode::Respond => {
                warn!(fields = ?errors.fields().collect::<Vec<_>>(), "Validation failed");
                Ok(Outcome::ValidationFailure(errors))
            }
            Err(err) => {
                if !err.is_validation() {
                    error!(error = %err, "Dispatch failed");
                }
                Err(err)
            }
        }
    }
}
