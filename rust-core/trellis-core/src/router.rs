//! # Router
//!
//! Ordered route table with a linear first-match scan. Registration order is
//! match priority, so more specific patterns must be declared first.
//!
//! Groups push a prefix and middleware onto a stack while their routes are
//! declared; the stack is restored when the group closure returns.

use crate::error::{Error, Result};
use crate::handler::Action;
use crate::middleware::MiddlewareChain;
use crate::route::Route;
use tracing::info;

#[derive(Debug, Clone)]
struct Group {
    prefix: String,
    middleware: MiddlewareChain,
}

/// Route table and matcher
#[derive(Debug, Clone, Default)]
pub struct Router {
    routes: Vec<Route>,
    groups: Vec<Group>,
}

/// Join two path fragments with exactly one `/`
fn join_path(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    match (prefix.is_empty(), path.is_empty()) {
        (true, true) => "/".to_string(),
        (true, false) => format!("/{path}"),
        (false, true) => prefix.to_string(),
        (false, false) => format!("{prefix}/{path}"),
    }
}

impl Router {
    /// Create a new empty router
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route under the current group context
    ///
    /// The path is appended to the group prefixes; group middleware runs
    /// before `middleware`.
    ///
    /// # Errors
    ///
    /// `InvalidRouteConfiguration` when the pattern or a constraint is
    /// malformed.
    pub fn add_route(
        &mut self,
        method: &str,
        path: &str,
        action: Action,
        middleware: MiddlewareChain,
        constraints: &[(&str, &str)],
    ) -> Result<&mut Self> {
        let mut pattern = String::new();
        let mut ambient = MiddlewareChain::new();
        for group in &self.groups {
            pattern = join_path(&pattern, &group.prefix);
            ambient = group.middleware.prepended(&ambient);
        }
        let pattern = join_path(&pattern, path);

        let route = Route::new(
            method,
            &pattern,
            action,
            middleware.prepended(&ambient),
            constraints,
        )?;
        info!(
            method = %route.method(),
            pattern = %route.pattern(),
            target = %route.action().label(),
            middleware = route.middleware().len(),
            "Route registered"
        );
        self.routes.push(route);
        Ok(self)
    }

    /// Add a GET route
    ///
    /// # Errors
    ///
    /// See [`add_route`](Self::add_route).
    pub fn get(&mut self, path: &str, action: Action) -> Result<&mut Self> {
        self.add_route("GET", path, action, MiddlewareChain::new(), &[])
    }

    /// Add a POST route
    ///
    /// # Errors
    ///
    /// See [`add_route`](Self::add_route).
    pub fn post(&mut self, path: &str, action: Action) -> Result<&mut Self> {
        self.add_route("POST", path, action, MiddlewareChain::new(), &[])
    }

    /// Add a PUT route
    ///
    /// # Errors
    ///
    /// See [`add_route`](Self::add_route).
    pub fn put(&mut self, path: &str, action: Action) -> Result<&mut Self> {
        self.add_route("PUT", path, action, MiddlewareChain::new(), &[])
    }

    /// Add a PATCH route
    ///
    /// # Errors
    ///
    /// See [`add_route`](Self::add_route).
    pub fn patch(&mut self, path: &str, action: Action) -> Result<&mut Self> {
        self.add_route("PATCH", path, action, MiddlewareChain::new(), &[])
    }

    /// Add a DELETE route
    ///
    /// # Errors
    ///
    /// See [`add_route`](Self::add_route).
    pub fn delete(&mut self, path: &str, action: Action) -> Result<&mut Self> {
        self.add_route("DELETE", path, action, MiddlewareChain::new(), &[])
    }

    /// Declare routes under a shared prefix and middleware
    ///
    /// Nested groups accumulate; the previous context is restored afterwards
    /// whether or not `routes` succeeds.
    ///
    /// # Errors
    ///
    /// Whatever `routes` returns.
    pub fn group<F>(&mut self, prefix: &str, middleware: MiddlewareChain, routes: F) -> Result<&mut Self>
    where
        F: FnOnce(&mut Self) -> Result<()>,
    {
        self.groups.push(Group {
            prefix: prefix.to_string(),
            middleware,
        });
        let result = routes(self);
        self.groups.pop();
        result.map(|()| self)
    }

    /// Name the most recently registered route
    ///
    /// # Errors
    ///
    /// `InvalidRouteConfiguration` when no route exists yet or the name is
    /// already taken.
    pub fn name(&mut self, name: &str) -> Result<&mut Self> {
        if self.route_by_name(name).is_some() {
            return Err(Error::InvalidRouteConfiguration {
                pattern: name.to_string(),
                reason: "route name already in use".to_string(),
            });
        }
        let route = self
            .routes
            .last_mut()
            .ok_or_else(|| Error::InvalidRouteConfiguration {
                pattern: name.to_string(),
                reason: "no route to name".to_string(),
            })?;
        route.set_name(name.to_string());
        Ok(self)
    }

    /// Look up a route by name
    #[must_use]
    pub fn route_by_name(&self, name: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.name() == Some(name))
    }

    /// Build the path of a named route
    ///
    /// # Errors
    ///
    /// `RouteNotFound` for an unknown name, or `InvalidRouteConfiguration`
    /// when `params` do not fill the pattern.
    pub fn url_for(&self, name: &str, params: &[(&str, &str)]) -> Result<String> {
        self.route_by_name(name)
            .ok_or_else(|| Error::RouteNotFound {
                method: "*".to_string(),
                path: name.to_string(),
            })?
            .url(params)
    }

    /// First route matching `method` and `path`
    #[must_use]
    pub fn match_route(&self, method: &str, path: &str) -> Option<&Route> {
        self.routes.iter().find(|r| r.matches(method, path))
    }

    /// First matching route with its captures in declaration order
    #[must_use]
    pub fn resolve(&self, method: &str, path: &str) -> Option<(&Route, Vec<String>)> {
        let route = self.match_route(method, path)?;
        let captures = route.captures(path)?;
        Some((route, captures))
    }

    /// Registered routes in priority order
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter()
    }

    /// Number of registered routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{AuthMiddleware, LoggingMiddleware};
    use serde_json::{json, Value};

    fn noop() -> Action {
        Action::function(|| async { Value::Null })
    }

    fn tagged(tag: &'static str) -> Action {
        Action::function(move || async move { json!(tag) })
    }

    #[test]
    fn test_basic_routing() {
        let mut router = Router::new();
        router.get("/", noop()).unwrap();
        router.get("/users", noop()).unwrap();
        router.post("/users", noop()).unwrap();

        assert_eq!(router.len(), 3);
        assert_eq!(router.match_route("GET", "/").unwrap().pattern(), "/");
        assert_eq!(router.match_route("POST", "/users").unwrap().method(), "POST");
        assert!(router.match_route("DELETE", "/users").is_none());
        assert!(router.match_route("GET", "/nonexistent").is_none());
    }

    #[test]
    fn test_method_is_uppercased() {
        let mut router = Router::new();
        router
            .add_route("patch", "/users/{id}", noop(), MiddlewareChain::new(), &[])
            .unwrap();
        assert!(router.match_route("PATCH", "/users/1").is_some());
    }

    #[test]
    fn test_first_match_wins() {
        let mut router = Router::new();
        router.get("/users/{id}", tagged("show")).unwrap();
        router.get("/users/create", tagged("create")).unwrap();

        let route = router.match_route("GET", "/users/create").unwrap();
        assert_eq!(route.pattern(), "/users/{id}");
    }

    #[test]
    fn test_constraint_falls_through_to_later_route() {
        let mut router = Router::new();
        router
            .add_route("GET", "/users/{id}", noop(), MiddlewareChain::new(), &[("id", r"\d+")])
            .unwrap();
        router.get("/users/{slug}", noop()).unwrap();

        let (route, captures) = router.resolve("GET", "/users/ann").unwrap();
        assert_eq!(route.pattern(), "/users/{slug}");
        assert_eq!(captures, vec!["ann".to_string()]);
    }

    #[test]
    fn test_groups_nest_and_restore() {
        let mut router = Router::new();
        router
            .group("/api", MiddlewareChain::new().with(LoggingMiddleware::new()), |r| {
                r.get("/status", noop())?;
                r.group("v1/", MiddlewareChain::new().with(AuthMiddleware::new()), |r| {
                    r.add_route(
                        "GET",
                        "/users/{id}",
                        noop(),
                        MiddlewareChain::new().with(LoggingMiddleware::new()),
                        &[],
                    )?;
                    Ok(())
                })?;
                r.get("/health", noop())?;
                Ok(())
            })
            .unwrap();
        router.get("/outside", noop()).unwrap();

        let patterns: Vec<_> = router.routes().map(Route::pattern).collect();
        assert_eq!(
            patterns,
            vec!["/api/status", "/api/v1/users/{id}", "/api/health", "/outside"]
        );

        let nested = router.match_route("GET", "/api/v1/users/3").unwrap();
        assert_eq!(
            nested.middleware().names().collect::<Vec<_>>(),
            vec!["LoggingMiddleware", "AuthMiddleware", "LoggingMiddleware"]
        );
        assert_eq!(router.match_route("GET", "/api/health").unwrap().middleware().len(), 1);
        assert!(router.match_route("GET", "/outside").unwrap().middleware().is_empty());
    }

    #[test]
    fn test_group_restores_context_on_error() {
        let mut router = Router::new();
        let result = router.group("/broken", MiddlewareChain::new(), |r| {
            r.get("/{id", noop())?;
            Ok(())
        });
        assert!(result.is_err());

        router.get("/after", noop()).unwrap();
        assert_eq!(router.routes().next().unwrap().pattern(), "/after");
    }

    #[test]
    fn test_named_routes() {
        let mut router = Router::new();
        router.get("/users/{id}", noop()).unwrap().name("users.show").unwrap();

        assert_eq!(router.url_for("users.show", &[("id", "9")]).unwrap(), "/users/9");
        assert!(router.url_for("missing", &[]).is_err());
        assert!(router.name("users.show").is_err());
        assert!(Router::new().name("x").is_err());
    }
}
