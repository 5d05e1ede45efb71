//! # Trellis Core
//!
//! Core runtime library for the Trellis backend framework: request dispatch
//! with dependency resolution, plus a query builder and active-record layer.
//!
//! ## Architecture
//!
//! Leaf to root: the service container and query builder at the bottom, the
//! model and validator on top of them, then the request object, middleware,
//! route table and finally the dispatcher that ties them together. The HTTP
//! server is a thin boundary around the dispatcher.
//!
//! ## Modules
//!
//! - `container` - Type-keyed service container with autowiring
//! - `router` / `route` - Ordered route table, regex matcher and groups
//! - `handler` - Typed handler parameters and route targets
//! - `dispatcher` - Middleware, matching, resolution and error translation
//! - `middleware` - Request interception (logging, auth hook)
//! - `request` / `reply` - Request parameter bag, replies and outcomes
//! - `validation` - Rule engine with database-backed `unique`
//! - `query` - Fluent single-table SQL builder
//! - `model` - Active-record models, relations and pagination
//! - `repository` / `collection` - Per-table repositories and result lists
//! - `database` - Single persistent SQLx connection per profile
//! - `server` - Hyper HTTP boundary
//! - `config` - Server, database and validation settings
//! - `json` / `types` - Body decoding and capture coercion
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

extern crate self as trellis_core;

pub mod collection;
pub mod config;
pub mod container;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod json;
pub mod middleware;
pub mod model;
pub mod query;
pub mod reply;
pub mod repository;
pub mod request;
pub mod route;
pub mod router;
pub mod server;
pub mod types;
pub mod validation;

pub use collection::Collection;
pub use config::{ConnectionConfig, DatabaseConfig, Driver, ServerConfig, ValidationMode};
pub use container::{Container, Injectable, Lifetime, Resolver};
pub use database::{Database, DatabaseManager, DbValue, Dialect, IntoRecord, Record};
pub use dispatcher::Dispatcher;
pub use error::{Error, Result};
pub use handler::{Action, FromDispatch, Inject};
pub use middleware::{AuthMiddleware, LoggingMiddleware, Middleware, MiddlewareChain, MiddlewareResult};
pub use model::{Loaded, Model, ModelQuery, Page, Relation, RelationKind, Schema};
pub use query::{QueryBuilder, Statement};
pub use reply::{IntoOutcome, Outcome, Reply};
pub use repository::Repository;
pub use request::{FormRequest, Request, UploadedFile, Validated};
pub use route::Route;
pub use router::Router;
pub use server::Server;
pub use trellis_macros::Injectable;
pub use types::FromCapture;
pub use validation::{Rule, ValidationErrors, Validator};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the JSON tracing subscriber, filtered by `RUST_LOG`
///
/// Defaults to `info` when `RUST_LOG` is unset. Safe to call more than once;
/// only the first call installs a subscriber.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, "0.1.0");
    }

    #[test]
    fn test_init_tracing_is_idempotent() {
        init_tracing();
        init_tracing();
    }
}
