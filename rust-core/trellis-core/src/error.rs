//! # Error Handling
//!
//! Centralized error types for Trellis core.
//! Uses `thiserror` for ergonomic error definitions.
//!
//! Container and routing errors are programmer errors surfaced at boot or on
//! first use. `Validation` is the only variant that is an expected outcome;
//! the dispatcher turns it into a 422 reply unless configured to raise it.

use crate::validation::ValidationErrors;
use thiserror::Error;

/// Result type alias for Trellis operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the Trellis runtime
#[derive(Error, Debug)]
pub enum Error {
    /// Nothing is registered for the key and it cannot be autowired
    #[error("No binding registered for {key}")]
    UnknownBinding {
        /// Type name of the requested key
        key: &'static str,
    },

    /// A constructor needs a value the container cannot produce
    #[error("Cannot resolve parameter `{parameter}` of {target}: {reason}")]
    UnresolvableDependency {
        /// Type being constructed
        target: &'static str,
        /// Constructor parameter (field) name
        parameter: String,
        /// Why it cannot be produced
        reason: String,
    },

    /// Resolution re-entered a key that is still being constructed
    #[error("Circular dependency detected: {}", chain.join(" -> "))]
    CircularDependency {
        /// Resolution chain, ending with the re-entered key
        chain: Vec<&'static str>,
    },

    /// A handler parameter had no capture left and no default
    #[error("Missing parameter #{position} ({expected}) for route {route}")]
    MissingParameter {
        /// Zero-based position among capture-consuming parameters
        position: usize,
        /// Expected parameter type
        expected: &'static str,
        /// Route pattern being dispatched
        route: String,
    },

    /// A capture could not be coerced to the declared primitive
    #[error("Cannot convert '{value}' to {expected}")]
    InvalidParameter {
        /// Raw captured value
        value: String,
        /// Expected parameter type
        expected: &'static str,
    },

    /// Router failed to match the requested path
    #[error("No route found for {method} {path}")]
    RouteNotFound {
        /// Request method
        method: String,
        /// The path that wasn't matched
        path: String,
    },

    /// A route could not be registered as declared
    #[error("Invalid route configuration for {pattern}: {reason}")]
    InvalidRouteConfiguration {
        /// The offending pattern (or route name)
        pattern: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Input failed validation
    #[error("Validation failed for {} field(s)", .0.len())]
    Validation(ValidationErrors),

    /// A validation rule string could not be parsed
    #[error("Invalid validation rule `{rule}`: {reason}")]
    InvalidRule {
        /// The rule as declared
        rule: String,
        /// What was wrong
        reason: String,
    },

    /// The data store could not be reached or configured
    #[error("Connection [{connection}] failed: {message}")]
    Connection {
        /// Connection profile name
        connection: String,
        /// Driver message
        message: String,
    },

    /// A statement failed to execute
    #[error("Query failed: {message} (sql: {sql})")]
    QueryExecution {
        /// SQL text that failed
        sql: String,
        /// Driver message
        message: String,
    },

    /// Query arguments rejected before reaching the store
    #[error("Invalid query: {reason}")]
    InvalidQuery {
        /// What was wrong
        reason: String,
    },

    /// Attribute write outside a model's fillable set
    #[error("Attribute `{field}` is not fillable on {model}")]
    InvalidAttribute {
        /// Model table
        model: &'static str,
        /// Rejected attribute
        field: String,
    },

    /// A transaction callback failed; the transaction was rolled back
    #[error("Transaction rolled back: {source}")]
    Transaction {
        /// The original failure
        #[source]
        source: Box<Error>,
    },

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Http(#[from] hyper::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Request body could not be decoded
    #[error("Malformed request body: {reason}")]
    MalformedBody {
        /// Decoder message
        reason: String,
    },

    /// Request payload too large
    #[error("Payload too large: limit={limit} bytes, received={actual} bytes")]
    PayloadTooLarge {
        /// Max allowed size
        limit: usize,
        /// Actual size
        actual: usize,
    },
}

impl Error {
    /// Build a `QueryExecution` error from a driver failure
    pub(crate) fn query(sql: &str, err: &sqlx::Error) -> Self {
        Self::QueryExecution {
            sql: sql.to_string(),
            message: err.to_string(),
        }
    }

    /// Shorthand for `InvalidQuery`
    pub(crate) fn invalid_query(reason: impl Into<String>) -> Self {
        Self::InvalidQuery {
            reason: reason.into(),
        }
    }

    /// Whether this error is a client-correctable validation failure
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
