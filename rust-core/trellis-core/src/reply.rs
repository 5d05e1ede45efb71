//! # Replies and Outcomes
//!
//! A [`Reply`] is a status, a JSON body and extra headers. An [`Outcome`] is
//! what dispatch produced: a handler reply, a validation failure (422) or
//! no matching route (404). Faults travel separately as `Err`.

use crate::error::Result;
use crate::model::{Page, Schema};
use crate::validation::ValidationErrors;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::{json, Value};

/// Success payload with status code
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// HTTP status code
    pub status: u16,
    /// JSON body
    pub body: Value,
    /// Extra response headers
    pub headers: IndexMap<String, String>,
}

impl Default for Reply {
    fn default() -> Self {
        Self {
            status: 200,
            body: Value::Null,
            headers: IndexMap::new(),
        }
    }
}

impl Reply {
    /// 200 reply with `body`
    #[must_use]
    pub fn json(body: Value) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// 201 reply with `body`
    #[must_use]
    pub fn created(body: Value) -> Self {
        Self::json(body).with_status(201)
    }

    /// Serialize any value into a 200 reply
    ///
    /// # Errors
    ///
    /// `Error::Json` when `value` cannot be serialized.
    pub fn serialize<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::json(serde_json::to_value(value)?))
    }

    /// Standard envelope for a page of models
    ///
    /// `{msg, status, totalRecord, currentPage, perPage, lastPage, data}`
    ///
    /// # Errors
    ///
    /// `Error::Json` when a model attribute cannot be serialized.
    pub fn paginate<S: Schema>(page: &Page<S>) -> Result<Self> {
        Ok(Self::json(json!({
            "msg": "success",
            "status": true,
            "totalRecord": page.total,
            "currentPage": page.current_page,
            "perPage": page.per_page,
            "lastPage": page.last_page,
            "data": serde_json::to_value(&page.data)?
        })))
    }

    /// Set status code
    #[must_use]
    pub const fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.set_header(key, value);
        self
    }

    /// Set or override a header
    pub fn set_header(&mut self, key: &str, value: &str) {
        self.headers.insert(key.to_ascii_lowercase(), value.to_string());
    }
}

/// Result of dispatching one request
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A handler or middleware produced a reply
    Reply(Reply),
    /// Input failed validation
    ValidationFailure(ValidationErrors),
    /// No route matched
    NotFound,
}

impl Outcome {
    /// HTTP status this outcome maps to
    #[must_use]
    pub const fn status(&self) -> u16 {
        match self {
            Self::Reply(reply) => reply.status,
            Self::ValidationFailure(_) => 422,
            Self::NotFound => 404,
        }
    }

    /// Flatten into a reply for the transport
    #[must_use]
    pub fn into_reply(self) -> Reply {
        match self {
            Self::Reply(reply) => reply,
            Self::ValidationFailure(errors) => {
                Reply::json(json!({ "errors": errors.to_json() })).with_status(422)
            }
            Self::NotFound => Reply::json(json!({ "msg": "Not Found" })).with_status(404),
        }
    }

    /// The reply, if this is a success outcome
    #[must_use]
    pub const fn reply(&self) -> Option<&Reply> {
        match self {
            Self::Reply(reply) => Some(reply),
            _ => None,
        }
    }
}

impl From<Reply> for Outcome {
    fn from(reply: Reply) -> Self {
        Self::Reply(reply)
    }
}

/// Values a handler may return
pub trait IntoOutcome {
    /// Convert into a dispatch outcome
    ///
    /// # Errors
    ///
    /// Faults raised by the handler, or serialization failures.
    fn into_outcome(self) -> Result<Outcome>;
}

impl IntoOutcome for Outcome {
    fn into_outcome(self) -> Result<Outcome> {
        Ok(self)
    }
}

impl IntoOutcome for Reply {
    fn into_outcome(self) -> Result<Outcome> {
        Ok(Outcome::Reply(self))
    }
}

impl IntoOutcome for Value {
    fn into_outcome(self) -> Result<Outcome> {
        Ok(Outcome::Reply(Reply::json(self)))
    }
}

impl<T: IntoOutcome> IntoOutcome for Result<T> {
    fn into_outcome(self) -> Result<Outcome> {
        self.and_then(IntoOutcome::into_outcome)
    }
}
