//! # HTTP Request
//!
//! Transport-neutral request: method, path, headers, one merged parameter bag
//! (query string, then form or JSON body on top) and attached files.
//!
//! The bag is built once at the edge; handlers only read from it.

use crate::error::{Error, Result};
use crate::json::{parse_body, parse_query_string};
use http_body_util::BodyExt;
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;

/// A file attached to a request under a form field name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    /// Form field the file was sent under
    pub field: String,
    /// Client-supplied file name
    pub file_name: String,
    /// Declared media type
    pub content_type: String,
    /// File contents
    pub bytes: Bytes,
}

impl UploadedFile {
    /// Create an upload for `field`
    pub fn new(
        field: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            field: field.into(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes: bytes.into(),
        }
    }

    /// Size in bytes
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Incoming request as seen by middleware and handlers
#[derive(Debug, Clone, Default)]
pub struct Request {
    method: String,
    path: String,
    headers: HeaderMap,
    params: Map<String, Value>,
    files: HashMap<String, UploadedFile>,
}

impl Request {
    /// Create a request; a `?query` suffix on `path` seeds the parameter bag
    pub fn new(method: impl AsRef<str>, path: impl Into<String>) -> Self {
        let path = path.into();
        let (path, params) = match path.split_once('?') {
            Some((p, q)) => (p.to_string(), parse_query_string(Some(q))),
            None => (path, Map::new()),
        };

        Self {
            method: method.as_ref().to_ascii_uppercase(),
            path,
            params,
            ..Self::default()
        }
    }

    /// Merge `params` into the bag, overwriting existing keys
    #[must_use]
    pub fn with_params(mut self, params: Map<String, Value>) -> Self {
        self.params.extend(params);
        self
    }

    /// Merge a JSON object into the bag; other JSON values are ignored
    #[must_use]
    pub fn with_json(self, payload: Value) -> Self {
        match payload {
            Value::Object(map) => self.with_params(map),
            _ => self,
        }
    }

    /// Set a single parameter
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Attach a file under its field name
    #[must_use]
    pub fn with_file(mut self, file: UploadedFile) -> Self {
        self.files.insert(file.field.clone(), file);
        self
    }

    /// Set a header; invalid names or values are ignored
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Create from a hyper request, rejecting bodies above `max_body_size`
    pub async fn from_hyper_with_limit(
        req: hyper::Request<hyper::body::Incoming>,
        max_body_size: usize,
    ) -> Result<Self> {
        let (parts, body) = req.into_parts();

        if let Some(declared) = parts
            .headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<usize>().ok())
        {
            if declared > max_body_size {
                return Err(Error::PayloadTooLarge {
                    limit: max_body_size,
                    actual: declared,
                });
            }
        }

        let bytes = BodyExt::collect(body).await?.to_bytes();
        if bytes.len() > max_body_size {
            return Err(Error::PayloadTooLarge {
                limit: max_body_size,
                actual: bytes.len(),
            });
        }

        let content_type = parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let body_params = parse_body(content_type, &bytes)?;

        let mut params = parse_query_string(parts.uri.query());
        params.extend(body_params);

        Ok(Self {
            method: parts.method.as_str().to_string(),
            path: parts.uri.path().to_string(),
            headers: parts.headers,
            params,
            files: HashMap::new(),
        })
    }

    /// Uppercase HTTP method
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Request path without the query string
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The whole parameter bag
    #[must_use]
    pub const fn all(&self) -> &Map<String, Value> {
        &self.params
    }

    /// Parameter value, or `default` when the key is absent
    #[must_use]
    pub fn input(&self, key: &str, default: impl Into<Value>) -> Value {
        self.params.get(key).cloned().unwrap_or_else(|| default.into())
    }

    /// Parameter value as text, when present and a string
    #[must_use]
    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    /// Whether the bag contains `key`
    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.params.contains_key(key)
    }

    /// Attached file for `key`
    #[must_use]
    pub fn file(&self, key: &str) -> Option<&UploadedFile> {
        self.files.get(key)
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: &str) {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.insert(n, v);
        }
    }

    /// Raw header map
    #[must_use]
    pub const fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Bearer token from the `Authorization` header
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        self.header("authorization")
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

/// A request kind that carries its own validation rules
///
/// Declaring `Validated<R>` as a handler parameter runs `R::RULES` against
/// the parameter bag before the handler is invoked.
///
/// ```ignore
/// struct StoreUser;
///
/// impl FormRequest for StoreUser {
///     const RULES: &'static [(&'static str, &'static str)] = &[
///         ("name", "required|max:255"),
///         ("email", "required|email|unique:users,email"),
///     ];
/// }
/// ```
pub trait FormRequest: Send + Sync + 'static {
    /// `field -> "rule|rule"` pairs
    const RULES: &'static [(&'static str, &'static str)];
    /// Message overrides keyed by `field.rule`
    const MESSAGES: &'static [(&'static str, &'static str)] = &[];
}

/// A request whose parameters passed `R`'s rules
pub struct Validated<R: FormRequest> {
    request: Request,
    kind: PhantomData<fn() -> R>,
}

impl<R: FormRequest> Validated<R> {
    pub(crate) const fn new(request: Request) -> Self {
        Self {
            request,
            kind: PhantomData,
        }
    }

    /// Unwrap the underlying request
    #[must_use]
    pub fn into_inner(self) -> Request {
        self.request
    }
}

impl<R: FormRequest> Deref for Validated<R> {
    type Target = Request;

    fn deref(&self) -> &Request {
        &self.request
    }
}

impl<R: FormRequest> fmt::Debug for Validated<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Validated").field(&self.request).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_string_seeds_params() {
        let req = Request::new("get", "/users?page=2&q=ann+lee");
        assert_eq!(req.method(), "GET");
        assert_eq!(req.path(), "/users");
        assert_eq!(req.input("page", Value::Null), json!("2"));
        assert_eq!(req.input_str("q"), Some("ann lee"));
    }

    #[test]
    fn test_body_overrides_query() {
        let req = Request::new("POST", "/users?name=query")
            .with_json(json!({"name": "body", "age": 30}));
        assert_eq!(req.all().len(), 2);
        assert_eq!(req.input("name", ""), json!("body"));
        assert_eq!(req.input("age", 0), json!(30));
    }

    #[test]
    fn test_input_default() {
        let req = Request::new("GET", "/");
        assert_eq!(req.input("missing", "fallback"), json!("fallback"));
        assert!(!req.has("missing"));
    }

    #[test]
    fn test_files() {
        let req = Request::new("POST", "/avatar").with_file(UploadedFile::new(
            "avatar",
            "me.png",
            "image/png",
            vec![1u8, 2, 3],
        ));
        let file = req.file("avatar").unwrap();
        assert_eq!(file.file_name, "me.png");
        assert_eq!(file.size(), 3);
        assert!(req.file("other").is_none());
    }

    #[test]
    fn test_headers_case_insensitive() {
        let req = Request::new("GET", "/").with_header("X-Request-Id", "abc");
        assert_eq!(req.header("x-request-id"), Some("abc"));
    }

    #[test]
    fn test_bearer_token() {
        let req = Request::new("GET", "/").with_header("Authorization", "Bearer tok-1");
        assert_eq!(req.bearer_token(), Some("tok-1"));
        let req = Request::new("GET", "/").with_header("Authorization", "Basic xyz");
        assert_eq!(req.bearer_token(), None);
        assert_eq!(Request::new("GET", "/").bearer_token(), None);
    }
}
