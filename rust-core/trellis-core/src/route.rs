//! # Route Definition
//!
//! A route pairs a method and a path pattern with its target and middleware.
//! Patterns are literal segments plus `{name}` placeholders. Each placeholder
//! becomes a named group matching its constraint, or one or more of
//! `[A-Za-z0-9_-]` when unconstrained. The whole pattern is anchored at both
//! ends.

use crate::error::{Error, Result};
use crate::handler::Action;
use crate::middleware::MiddlewareChain;
use regex::Regex;

/// Capture pattern for placeholders without a constraint
pub const DEFAULT_TOKEN: &str = "[A-Za-z0-9_-]+";

/// One registered route
#[derive(Debug, Clone)]
pub struct Route {
    method: String,
    pattern: String,
    regex: Regex,
    placeholders: Vec<String>,
    action: Action,
    middleware: MiddlewareChain,
    name: Option<String>,
}

impl Route {
    /// Compile a route
    ///
    /// `constraints` maps placeholder names to regex fragments.
    ///
    /// # Errors
    ///
    /// `InvalidRouteConfiguration` for malformed placeholders, duplicate
    /// names, constraints on unknown placeholders or an invalid regex.
    pub fn new(
        method: &str,
        pattern: &str,
        action: Action,
        middleware: MiddlewareChain,
        constraints: &[(&str, &str)],
    ) -> Result<Self> {
        let (regex, placeholders) = compile(pattern, constraints)?;
        Ok(Self {
            method: method.to_ascii_uppercase(),
            pattern: pattern.to_string(),
            regex,
            placeholders,
            action,
            middleware,
            name: None,
        })
    }

    /// Uppercase method
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Full path pattern, group prefixes included
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Placeholder names in declaration order
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Route target
    #[must_use]
    pub const fn action(&self) -> &Action {
        &self.action
    }

    /// Route-level middleware, group middleware first
    #[must_use]
    pub const fn middleware(&self) -> &MiddlewareChain {
        &self.middleware
    }

    /// Route name, if any
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub(crate) fn set_name(&mut self, name: String) {
        self.name = Some(name);
    }

    /// Whether `method` and `path` select this route
    #[must_use]
    pub fn matches(&self, method: &str, path: &str) -> bool {
        self.method == method && self.regex.is_match(path)
    }

    /// Captured values in placeholder declaration order
    #[must_use]
    pub fn captures(&self, path: &str) -> Option<Vec<String>> {
        let caps = self.regex.captures(path)?;
        self.placeholders
            .iter()
            .map(|name| caps.name(name).map(|m| m.as_str().to_string()))
            .collect()
    }

    /// Fill placeholders with `params`
    ///
    /// # Errors
    ///
    /// `InvalidRouteConfiguration` when a placeholder has no value or the
    /// resulting path would not match this route.
    pub fn url(&self, params: &[(&str, &str)]) -> Result<String> {
        let mut url = self.pattern.clone();
        for placeholder in &self.placeholders {
            let value = params
                .iter()
                .find(|(k, _)| *k == placeholder.as_str())
                .map(|(_, v)| *v)
                .ok_or_else(|| self.invalid(format!("missing value for `{placeholder}`")))?;
            url = url.replace(&format!("{{{placeholder}}}"), value);
        }

        if !self.regex.is_match(&url) {
            return Err(self.invalid(format!("`{url}` does not satisfy the route constraints")));
        }
        Ok(url)
    }

    fn invalid(&self, reason: String) -> Error {
        Error::InvalidRouteConfiguration {
            pattern: self.pattern.clone(),
            reason,
        }
    }
}

fn invalid(pattern: &str, reason: impl Into<String>) -> Error {
    Error::InvalidRouteConfiguration {
        pattern: pattern.to_string(),
        reason: reason.into(),
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Translate a path pattern into an anchored regex
///
/// # Errors
///
/// See [`Route::new`].
pub fn compile(pattern: &str, constraints: &[(&str, &str)]) -> Result<(Regex, Vec<String>)> {
    let mut source = String::with_capacity(pattern.len() * 2);
    let mut placeholders: Vec<String> = Vec::new();
    let mut rest = pattern;

    source.push('^');
    while let Some(open) = rest.find('{') {
        if rest[..open].contains('}') {
            return Err(invalid(pattern, "unmatched `}` in pattern"));
        }
        source.push_str(&regex::escape(&rest[..open]));
        let after = &rest[open + 1..];
        let close = after
            .find('}')
            .ok_or_else(|| invalid(pattern, "unclosed `{` in pattern"))?;
        let name = &after[..close];

        if !is_identifier(name) {
            return Err(invalid(pattern, format!("invalid placeholder name `{name}`")));
        }
        if placeholders.iter().any(|p| p == name) {
            return Err(invalid(pattern, format!("duplicate placeholder `{name}`")));
        }

        let capture = constraints
            .iter()
            .find(|(k, _)| *k == name)
            .map_or(DEFAULT_TOKEN, |(_, c)| *c);
        source.push_str(&format!("(?P<{name}>{capture})"));
        placeholders.push(name.to_string());
        rest = &after[close + 1..];
    }
    if rest.contains('}') {
        return Err(invalid(pattern, "unmatched `}` in pattern"));
    }
    source.push_str(&regex::escape(rest));
    source.push('$');

    if let Some((unknown, _)) = constraints
        .iter()
        .find(|(k, _)| !placeholders.iter().any(|p| p == k))
    {
        return Err(invalid(
            pattern,
            format!("constraint for unknown placeholder `{unknown}`"),
        ));
    }

    let regex = Regex::new(&source).map_err(|e| invalid(pattern, e.to_string()))?;
    Ok((regex, placeholders))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn route(pattern: &str, constraints: &[(&str, &str)]) -> Result<Route> {
        Route::new(
            "get",
            pattern,
            Action::function(|| async { Value::Null }),
            MiddlewareChain::new(),
            constraints,
        )
    }

    #[test]
    fn test_literal_route() {
        let r = route("/users", &[]).unwrap();
        assert_eq!(r.method(), "GET");
        assert!(r.matches("GET", "/users"));
        assert!(!r.matches("GET", "/users/"));
        assert!(!r.matches("POST", "/users"));
        assert!(!r.matches("GET", "/api/users"));
    }

    #[test]
    fn test_default_token() {
        let r = route("/users/{id}", &[]).unwrap();
        assert!(r.matches("GET", "/users/a-b_9"));
        assert!(!r.matches("GET", "/users/"));
        assert!(!r.matches("GET", "/users/a.b"));
        assert!(!r.matches("GET", "/users/1/extra"));
    }

    #[test]
    fn test_captures_in_declaration_order() {
        let r = route("/users/{user}/posts/{post}", &[]).unwrap();
        assert_eq!(r.placeholders(), ["user", "post"]);
        assert_eq!(
            r.captures("/users/12/posts/intro").unwrap(),
            vec!["12".to_string(), "intro".to_string()]
        );
        assert!(r.captures("/users/12").is_none());
    }

    #[test]
    fn test_constraint_overrides_default() {
        let r = route("/files/{path}/v{version}", &[("path", ".+"), ("version", r"\d+")]).unwrap();
        assert_eq!(
            r.captures("/files/a/b.txt/v3").unwrap(),
            vec!["a/b.txt".to_string(), "3".to_string()]
        );
        assert!(!r.matches("GET", "/files/a/vx"));
    }

    #[test]
    fn test_literal_text_is_escaped() {
        let r = route("/report.json", &[]).unwrap();
        assert!(r.matches("GET", "/report.json"));
        assert!(!r.matches("GET", "/reportxjson"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(route("/users/{id", &[]).is_err());
        assert!(route("/users/id}", &[]).is_err());
        assert!(route("/users/{1id}", &[]).is_err());
        assert!(route("/a/{id}/b/{id}", &[]).is_err());
        assert!(route("/a/{id}", &[("other", r"\d+")]).is_err());
        assert!(route("/a/{id}", &[("id", "(")]).is_err());
    }

    #[test]
    fn test_url() {
        let r = route("/users/{id}/posts/{post}", &[("id", r"\d+")]).unwrap();
        assert_eq!(r.url(&[("id", "5"), ("post", "intro")]).unwrap(), "/users/5/posts/intro");
        assert!(r.url(&[("id", "5")]).is_err());
        assert!(r.url(&[("id", "x"), ("post", "intro")]).is_err());
    }
}
