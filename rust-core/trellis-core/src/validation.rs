//! # Validation Module
//!
//! Rule-based validation of request data with structured errors.
//!
//! Rules are declared per field as a `|`-separated list, e.g.
//! `"required|email|unique:users,email"`. Every rule of every field is
//! evaluated; a field collects all of its violations, not just the first.
//!
//! ## Built-in rules
//!
//! | Rule | Passes when |
//! |---|---|
//! | `required` | value present and not blank |
//! | `min:N` / `max:N` | length (characters, or items) within bound |
//! | `email` | value is an email address |
//! | `unique:table,column` | no row has the value (blank values pass) |
//! | `string` | value absent or a string |
//! | `numeric` | value absent, a number, or a numeric string |
//!
//! Further rules can be registered with [`Validator::extend`].

use crate::database::{Database, DbValue};
use crate::error::{Error, Result};
use crate::query::{validate_identifier, QueryBuilder};
use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// Field name to ordered list of messages
///
/// An empty set means the data is valid.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationErrors(IndexMap<String, Vec<String>>);

impl ValidationErrors {
    /// Create an empty error collection
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message for `field`
    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    /// Check if there are any errors
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of fields with errors
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Messages for one field
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }

    /// Whether `field` has any error
    #[must_use]
    pub fn has(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Fields with errors, in the order they failed
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Convert to JSON value (`{field: [messages]}`)
    #[must_use]
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// `Ok(())` when empty, `Err(Error::Validation)` otherwise
    pub fn into_result(self) -> Result<()> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(Error::Validation(self))
        }
    }
}

/// One parsed validation rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rule {
    /// Value present and not blank
    Required,
    /// Minimum length
    Min(usize),
    /// Maximum length
    Max(usize),
    /// Email address
    Email,
    /// No existing row in `table` has the value in `column`
    Unique {
        /// Table to look in
        table: String,
        /// Column to compare
        column: String,
    },
    /// String when present
    String,
    /// Number or numeric string when present
    Numeric,
    /// Rule registered through [`Validator::extend`]
    Custom {
        /// Rule name
        name: String,
        /// Text after `:`, if any
        argument: Option<String>,
    },
}

impl Rule {
    /// Parse one rule such as `min:8` or `unique:users,email`
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidRule {
            rule: raw.to_string(),
            reason: reason.to_string(),
        };
        let (name, argument) = match raw.trim().split_once(':') {
            Some((name, arg)) => (name, Some(arg.trim())),
            None => (raw.trim(), None),
        };
        let bound = || {
            argument
                .ok_or_else(|| invalid("missing length"))?
                .parse::<usize>()
                .map_err(|_| invalid("length must be a non-negative integer"))
        };

        Ok(match name {
            "required" => Self::Required,
            "min" => Self::Min(bound()?),
            "max" => Self::Max(bound()?),
            "email" => Self::Email,
            "string" => Self::String,
            "numeric" => Self::Numeric,
            "unique" => {
                let (table, column) = argument
                    .and_then(|a| a.split_once(','))
                    .ok_or_else(|| invalid("expected unique:table,column"))?;
                let (table, column) = (table.trim(), column.trim());
                validate_identifier(table)?;
                validate_identifier(column)?;
                Self::Unique {
                    table: table.to_string(),
                    column: column.to_string(),
                }
            }
            "" => return Err(invalid("empty rule")),
            other => Self::Custom {
                name: other.to_string(),
                argument: argument.map(ToString::to_string),
            },
        })
    }

    /// Parse a `|`-separated rule list
    pub fn parse_list(raw: &str) -> Result<Vec<Self>> {
        raw.split('|')
            .filter(|r| !r.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    /// Key used to look up a custom message (`field.<name>`)
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Required => "required",
            Self::Min(_) => "min",
            Self::Max(_) => "max",
            Self::Email => "email",
            Self::Unique { .. } => "unique",
            Self::String => "string",
            Self::Numeric => "numeric",
            Self::Custom { name, .. } => name,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Min(n) => write!(f, "min:{n}"),
            Self::Max(n) => write!(f, "max:{n}"),
            Self::Unique { table, column } => write!(f, "unique:{table},{column}"),
            Self::Custom {
                name,
                argument: Some(arg),
            } => write!(f, "{name}:{arg}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Check function of a custom rule: `(value, argument) -> passes`
pub type RuleCheck = Arc<dyn Fn(Option<&Value>, Option<&str>) -> bool + Send + Sync>;

#[derive(Clone)]
struct CustomRule {
    check: RuleCheck,
    message: String,
}

/// Evaluates rule sets against request data
///
/// Holds the connection used by `unique` and any registered custom rules.
#[derive(Clone, Default)]
pub struct Validator {
    db: Option<Database>,
    custom: HashMap<String, CustomRule>,
}

impl fmt::Debug for Validator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Validator")
            .field("db", &self.db)
            .field("custom", &self.custom.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn is_email(candidate: &str) -> bool {
    static EMAIL: OnceLock<Option<Regex>> = OnceLock::new();
    EMAIL
        .get_or_init(|| {
            Regex::new(
                r"^[A-Za-z0-9.!#$%&'*+/=?^_`{|}~-]+@[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?)+$",
            )
            .ok()
        })
        .as_ref()
        .is_some_and(|re| re.is_match(candidate))
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(a)) => a.is_empty(),
        Some(Value::Object(o)) => o.is_empty(),
        Some(_) => false,
    }
}

fn length(value: Option<&Value>) -> usize {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::String(s)) => s.chars().count(),
        Some(Value::Array(a)) => a.len(),
        Some(Value::Object(o)) => o.len(),
        Some(other) => other.to_string().chars().count(),
    }
}

impl Validator {
    /// Validator without database access
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Validator whose `unique` rules query `db`
    #[must_use]
    pub fn with_database(db: Database) -> Self {
        Self {
            db: Some(db),
            custom: HashMap::new(),
        }
    }

    /// Register a custom rule
    ///
    /// `message` may use `{field}` and `{arg}`.
    ///
    /// # Example
    ///
    /// ```ignore
    /// validator.extend("starts_with", "{field} must start with {arg}.", |value, arg| {
    ///     value.and_then(|v| v.as_str()).is_some_and(|s| s.starts_with(arg.unwrap_or("")))
    /// });
    /// ```
    pub fn extend<F>(&mut self, name: impl Into<String>, message: impl Into<String>, check: F)
    where
        F: Fn(Option<&Value>, Option<&str>) -> bool + Send + Sync + 'static,
    {
        self.custom.insert(
            name.into(),
            CustomRule {
                check: Arc::new(check),
                message: message.into(),
            },
        );
    }

    /// Validate `data` against `rules` (`field -> "rule|rule"`)
    ///
    /// `messages` overrides default messages by `field.rule` key.
    /// Returns the collected errors; `Err` only for malformed rules or a
    /// failed `unique` lookup.
    pub async fn validate(
        &self,
        data: &Map<String, Value>,
        rules: &[(&str, &str)],
        messages: &[(&str, &str)],
    ) -> Result<ValidationErrors> {
        let mut errors = ValidationErrors::new();

        for (field, declared) in rules {
            let value = data.get(*field);
            for rule in Rule::parse_list(declared)? {
                if let Some(default) = self.violation(field, value, &rule).await? {
                    let key = format!("{field}.{}", rule.name());
                    let message = messages
                        .iter()
                        .find(|(k, _)| *k == key)
                        .map_or(default, |(_, m)| (*m).to_string());
                    errors.add(*field, message);
                }
            }
        }

        if !errors.is_empty() {
            debug!(fields = ?errors.fields().collect::<Vec<_>>(), "Validation failed");
        }
        Ok(errors)
    }

    /// As [`validate`](Self::validate), failing with `Error::Validation`
    pub async fn check(
        &self,
        data: &Map<String, Value>,
        rules: &[(&str, &str)],
        messages: &[(&str, &str)],
    ) -> Result<()> {
        self.validate(data, rules, messages).await?.into_result()
    }

    /// Default message when `rule` rejects `value`, `None` when it passes
    async fn violation(&self, field: &str, value: Option<&Value>, rule: &Rule) -> Result<Option<String>> {
        let failed = match rule {
            Rule::Required => is_blank(value),
            Rule::Min(min) => length(value) < *min,
            Rule::Max(max) => length(value) > *max,
            Rule::Email => !value
                .and_then(Value::as_str)
                .is_some_and(is_email),
            Rule::String => !matches!(value, None | Some(Value::Null | Value::String(_))),
            Rule::Numeric => match value {
                None | Some(Value::Null | Value::Number(_)) => false,
                Some(Value::String(s)) => s.trim().parse::<f64>().is_err(),
                Some(_) => true,
            },
            Rule::Unique { table, column } => self.is_duplicate(table, column, value).await?,
            Rule::Custom { name, argument } => match self.custom.get(name) {
                Some(custom) => {
                    if (custom.check)(value, argument.as_deref()) {
                        return Ok(None);
                    }
                    let message = custom
                        .message
                        .replace("{field}", field)
                        .replace("{arg}", argument.as_deref().unwrap_or(""));
                    return Ok(Some(message));
                }
                None => {
                    warn!(rule = %rule, field, "Unknown validation rule ignored");
                    false
                }
            },
        };

        Ok(failed.then(|| match rule {
            Rule::Required => format!("{field} is required."),
            Rule::Min(min) => format!("{field} must be at least {min} characters."),
            Rule::Max(max) => format!("{field} must not exceed {max} characters."),
            Rule::Email => format!("{field} must be a valid email address."),
            Rule::Unique { .. } => format!("{field} has already been taken."),
            Rule::String => format!("{field} must be a string."),
            Rule::Numeric => format!("{field} must be a number."),
            Rule::Custom { .. } => format!("{field} is invalid."),
        }))
    }

    async fn is_duplicate(&self, table: &str, column: &str, value: Option<&Value>) -> Result<bool> {
        if is_blank(value) {
            return Ok(false);
        }
        let db = self.db.clone().ok_or_else(|| Error::Connection {
            connection: "validator".to_string(),
            message: format!("unique:{table},{column} needs a database connection"),
        })?;
        let needle = value.map_or(DbValue::Null, DbValue::from_json);
        let found = QueryBuilder::new(db, table)
            .where_eq(column, needle)
            .count()
            .await?;
        Ok(found > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn data(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test data must be an object"),
        }
    }

    #[tokio::test]
    async fn test_two_failing_fields() {
        let errors = Validator::new()
            .validate(
                &data(json!({"name": "", "email": "bad"})),
                &[("name", "required"), ("email", "required|email")],
                &[],
            )
            .await
            .unwrap();

        assert_eq!(errors.len(), 2);
        assert_eq!(errors.fields().collect::<Vec<_>>(), ["name", "email"]);
        assert_eq!(errors.get("name").unwrap(), ["name is required."]);
        assert_eq!(errors.get("email").unwrap(), ["email must be a valid email address."]);
    }

    #[tokio::test]
    async fn test_rules_do_not_short_circuit() {
        let errors = Validator::new()
            .validate(&data(json!({"password": ""})), &[("password", "required|min:8")], &[])
            .await
            .unwrap();

        assert_eq!(errors.get("password").map(<[String]>::len), Some(2));
    }

    #[tokio::test]
    async fn test_valid_data_yields_empty_set() {
        let errors = Validator::new()
            .validate(
                &data(json!({"name": "Ann", "email": "ann@example.com", "age": "42"})),
                &[
                    ("name", "required|string|max:255"),
                    ("email", "required|email"),
                    ("age", "numeric"),
                ],
                &[],
            )
            .await
            .unwrap();
        assert!(errors.is_empty());
        assert_ok!(errors.into_result());
    }

    #[tokio::test]
    async fn test_custom_messages_override_defaults() {
        let errors = Validator::new()
            .validate(
                &data(json!({"email": "nope"})),
                &[("email", "email")],
                &[("email.email", "The email must be a valid email address.")],
            )
            .await
            .unwrap();
        assert_eq!(
            errors.get("email").unwrap(),
            ["The email must be a valid email address."]
        );
    }

    #[tokio::test]
    async fn test_unique_queries_database() {
        let db = Database::memory().await.unwrap();
        db.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT)", &[])
            .await
            .unwrap();
        db.execute("INSERT INTO users (email) VALUES (?)", &["taken@example.com".into()])
            .await
            .unwrap();
        let validator = Validator::with_database(db);
        let rules = [("email", "unique:users,email")];

        let taken = validator
            .validate(&data(json!({"email": "taken@example.com"})), &rules, &[])
            .await
            .unwrap();
        let free = validator
            .validate(&data(json!({"email": "free@example.com"})), &rules, &[])
            .await
            .unwrap();
        let blank = validator
            .validate(&data(json!({"email": ""})), &rules, &[])
            .await
            .unwrap();

        assert_eq!(taken.get("email").unwrap(), ["email has already been taken."]);
        assert!(free.is_empty());
        assert!(blank.is_empty());
    }

    #[tokio::test]
    async fn test_custom_rule() {
        let mut validator = Validator::new();
        validator.extend("starts_with", "{field} must start with {arg}.", |value, arg| {
            value
                .and_then(Value::as_str)
                .is_some_and(|s| s.starts_with(arg.unwrap_or_default()))
        });

        let errors = validator
            .validate(&data(json!({"code": "XY-1"})), &[("code", "starts_with:AB")], &[])
            .await
            .unwrap();
        assert_eq!(errors.get("code").unwrap(), ["code must start with AB."]);
    }

    #[tokio::test]
    async fn test_check_raises_validation_error() {
        let result = Validator::new()
            .check(&data(json!({})), &[("name", "required")], &[])
            .await;
        let err = assert_err!(result);
        assert!(err.is_validation());
    }

    #[test]
    fn test_rule_parsing() {
        assert_eq!(
            Rule::parse_list("required|min:3|unique:users,email").unwrap(),
            vec![
                Rule::Required,
                Rule::Min(3),
                Rule::Unique {
                    table: "users".to_string(),
                    column: "email".to_string()
                }
            ]
        );
        assert!(matches!(Rule::parse("min:x"), Err(Error::InvalidRule { .. })));
        assert!(Rule::parse("unique:users").is_err());
        assert!(Rule::parse("unique:users;--,email").is_err());
        assert_eq!(Rule::Max(5).to_string(), "max:5");
    }

    #[test]
    fn test_errors_serialize_as_map() {
        let mut errors = ValidationErrors::new();
        errors.add("email", "email is required.");
        errors.add("email", "email must be a valid email address.");
        assert_eq!(
            errors.to_json(),
            json!({"email": ["email is required.", "email must be a valid email address."]})
        );
    }
}
