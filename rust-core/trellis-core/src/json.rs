//! # JSON and Body Decoding
//!
//! Request bodies are parsed with simd-json; responses are serialized with
//! serde_json. Form-encoded bodies share the query-string decoder.

use crate::error::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

/// Parse JSON bytes to a typed value using simd-json
///
/// simd-json parses in place, so the input is copied once.
pub fn parse_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let mut owned = bytes.to_vec();
    simd_json::serde::from_slice(&mut owned).map_err(|e| Error::MalformedBody {
        reason: format!("JSON parse error: {e}"),
    })
}

/// Serialize a value to JSON string
pub fn to_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?)
}

/// Decode a request body into a parameter map
///
/// - `application/json`: the body must be a JSON object
/// - `application/x-www-form-urlencoded`: pairs become string values
/// - empty bodies and other content types: no parameters
pub fn parse_body(content_type: Option<&str>, body: &[u8]) -> Result<Map<String, Value>> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    let media_type = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();

    match media_type.as_str() {
        "application/json" => match parse_json::<Value>(body)? {
            Value::Object(map) => Ok(map),
            other => Err(Error::MalformedBody {
                reason: format!("expected a JSON object, got {}", kind(&other)),
            }),
        },
        "application/x-www-form-urlencoded" => {
            let text = std::str::from_utf8(body).map_err(|e| Error::MalformedBody {
                reason: e.to_string(),
            })?;
            Ok(parse_query_string(Some(text)))
        }
        _ => Ok(Map::new()),
    }
}

const fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse a query string into string parameters
///
/// Handles URL decoding and duplicate keys (last value wins).
#[must_use]
pub fn parse_query_string(query: Option<&str>) -> Map<String, Value> {
    query
        .map(|q| {
            q.split('&')
                .filter(|pair| !pair.is_empty())
                .filter_map(|pair| {
                    let mut parts = pair.splitn(2, '=');
                    let key = url_decode(parts.next()?);
                    let value = url_decode(parts.next().unwrap_or(""));
                    Some((key, Value::String(value)))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Percent-decoding with `+` as space; invalid escapes are kept verbatim
#[must_use]
pub fn url_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' => {
                let decoded = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = decoded {
                    out.push(byte);
                    i += 2;
                } else {
                    out.push(b'%');
                }
            }
            b => out.push(b),
        }
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_json_object_body() {
        let map = parse_body(Some("application/json; charset=utf-8"), br#"{"name":"Ann","age":3}"#).unwrap();
        assert_eq!(Value::Object(map), json!({"name": "Ann", "age": 3}));
    }

    #[test]
    fn test_parse_json_rejects_non_object() {
        let err = parse_body(Some("application/json"), b"[1,2]").unwrap_err();
        assert!(matches!(err, Error::MalformedBody { .. }));
        assert!(parse_body(Some("application/json"), b"{oops").is_err());
    }

    #[test]
    fn test_parse_form_body() {
        let map = parse_body(
            Some("application/x-www-form-urlencoded"),
            b"name=John+Doe&city=New%20York",
        )
        .unwrap();
        assert_eq!(map["name"], json!("John Doe"));
        assert_eq!(map["city"], json!("New York"));
    }

    #[test]
    fn test_empty_and_unknown_bodies() {
        assert!(parse_body(Some("application/json"), b"  ").unwrap().is_empty());
        assert!(parse_body(Some("text/plain"), b"hello").unwrap().is_empty());
        assert!(parse_body(None, b"{}").unwrap().is_empty());
    }

    #[test]
    fn test_parse_query_string_simple() {
        let result = parse_query_string(Some("page=1&limit=10"));
        assert_eq!(result.get("page"), Some(&json!("1")));
        assert_eq!(result.get("limit"), Some(&json!("10")));
        assert!(parse_query_string(None).is_empty());
    }

    #[test]
    fn test_url_decode() {
        assert_eq!(url_decode("hello+world"), "hello world");
        assert_eq!(url_decode("hello%20world"), "hello world");
        assert_eq!(url_decode("100%25"), "100%");
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("50%"), "50%");
    }

    #[test]
    fn test_to_json() {
        assert_eq!(to_json(&json!({"ok": true})).unwrap(), r#"{"ok":true}"#);
    }
}
