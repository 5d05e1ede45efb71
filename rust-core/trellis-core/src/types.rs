//! # Capture Coercion
//!
//! Path captures arrive as text. Handler parameters declared as primitives
//! consume captures in order and are coerced through [`FromCapture`].

use crate::error::{Error, Result};

/// A primitive that can be built from one path capture
pub trait FromCapture: Sized + Send + 'static {
    /// Type name used in error messages
    const TYPE_NAME: &'static str;

    /// Convert the raw capture
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidParameter` if the text does not parse.
    fn from_capture(raw: &str) -> Result<Self>;
}

fn invalid(raw: &str, expected: &'static str) -> Error {
    Error::InvalidParameter {
        value: raw.to_string(),
        expected,
    }
}

impl FromCapture for String {
    const TYPE_NAME: &'static str = "string";

    fn from_capture(raw: &str) -> Result<Self> {
        Ok(raw.to_string())
    }
}

macro_rules! numeric_capture {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(
            impl FromCapture for $ty {
                const TYPE_NAME: &'static str = $name;

                fn from_capture(raw: &str) -> Result<Self> {
                    raw.parse::<$ty>().map_err(|_| invalid(raw, Self::TYPE_NAME))
                }
            }
        )*
    };
}

numeric_capture! {
    i64 => "int",
    i32 => "int",
    u64 => "unsigned int",
    u32 => "unsigned int",
    usize => "unsigned int",
    f64 => "float",
    f32 => "float",
}

impl FromCapture for bool {
    const TYPE_NAME: &'static str = "bool";

    fn from_capture(raw: &str) -> Result<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" => Ok(false),
            _ => Err(invalid(raw, Self::TYPE_NAME)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_passthrough() {
        assert_eq!(String::from_capture("hello").unwrap(), "hello");
    }

    #[test]
    fn test_integer_capture() {
        assert_eq!(i64::from_capture("42").unwrap(), 42);
        assert_eq!(i32::from_capture("-7").unwrap(), -7);
        assert!(u32::from_capture("-7").is_err());
    }

    #[test]
    fn test_integer_capture_rejects_text() {
        let err = i64::from_capture("abc").unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidParameter { ref value, expected: "int" } if value == "abc"
        ));
    }

    #[test]
    fn test_float_capture() {
        let v = f64::from_capture("3.5").unwrap();
        assert!((v - 3.5).abs() < f64::EPSILON);
        assert!(f64::from_capture("x").is_err());
    }

    #[test]
    fn test_bool_capture() {
        assert!(bool::from_capture("true").unwrap());
        assert!(bool::from_capture("YES").unwrap());
        assert!(!bool::from_capture("0").unwrap());
        assert!(bool::from_capture("maybe").is_err());
    }
}
