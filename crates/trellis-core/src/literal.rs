//! Attribute literal parsing.
//!
//! Declarative configuration arrives as attribute strings
//! (`data-tooltip-delay="250"`). This module turns those raw strings into
//! structured [`Value`]s with a total, DOM-independent function so the
//! parsing rules can be tested in isolation.
//!
//! Parsing rules:
//!
//! - An empty value (`data-tooltip-sticky=""`, or a bare attribute) means
//!   the author asserted presence: the result is `true`.
//! - Anything that parses as a JSON literal (`5`, `true`, `[1,2]`,
//!   `{"a":1}`, `"quoted"`) yields the typed value.
//! - Everything else falls back to the raw string. This is the one place a
//!   parse failure is swallowed rather than surfaced.

use heck::ToLowerCamelCase;
use serde_json::Value;

/// Parse a raw attribute string into a structured value.
///
/// Total over all inputs; never fails.
///
/// # Example
///
/// ```
/// use trellis_core::literal::parse_literal;
/// use serde_json::{json, Value};
///
/// assert_eq!(parse_literal("5"), json!(5));
/// assert_eq!(parse_literal("true"), json!(true));
/// assert_eq!(parse_literal("[1,2]"), json!([1, 2]));
/// assert_eq!(parse_literal("abc"), json!("abc"));
/// assert_eq!(parse_literal(""), json!(true));
/// ```
pub fn parse_literal(raw: &str) -> Value {
    if raw.is_empty() {
        return Value::Bool(true);
    }
    match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(_) => Value::String(raw.to_owned()),
    }
}

/// Convert a kebab-case attribute suffix into a lowerCamelCase option key.
///
/// `"show-delay"` becomes `"showDelay"`; a single word passes through.
pub fn option_key(suffix: &str) -> String {
    suffix.to_lower_camel_case()
}
