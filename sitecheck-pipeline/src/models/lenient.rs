//! Forgiving field decoders for reasoning-service replies
//!
//! A reply object is kept even when individual fields carry `null`, a number
//! where text was expected, or a quoted number. A field that cannot be read
//! at all falls back to its empty value instead of failing the whole reply.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn scalar_text(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Text, with `null` and non-scalar values read as empty
pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(scalar_text(Value::deserialize(deserializer)?).unwrap_or_default())
}

/// Optional text; numbers are kept as their decimal form
pub fn opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(scalar_text(Value::deserialize(deserializer)?))
}

/// List of text; a lone scalar becomes a one-item list, unreadable items are skipped
pub fn string_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().filter_map(scalar_text).collect(),
        other => scalar_text(other).into_iter().collect(),
    })
}

/// Number, also accepted as a quoted string
pub fn opt_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .filter(|n: &f64| n.is_finite()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct Fields {
        #[serde(deserialize_with = "string")]
        text: String,
        #[serde(deserialize_with = "opt_string")]
        maybe: Option<String>,
        #[serde(deserialize_with = "string_list")]
        list: Vec<String>,
        #[serde(deserialize_with = "opt_f64")]
        number: Option<f64>,
    }

    fn parse(json: &str) -> Fields {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_nulls_read_as_empty() {
        let parsed = parse(r#"{"text": null, "maybe": null, "list": null, "number": null}"#);
        assert_eq!(parsed.text, "");
        assert_eq!(parsed.maybe, None);
        assert!(parsed.list.is_empty());
        assert_eq!(parsed.number, None);
    }

    #[test]
    fn test_numbers_read_as_text() {
        let parsed = parse(r#"{"text": 12, "maybe": 3, "list": [1, "w2", null, {"x": 1}]}"#);
        assert_eq!(parsed.text, "12");
        assert_eq!(parsed.maybe.as_deref(), Some("3"));
        assert_eq!(parsed.list, vec!["1", "w2"]);
    }

    #[test]
    fn test_quoted_number_and_lone_scalar() {
        let parsed = parse(r#"{"number": " 3.5 ", "list": "w1"}"#);
        assert_eq!(parsed.number, Some(3.5));
        assert_eq!(parsed.list, vec!["w1"]);
        assert_eq!(parse(r#"{"number": "soon"}"#).number, None);
        assert_eq!(parse("{}").text, "");
    }
}
