//! Attribute values and the partial-state maps exchanged with the shadow.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Attribute gating telemetry upload (`0`, `1` or [`CLEAR_SHADOW`]).
pub const UPLOAD_ENABLE: &str = "upload_enable";

/// Attribute reporting whether the machine adapters are reachable.
pub const ADAPTERS_CONNECTED: &str = "adapters_connected";

/// Written value that clears the attribute locally.
pub const NONE_SENTINEL: &str = "none";

/// `upload_enable` value that requests a full shadow document clear.
pub const CLEAR_SHADOW: &str = "clear_shadow";

/// Attributes tracked by a device when nothing else is configured.
pub const DEFAULT_ATTRIBUTES: [&str; 2] = [ADAPTERS_CONNECTED, UPLOAD_ENABLE];

/// A partial or full attribute state.
///
/// `None` means the attribute is absent (serialized as JSON `null`).
pub type StateMap = BTreeMap<String, Option<AttributeValue>>;

/// A single shadow attribute value.
///
/// Scalars are the common case. Structured JSON is carried through opaquely:
/// it is stored and compared as a whole, never merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean value.
    Bool(bool),
    /// Integer value.
    Integer(i64),
    /// Floating point value.
    Float(f64),
    /// String value.
    Text(String),
    /// Any other JSON value.
    Structured(serde_json::Value),
}

impl AttributeValue {
    /// Returns the integer value, if this is an integer.
    ///
    /// A float with no fractional part also counts: JSON writers commonly
    /// send `1.0` for `1`.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            AttributeValue::Integer(i) => Some(*i),
            AttributeValue::Float(f)
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
            {
                Some(*f as i64)
            }
            _ => None,
        }
    }

    /// Returns the string value, if this is a string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true if this is the [`NONE_SENTINEL`] string.
    pub fn is_none_sentinel(&self) -> bool {
        self.as_text() == Some(NONE_SENTINEL)
    }

    /// Returns true if this is the [`CLEAR_SHADOW`] string.
    pub fn is_clear_shadow(&self) -> bool {
        self.as_text() == Some(CLEAR_SHADOW)
    }

    /// Parses a command-line style literal (`1`, `true`, `2.5`, `text`).
    pub fn parse_literal(input: &str) -> Self {
        if let Ok(b) = input.parse::<bool>() {
            return AttributeValue::Bool(b);
        }
        if let Ok(i) = input.parse::<i64>() {
            return AttributeValue::Integer(i);
        }
        if let Ok(f) = input.parse::<f64>() {
            return AttributeValue::Float(f);
        }
        AttributeValue::Text(input.to_string())
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Bool(b) => write!(f, "{b}"),
            AttributeValue::Integer(i) => write!(f, "{i}"),
            AttributeValue::Float(x) => write!(f, "{x}"),
            AttributeValue::Text(s) => write!(f, "{s}"),
            AttributeValue::Structured(v) => write!(f, "{v}"),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Integer(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

/// Maps a written value to what is stored locally.
///
/// The [`NONE_SENTINEL`] string lets the remote side clear a field.
pub fn translate_sentinel(value: Option<AttributeValue>) -> Option<AttributeValue> {
    match value {
        Some(v) if v.is_none_sentinel() => None,
        other => other,
    }
}

/// Returns a state with every given attribute absent.
pub fn default_state<I, S>(attributes: I) -> StateMap
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    attributes.into_iter().map(|k| (k.into(), None)).collect()
}

/// Builds a state map from `(key, value)` pairs.
pub fn state_from<I, K>(pairs: I) -> StateMap
where
    I: IntoIterator<Item = (K, Option<AttributeValue>)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_floats_read_as_integers() {
        let state: StateMap = serde_json::from_str(r#"{"upload_enable": 1.0}"#).unwrap();
        let value = state[UPLOAD_ENABLE].clone().unwrap();

        assert_eq!(value, AttributeValue::Float(1.0));
        assert_eq!(value.as_integer(), Some(1));
        assert_eq!(AttributeValue::Float(1.5).as_integer(), None);
        assert_eq!(AttributeValue::Float(f64::NAN).as_integer(), None);
        assert_eq!(AttributeValue::Float(f64::INFINITY).as_integer(), None);
        assert_eq!(AttributeValue::Text("1".into()).as_integer(), None);
    }

    #[test]
    fn untagged_values_round_trip_through_json() {
        let state: StateMap =
            serde_json::from_str(r#"{"a": 1, "b": "x", "c": null, "d": true, "e": {"k": 1}}"#)
                .unwrap();

        assert_eq!(state["a"], Some(AttributeValue::Integer(1)));
        assert_eq!(state["b"], Some(AttributeValue::Text("x".into())));
        assert_eq!(state["c"], None);
        assert_eq!(state["d"], Some(AttributeValue::Bool(true)));
        assert!(matches!(state["e"], Some(AttributeValue::Structured(_))));

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains(r#""c":null"#));
    }

    #[test]
    fn none_sentinel_becomes_absent() {
        assert_eq!(translate_sentinel(Some("none".into())), None);
        assert_eq!(
            translate_sentinel(Some("clear_shadow".into())),
            Some(AttributeValue::Text(CLEAR_SHADOW.into()))
        );
        assert_eq!(translate_sentinel(Some(1i64.into())), Some(AttributeValue::Integer(1)));
    }

    #[test]
    fn literal_parsing() {
        assert_eq!(AttributeValue::parse_literal("1"), AttributeValue::Integer(1));
        assert_eq!(AttributeValue::parse_literal("false"), AttributeValue::Bool(false));
        assert_eq!(AttributeValue::parse_literal("0.5"), AttributeValue::Float(0.5));
        assert!(AttributeValue::parse_literal("clear_shadow").is_clear_shadow());
    }

    #[test]
    fn default_state_is_all_absent() {
        let state = default_state(DEFAULT_ATTRIBUTES);
        assert_eq!(state.len(), 2);
        assert!(state.values().all(Option::is_none));
    }
}
