//! Untyped trainer option maps.

use serde_json::Value;
use std::collections::BTreeMap;

/// Trainer options keyed by name.
///
/// A `BTreeMap` keeps iteration sorted by key, so anything derived from a map
/// (option strings, cache keys) is byte-identical for identical content no
/// matter the insertion order.
pub type ConfigMap = BTreeMap<String, Value>;

/// Render a value the way it should appear on a command line.
///
/// Strings are emitted verbatim without JSON quoting; everything else uses
/// its JSON display form.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Whether a value switches a value-less flag on.
///
/// Only `false` and `null` turn a flag off.
pub fn is_enabled(value: &Value) -> bool {
    !matches!(value, Value::Bool(false) | Value::Null)
}
