//! Translate generic trainer options into cache-generation flags.
//!
//! A cache built by the trainer is only reusable by later training runs
//! that agree on a handful of structural options (contextual-bandit mode,
//! hash bit precision). Only those survive here; everything else is dropped.

use fw_types::{is_enabled, render_value, ConfigMap};
use serde_json::Value;

/// Keys that influence the layout of a cache file.
pub const CACHE_OPTION_KEYS: &[&str] = &[
    "b",
    "bit_precision",
    "cb",
    "cb_adf",
    "cb_explore",
    "cb_explore_adf",
];

/// Encode the cache-relevant subset of `config` as a trainer option string.
///
/// Output follows the map's sorted key order, so equal maps always encode to
/// byte-identical strings. A map with no recognized keys encodes to `""`.
pub fn encode_cache_options(config: &ConfigMap) -> String {
    config
        .iter()
        .fold(Vec::new(), |mut tokens, (key, value)| {
            if let Some(flag) = flag_for(key, value) {
                tokens.push(flag);
            }
            tokens
        })
        .join(" ")
}

fn flag_for(key: &str, value: &Value) -> Option<String> {
    match key {
        "cb" => valued("--cb", value),
        "cb_adf" => switch("--cb_adf", value),
        "cb_explore" => valued("--cb_explore", value),
        "cb_explore_adf" => switch("--cb_explore_adf", value),
        "b" => valued("-b", value),
        "bit_precision" => valued("--bit_precision", value),
        _ => None,
    }
}

fn valued(flag: &str, value: &Value) -> Option<String> {
    if value.is_null() {
        return None;
    }
    Some(format!("{flag} {}", render_value(value)))
}

fn switch(flag: &str, value: &Value) -> Option<String> {
    is_enabled(value).then(|| flag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(entries: &[(&str, Value)]) -> ConfigMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn bit_precision_kept_unknown_dropped() {
        let encoded = encode_cache_options(&config(&[
            ("b", json!(22)),
            ("unused_key", json!("x")),
        ]));
        assert_eq!(encoded, "-b 22");
        assert!(!encoded.contains("unused_key"));
        assert!(!encoded.contains('x'));
    }

    #[test]
    fn every_recognized_key_maps_to_its_flag() {
        let encoded = encode_cache_options(&config(&[
            ("cb", json!(4)),
            ("cb_adf", json!(true)),
            ("cb_explore", json!(4)),
            ("cb_explore_adf", json!(true)),
            ("b", json!(18)),
            ("bit_precision", json!(24)),
        ]));
        assert_eq!(
            encoded,
            "-b 18 --bit_precision 24 --cb 4 --cb_adf --cb_explore 4 --cb_explore_adf"
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let a = config(&[("cb", json!(2)), ("b", json!(20)), ("passes", json!(3))]);
        let b = config(&[("passes", json!(3)), ("b", json!(20)), ("cb", json!(2))]);
        assert_eq!(encode_cache_options(&a), encode_cache_options(&b));
        assert_eq!(encode_cache_options(&a), "-b 20 --cb 2");
    }

    #[test]
    fn no_recognized_keys_is_empty() {
        assert_eq!(encode_cache_options(&ConfigMap::new()), "");
        assert_eq!(
            encode_cache_options(&config(&[("learning_rate", json!(0.5))])),
            ""
        );
    }

    #[test]
    fn disabled_switches_and_null_values_are_skipped() {
        let encoded = encode_cache_options(&config(&[
            ("cb_adf", json!(false)),
            ("cb", Value::Null),
            ("cb_explore_adf", json!(true)),
        ]));
        assert_eq!(encoded, "--cb_explore_adf");
    }

    #[test]
    fn string_values_are_not_quoted() {
        let encoded = encode_cache_options(&config(&[("b", json!("16"))]));
        assert_eq!(encoded, "-b 16");
    }
}
