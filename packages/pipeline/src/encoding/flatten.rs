// packages/pipeline/src/encoding/flatten.rs
//! Flat key/value encoding of nested parameter maps
//!
//! Nested maps are spread into `parent[child]` keys, lists into
//! `parent[index]`, object references are replaced by their rendered text.
//! The encoded form is the hstore literal `"k" => "v","k2" => "v2"`.

use crate::model::params::{ParamMap, ParamValue};

/// Flatten a map into `(key, value)` pairs in encounter order.
///
/// A container value never produces a pair of its own, only its leaves do.
pub fn flatten(map: &ParamMap) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(map.len());
    for (key, value) in map.iter() {
        flatten_into(key.to_string(), value, &mut pairs);
    }
    pairs
}

fn flatten_into(key: String, value: &ParamValue, pairs: &mut Vec<(String, String)>) {
    match value {
        ParamValue::Map(nested) => {
            for (nested_key, nested_value) in nested.iter() {
                flatten_into(format!("{}[{}]", key, nested_key), nested_value, pairs);
            }
        }
        ParamValue::List(items) => {
            for (index, item) in items.iter().enumerate() {
                flatten_into(format!("{}[{}]", key, index), item, pairs);
            }
        }
        scalar => {
            // Scalars and objects always have text
            let text = scalar.scalar_text().unwrap_or_default();
            pairs.push((key, text));
        }
    }
}

/// Encode a map as an hstore literal. An empty map encodes as `""`.
pub fn encode(map: &ParamMap) -> String {
    flatten(map)
        .iter()
        .map(|(key, value)| format!("\"{}\" => \"{}\"", escape(key), escape(value)))
        .collect::<Vec<_>>()
        .join(",")
}

/// Encode any value; anything that is not a map encodes as `""`.
pub fn encode_value(value: &ParamValue) -> String {
    match value.as_map() {
        Some(map) => encode(map),
        None => String::new(),
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
