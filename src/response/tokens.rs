//! Deterministic token estimation.
//!
//! Offline approximation used to size responses against the caller's
//! budget: roughly one token per 3.5 characters, plus a small structural
//! overhead per JSON container and key. Monotone in input size, and it
//! errs on the side of over-estimating.

use serde_json::Value;

/// Characters per token.
const CHARS_PER_TOKEN: f64 = 3.5;
/// Flat cost of a JSON container (`{}` / `[]`).
const CONTAINER_OVERHEAD: usize = 2;
/// Flat cost per object key beyond the key text itself.
const FIELD_OVERHEAD: usize = 1;

/// Estimate tokens for a string: `max(1, ceil(len / 3.5))`.
pub fn estimate_str(s: &str) -> usize {
    ((s.len() as f64) / CHARS_PER_TOKEN).ceil().max(1.0) as usize
}

/// Estimate tokens for an arbitrary JSON value.
pub fn estimate_value(value: &Value) -> usize {
    match value {
        Value::Null | Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(s) => estimate_str(s),
        Value::Array(items) => {
            CONTAINER_OVERHEAD + items.iter().map(estimate_value).sum::<usize>()
        }
        Value::Object(map) => {
            CONTAINER_OVERHEAD
                + map
                    .iter()
                    .map(|(k, v)| estimate_str(k) + FIELD_OVERHEAD + estimate_value(v))
                    .sum::<usize>()
        }
    }
}

/// Estimate tokens for any serializable object.
pub fn estimate<T: serde::Serialize>(value: &T) -> usize {
    match serde_json::to_value(value) {
        Ok(v) => estimate_value(&v),
        Err(_) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_estimate_matches_formula() {
        assert_eq!(estimate_str(""), 1);
        assert_eq!(estimate_str("abc"), 1);
        assert_eq!(estimate_str("abcd"), 2);
        assert_eq!(estimate_str(&"x".repeat(35)), 10);
    }

    #[test]
    fn estimate_is_monotone_in_string_length() {
        let mut last = 0;
        for n in 0..200 {
            let e = estimate_str(&"y".repeat(n));
            assert!(e >= last);
            last = e;
        }
    }

    #[test]
    fn objects_cost_more_than_their_parts() {
        let inner = json!({"path": "src/main.rs", "line": 42});
        let outer = json!({"hit": inner.clone()});
        assert!(estimate_value(&outer) > estimate_value(&inner));
    }

    #[test]
    fn arrays_sum_their_items() {
        let one = json!([{"a": "xxxx"}]);
        let two = json!([{"a": "xxxx"}, {"a": "xxxx"}]);
        assert!(estimate_value(&two) > estimate_value(&one));
    }
}
