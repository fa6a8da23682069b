//! Top-level state diff between a node's `state_in` and `state_out`.
//! Deliberately shallow: only top-level object keys are compared, nested
//! values compare by structural equality after numeric canonicalization.

use serde_json::{Map, Value};

/// Canonicalize a JSON value for equality comparison: numbers compare via
/// their `f64` projection so `1` and `1.0` are equal, matching the numeric
/// tower of the Python trace producers this format originated from.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(na), Value::Number(nb)) => {
            match (na.as_f64(), nb.as_f64()) {
                (Some(fa), Some(fb)) => fa == fb,
                _ => na == nb,
            }
        }
        _ => a == b,
    }
}

/// Compute `{added, removed, modified}` over the top-level keys of two JSON
/// objects. Non-object inputs are treated as empty objects (nothing to
/// diff against).
pub fn compute_state_diff(state_in: &Value, state_out: &Value) -> Value {
    let empty = Map::new();
    let before = state_in.as_object().unwrap_or(&empty);
    let after = state_out.as_object().unwrap_or(&empty);

    let mut added = Map::new();
    let mut removed = Map::new();
    let mut modified = Map::new();

    for (key, after_val) in after {
        match before.get(key) {
            None => {
                added.insert(key.clone(), after_val.clone());
            }
            Some(before_val) => {
                if !values_equal(before_val, after_val) {
                    modified.insert(
                        key.clone(),
                        serde_json::json!({ "before": before_val, "after": after_val }),
                    );
                }
            }
        }
    }

    for (key, before_val) in before {
        if !after.contains_key(key) {
            removed.insert(key.clone(), before_val.clone());
        }
    }

    serde_json::json!({
        "added": Value::Object(added),
        "removed": Value::Object(removed),
        "modified": Value::Object(modified),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn diff_reports_added_removed_and_modified_keys() {
        let state_in = json!({"a": 1, "b": 2});
        let state_out = json!({"b": 3, "c": 4});
        let diff = compute_state_diff(&state_in, &state_out);
        assert_eq!(
            diff,
            json!({
                "added": {"c": 4},
                "removed": {"a": 1},
                "modified": {"b": {"before": 2, "after": 3}},
            })
        );
    }

    #[test]
    fn numeric_canonicalization_treats_int_and_float_as_equal() {
        let state_in = json!({"x": 1});
        let state_out = json!({"x": 1.0});
        let diff = compute_state_diff(&state_in, &state_out);
        assert_eq!(diff, json!({"added": {}, "removed": {}, "modified": {}}));
    }

    #[test]
    fn no_diff_when_states_identical() {
        let state = json!({"a": 1, "b": "x"});
        let diff = compute_state_diff(&state, &state);
        assert_eq!(diff, json!({"added": {}, "removed": {}, "modified": {}}));
    }

    #[test]
    fn non_object_states_diff_as_empty() {
        let diff = compute_state_diff(&json!("not an object"), &json!(null));
        assert_eq!(diff, json!({"added": {}, "removed": {}, "modified": {}}));
    }
}
