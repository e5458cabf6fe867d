//! Recursive "pattern is a subset of data" matching.

use serde_json::Value;

use crate::core::errors::{HarnessError, Result};

/// Default nesting depth before [`data_match`] gives up.
pub const DEFAULT_MATCH_DEPTH: usize = 10;

/// Check whether `data` matches `pattern`.
///
/// Scalars match by equality. Objects match when every pattern key exists in
/// the data and its value matches. Arrays match when every pattern element
/// matches at least one data element, so `[3, 2]` matches `[1, 2, 3, 4]`.
pub fn data_match(pattern: &Value, data: &Value) -> Result<bool> {
    data_match_with_limit(pattern, data, DEFAULT_MATCH_DEPTH)
}

/// [`data_match`] with an explicit recursion limit.
pub fn data_match_with_limit(pattern: &Value, data: &Value, max_depth: usize) -> Result<bool> {
    match_at(pattern, data, 0, max_depth)
}

fn match_at(pattern: &Value, data: &Value, depth: usize, max_depth: usize) -> Result<bool> {
    if depth >= max_depth {
        return Err(HarnessError::InvalidRule {
            details: format!("pattern nesting exceeds {max_depth} levels"),
        });
    }
    if pattern == data {
        return Ok(true);
    }
    match (pattern, data) {
        (Value::Object(pat), Value::Object(dat)) => {
            for (key, pv) in pat {
                let Some(dv) = dat.get(key) else {
                    return Ok(false);
                };
                if !match_at(pv, dv, depth + 1, max_depth)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Array(pat), Value::Array(dat)) => {
            for pv in pat {
                let mut found = false;
                for dv in dat {
                    if match_at(pv, dv, depth + 1, max_depth)? {
                        found = true;
                        break;
                    }
                }
                if !found {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ok(pattern: Value, data: Value) -> bool {
        data_match(&pattern, &data).unwrap()
    }

    #[test]
    fn scalars() {
        assert!(ok(json!(1), json!(1)));
        assert!(!ok(json!(1), json!(2)));
        assert!(!ok(json!("1"), json!(1)));
    }

    #[test]
    fn dicts() {
        assert!(ok(json!({"a": 1}), json!({"a": 1, "b": 2})));
        assert!(!ok(json!({"a": 1, "c": 3}), json!({"a": 1, "b": 2})));
        assert!(ok(json!({"a": {"b": 1}}), json!({"a": {"b": 1, "c": 2}})));
        assert!(!ok(json!({"a": {"b": 2}}), json!({"a": {"b": 1}})));
    }

    #[test]
    fn lists() {
        assert!(ok(json!([3, 2]), json!([1, 2, 3, 4])));
        assert!(!ok(json!([5]), json!([1, 2, 3, 4])));
        assert!(ok(json!([[1]]), json!([[1, 2], [3]])));
        assert!(ok(json!([{"a": 1}]), json!([{"a": 1, "b": 2}, {"c": 3}])));
        assert!(!ok(json!([{"a": 2}]), json!([{"a": 1, "b": 2}])));
    }

    #[test]
    fn empty_pattern_matches_same_kind() {
        assert!(ok(json!({}), json!({"a": 1})));
        assert!(ok(json!([]), json!([1])));
        assert!(!ok(json!({}), json!([1])));
    }

    #[test]
    fn deep_patterns_hit_the_limit() {
        let mut pattern = json!(1);
        let mut data = json!(2);
        for _ in 0..12 {
            pattern = json!({"k": pattern});
            data = json!({"k": data});
        }
        let err = data_match(&pattern, &data).unwrap_err();
        assert_eq!(err.code(), "DFH-2002");
        assert!(!data_match_with_limit(&pattern, &data, 20).unwrap());
    }
}
