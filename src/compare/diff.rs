//! Path-oriented, human-readable diff of two data snapshots.
//!
//! Both sides are flattened into `path: leaf` lines (JSON-pointer paths,
//! object keys sorted, arrays by index). Only differing lines are printed,
//! grouped per side:
//!
//! ```text
//! aaa ~/PyCalc
//! a   /result: 4.0
//! bbb ~/CliCalc
//! b   /result: -2.0
//! ```
//!
//! The output carries no timestamps or other volatile text, so it doubles as
//! the grouping key for distinct errors.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde_json::Value;

use crate::driver::DriverData;

/// Diff two driver snapshots.
#[must_use]
pub fn structural_diff(
    oracle: &DriverData,
    sut: &DriverData,
    oracle_name: &str,
    sut_name: &str,
) -> String {
    let oracle = Value::Object(oracle.clone().into_iter().collect());
    let sut = Value::Object(sut.clone().into_iter().collect());
    value_diff(&oracle, &sut, oracle_name, sut_name)
}

/// Diff two arbitrary JSON values.
#[must_use]
pub fn value_diff(a: &Value, b: &Value, a_name: &str, b_name: &str) -> String {
    let left = flatten(a);
    let right = flatten(b);

    let only_left: Vec<(&String, &String)> = left
        .iter()
        .filter(|(path, leaf)| right.get(*path) != Some(leaf))
        .collect();
    let only_right: Vec<(&String, &String)> = right
        .iter()
        .filter(|(path, leaf)| left.get(*path) != Some(leaf))
        .collect();

    let mut out = String::new();
    let _ = writeln!(out, "aaa ~/{a_name}");
    for (path, leaf) in only_left {
        let _ = writeln!(out, "a   {path}: {leaf}");
    }
    let _ = writeln!(out, "bbb ~/{b_name}");
    for (path, leaf) in only_right {
        let _ = writeln!(out, "b   {path}: {leaf}");
    }
    out.truncate(out.trim_end().len());
    out
}

fn flatten(value: &Value) -> BTreeMap<String, String> {
    let mut lines = BTreeMap::new();
    walk(value, String::new(), &mut lines);
    lines
}

fn walk(value: &Value, path: String, out: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in map {
                walk(child, format!("{path}/{}", escape(key)), out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (idx, child) in items.iter().enumerate() {
                walk(child, format!("{path}/{idx}"), out);
            }
        }
        leaf => {
            let path = if path.is_empty() { "/".to_string() } else { path };
            out.insert(path, leaf.to_string());
        }
    }
}

fn escape(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn only_differing_leaves_are_listed() {
        let a = json!({"w": {"1": 2, "3": 4}, "x": [1, 2, 3], "y": [3, 1, 2]});
        let b = json!({"w": {"1": 2, "3": 4}, "x": [1, 1, 3], "y": [3, 1, 3]});
        assert_eq!(
            value_diff(&a, &b, "A", "B"),
            "aaa ~/A\na   /x/1: 2\na   /y/2: 2\nbbb ~/B\nb   /x/1: 1\nb   /y/2: 3"
        );
    }

    #[test]
    fn missing_fields_show_on_one_side() {
        let oracle = DriverData::from([
            ("result".to_string(), json!(4.0)),
            ("unit".to_string(), json!("m")),
        ]);
        let sut = DriverData::from([("result".to_string(), json!(4.0))]);
        assert_eq!(
            structural_diff(&oracle, &sut, "Py", "Cli"),
            "aaa ~/Py\na   /unit: \"m\"\nbbb ~/Cli"
        );
    }

    #[test]
    fn shape_changes_and_escaping() {
        let a = json!({"a/b": {"c": 1}, "e": []});
        let b = json!({"a/b": 1, "e": {}});
        let diff = value_diff(&a, &b, "A", "B");
        assert!(diff.contains("a   /a~1b/c: 1"), "{diff}");
        assert!(diff.contains("b   /a~1b: 1"), "{diff}");
        assert!(diff.contains("a   /e: []"), "{diff}");
        assert!(diff.contains("b   /e: {}"), "{diff}");
    }

    #[test]
    fn equal_values_have_empty_sides() {
        let v = json!({"result": 1});
        assert_eq!(value_diff(&v, &v, "A", "B"), "aaa ~/A\nbbb ~/B");
    }
}
