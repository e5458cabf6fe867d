//! Case documents and the rules that rewrite them before comparison.

#![allow(missing_docs)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::errors::{HarnessError, Result};
use crate::driver::DriverData;
use crate::hacks::matching::data_match;
use crate::hacks::path::DataPath;
use crate::params::ArgumentSet;

/// One oracle/SUT pairing for one argument set, as a JSON document:
///
/// ```text
/// { "argset": {..}, "oracle": {..}, "result": {..}, "oname": "..", "rname": ".." }
/// ```
///
/// Rules address it with paths such as `/oracle/temperature` or
/// `/result/stats/word_count`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Case {
    doc: Value,
}

impl Case {
    #[must_use]
    pub fn new(
        argset: &ArgumentSet,
        oracle: &DriverData,
        result: &DriverData,
        oname: &str,
        rname: &str,
    ) -> Self {
        let mut doc = Map::new();
        doc.insert("argset".to_string(), argset.to_value());
        doc.insert("oracle".to_string(), data_to_value(oracle));
        doc.insert("result".to_string(), data_to_value(result));
        doc.insert("oname".to_string(), Value::String(oname.to_string()));
        doc.insert("rname".to_string(), Value::String(rname.to_string()));
        Self {
            doc: Value::Object(doc),
        }
    }

    #[must_use]
    pub fn as_value(&self) -> &Value {
        &self.doc
    }

    /// Oracle data as it stands after rewriting.
    #[must_use]
    pub fn oracle(&self) -> DriverData {
        value_to_data(self.doc.get("oracle"))
    }

    /// SUT data as it stands after rewriting.
    #[must_use]
    pub fn result(&self) -> DriverData {
        value_to_data(self.doc.get("result"))
    }

    pub fn get(&self, path: &str) -> Result<&Value> {
        DataPath::parse(path)?.get(&self.doc)
    }

    pub fn set(&mut self, path: &str, value: Value) -> Result<()> {
        DataPath::parse(path)?.set(&mut self.doc, value)
    }

    pub fn delete(&mut self, path: &str) -> Result<Value> {
        DataPath::parse(path)?.delete(&mut self.doc)
    }

    #[must_use]
    pub fn exists(&self, path: &str) -> bool {
        DataPath::parse(path).is_ok_and(|p| p.exists(&self.doc))
    }

    /// Apply every rule whose patterns match, in order. Returns whether any
    /// rule matched.
    pub fn apply(&mut self, rules: &[Rule]) -> Result<bool> {
        let mut matched = false;
        for rule in rules {
            if rule.matches(self)? {
                matched = true;
                for action in &rule.actions {
                    action.apply(self);
                }
            }
        }
        Ok(matched)
    }
}

fn data_to_value(data: &DriverData) -> Value {
    Value::Object(data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

fn value_to_data(value: Option<&Value>) -> DriverData {
    match value {
        Some(Value::Object(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        _ => DriverData::new(),
    }
}

/// Conditional rewrite of a [`Case`].
///
/// `drivers` and `argsets` are lists of patterns matched against the whole
/// case document with [`data_match`]; a list matches if any of its patterns
/// does, and an absent list always matches.
///
/// ```toml
/// [[rules.apply_hacks]]
/// drivers = [{ rname = "CliCalc" }]
/// argsets = [{ argset = { op = "div" } }]
/// actions = [{ round = { ndigits = 3, paths = ["/oracle/result", "/result/result"] } }]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Rule {
    pub drivers: Option<Vec<Value>>,
    pub argsets: Option<Vec<Value>>,
    pub actions: Vec<Action>,
}

impl Rule {
    #[must_use]
    pub fn new(actions: Vec<Action>) -> Self {
        Self {
            drivers: None,
            argsets: None,
            actions,
        }
    }

    #[must_use]
    pub fn for_drivers(mut self, patterns: Vec<Value>) -> Self {
        self.drivers = Some(patterns);
        self
    }

    #[must_use]
    pub fn for_argsets(mut self, patterns: Vec<Value>) -> Self {
        self.argsets = Some(patterns);
        self
    }

    pub fn matches(&self, case: &Case) -> Result<bool> {
        Ok(any_match(self.drivers.as_deref(), case)? && any_match(self.argsets.as_deref(), case)?)
    }

    /// Check action parameters and paths up front.
    pub fn validate(&self) -> Result<()> {
        for action in &self.actions {
            action.validate()?;
        }
        Ok(())
    }
}

fn any_match(patterns: Option<&[Value]>, case: &Case) -> Result<bool> {
    let Some(patterns) = patterns else {
        return Ok(true);
    };
    for pattern in patterns {
        if data_match(pattern, case.as_value())? {
            return Ok(true);
        }
    }
    Ok(false)
}

/// A single rewrite. Paths that do not resolve are skipped silently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Delete the values at these paths.
    Remove(Vec<String>),
    /// Where the value equals `from`, replace it with `to`.
    Exchange {
        from: Value,
        to: Value,
        paths: Vec<String>,
    },
    /// Round numbers to `ndigits` decimal places (negative rounds to tens,
    /// hundreds, ...).
    Round { ndigits: i32, paths: Vec<String> },
    /// Replace numbers with their decimal string at fixed precision.
    FormatFloat { precision: usize, paths: Vec<String> },
    /// For each pair of object paths, a key present in one object with a
    /// `null` value and missing from the other is added to the other as
    /// `null`.
    EvenUp(Vec<(String, String)>),
}

impl Action {
    fn paths(&self) -> Vec<&str> {
        match self {
            Self::Remove(paths)
            | Self::Exchange { paths, .. }
            | Self::Round { paths, .. }
            | Self::FormatFloat { paths, .. } => paths.iter().map(String::as_str).collect(),
            Self::EvenUp(pairs) => pairs
                .iter()
                .flat_map(|(a, b)| [a.as_str(), b.as_str()])
                .collect(),
        }
    }

    fn validate(&self) -> Result<()> {
        for raw in self.paths() {
            DataPath::parse(raw).map_err(|_| HarnessError::InvalidRule {
                details: format!("path {raw:?} must start with '/'"),
            })?;
        }
        if let Self::Round { ndigits, .. } = self {
            if ndigits.unsigned_abs() > 15 {
                return Err(HarnessError::InvalidRule {
                    details: format!("round ndigits {ndigits} outside -15..=15"),
                });
            }
        }
        Ok(())
    }

    pub fn apply(&self, case: &mut Case) {
        match self {
            Self::Remove(paths) => {
                for raw in paths {
                    let _ = case.delete(raw);
                }
            }
            Self::Exchange { from, to, paths } => {
                for raw in paths {
                    if case.get(raw).is_ok_and(|cur| cur == from) {
                        let _ = case.set(raw, to.clone());
                    }
                }
            }
            Self::Round { ndigits, paths } => {
                for raw in paths {
                    let rounded = case.get(raw).ok().and_then(|v| round_value(v, *ndigits));
                    if let Some(rounded) = rounded {
                        let _ = case.set(raw, rounded);
                    }
                }
            }
            Self::FormatFloat { precision, paths } => {
                let precision = *precision;
                for raw in paths {
                    let formatted = case
                        .get(raw)
                        .ok()
                        .and_then(Value::as_f64)
                        .map(|f| Value::String(format!("{f:.precision$}")));
                    if let Some(formatted) = formatted {
                        let _ = case.set(raw, formatted);
                    }
                }
            }
            Self::EvenUp(pairs) => {
                for (a, b) in pairs {
                    even_up(case, a, b);
                }
            }
        }
    }
}

fn round_value(value: &Value, ndigits: i32) -> Option<Value> {
    if ndigits >= 0 && (value.is_i64() || value.is_u64()) {
        return Some(value.clone());
    }
    let f = value.as_f64()?;
    let scale = 10f64.powi(ndigits.abs());
    let rounded = if ndigits >= 0 {
        (f * scale).round() / scale
    } else {
        (f / scale).round() * scale
    };
    serde_json::Number::from_f64(rounded).map(Value::Number)
}

fn even_up(case: &mut Case, a: &str, b: &str) {
    let (Ok(Value::Object(left)), Ok(Value::Object(right))) = (case.get(a), case.get(b)) else {
        return;
    };
    let to_right: Vec<String> = left
        .iter()
        .filter(|(k, v)| v.is_null() && !right.contains_key(*k))
        .map(|(k, _)| k.clone())
        .collect();
    let to_left: Vec<String> = right
        .iter()
        .filter(|(k, v)| v.is_null() && !left.contains_key(*k))
        .map(|(k, _)| k.clone())
        .collect();
    for key in to_right {
        let _ = case.set(&child_path(b, &key), Value::Null);
    }
    for key in to_left {
        let _ = case.set(&child_path(a, &key), Value::Null);
    }
}

fn child_path(parent: &str, key: &str) -> String {
    format!(
        "{}/{}",
        parent.trim_end_matches('/'),
        key.replace('~', "~0").replace('/', "~1")
    )
}
