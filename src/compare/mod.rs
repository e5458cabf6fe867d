//! Comparators: decide whether SUT data matches oracle data.

#![allow(missing_docs)]

pub mod diff;

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use crate::driver::DriverData;

pub use diff::structural_diff;

/// Comparator failure. Recorded as a `ComparatorError` outcome, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ComparatorFailure {
    #[error("comparator failed: {message}")]
    Failed { message: String },

    #[error("comparator panicked: {message}")]
    Panicked { message: String },

    #[error("cleanup rules turned a mismatch into a match")]
    CleanupChangedVerdict,
}

impl ComparatorFailure {
    pub fn failed(message: impl fmt::Display) -> Self {
        Self::Failed {
            message: message.to_string(),
        }
    }
}

/// Decides whether two data snapshots agree.
pub trait Comparator: Send + Sync {
    fn name(&self) -> &str;

    fn compare(&self, oracle: &DriverData, sut: &DriverData) -> Result<bool, ComparatorFailure>;

    /// Plain structural equality. Cleanup rules are only worth running for
    /// comparators that are not.
    fn is_strict_equality(&self) -> bool {
        false
    }
}

/// Structural equality of the whole snapshot.
#[derive(Debug, Clone, Copy, Default)]
pub struct Equality;

impl Comparator for Equality {
    fn name(&self) -> &'static str {
        "equality"
    }

    fn compare(&self, oracle: &DriverData, sut: &DriverData) -> Result<bool, ComparatorFailure> {
        Ok(oracle == sut)
    }

    fn is_strict_equality(&self) -> bool {
        true
    }
}

/// Numbers agree within `abs + rel * max(|a|, |b|)`; everything else must be
/// structurally equal. Applies recursively through arrays and objects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NumericTolerance {
    pub abs: f64,
    pub rel: f64,
}

impl NumericTolerance {
    #[must_use]
    pub const fn new(abs: f64, rel: f64) -> Self {
        Self { abs, rel }
    }

    fn values_match(&self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => {
                    let scale = x.abs().max(y.abs());
                    (x - y).abs() <= self.rel.mul_add(scale, self.abs)
                }
                _ => x == y,
            },
            (Value::Array(xs), Value::Array(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| self.values_match(x, y))
            }
            (Value::Object(xs), Value::Object(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .all(|(k, x)| ys.get(k).is_some_and(|y| self.values_match(x, y)))
            }
            _ => a == b,
        }
    }
}

impl Comparator for NumericTolerance {
    fn name(&self) -> &'static str {
        "numeric_tolerance"
    }

    fn compare(&self, oracle: &DriverData, sut: &DriverData) -> Result<bool, ComparatorFailure> {
        if self.abs < 0.0 || self.rel < 0.0 || self.abs.is_nan() || self.rel.is_nan() {
            return Err(ComparatorFailure::failed(format!(
                "tolerance must be non-negative, got abs={} rel={}",
                self.abs, self.rel
            )));
        }
        Ok(oracle.len() == sut.len()
            && oracle
                .iter()
                .all(|(k, x)| sut.get(k).is_some_and(|y| self.values_match(x, y))))
    }
}

type CompareFn = dyn Fn(&DriverData, &DriverData) -> Result<bool, String> + Send + Sync;

/// Comparator from a closure.
#[derive(Clone)]
pub struct FnComparator {
    name: String,
    compare: Arc<CompareFn>,
}

impl FnComparator {
    pub fn new<F>(name: impl Into<String>, compare: F) -> Self
    where
        F: Fn(&DriverData, &DriverData) -> Result<bool, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            compare: Arc::new(compare),
        }
    }
}

impl fmt::Debug for FnComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComparator")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Comparator for FnComparator {
    fn name(&self) -> &str {
        &self.name
    }

    fn compare(&self, oracle: &DriverData, sut: &DriverData) -> Result<bool, ComparatorFailure> {
        (self.compare)(oracle, sut).map_err(ComparatorFailure::failed)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn data(pairs: &[(&str, Value)]) -> DriverData {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn equality_is_structural() {
        let a = data(&[("result", json!(4.0)), ("unit", json!("m"))]);
        let b = data(&[("unit", json!("m")), ("result", json!(4.0))]);
        let c = data(&[("result", json!(4.5)), ("unit", json!("m"))]);
        assert!(Equality.compare(&a, &b).unwrap());
        assert!(!Equality.compare(&a, &c).unwrap());
        assert!(Equality.is_strict_equality());
    }

    #[test]
    fn tolerance_accepts_small_float_drift() {
        let tol = NumericTolerance::new(1e-9, 1e-6);
        let a = data(&[("result", json!(0.3)), ("parts", json!([0.1, 0.2]))]);
        let b = data(&[
            ("result", json!(0.1 + 0.2)),
            ("parts", json!([0.1, 0.200_000_000_01])),
        ]);
        assert!(tol.compare(&a, &b).unwrap());
        let far = data(&[("result", json!(0.31)), ("parts", json!([0.1, 0.2]))]);
        assert!(!tol.compare(&a, &far).unwrap());
        assert!(!tol.is_strict_equality());
    }

    #[test]
    fn tolerance_requires_same_fields() {
        let tol = NumericTolerance::new(1.0, 0.0);
        let a = data(&[("result", json!(1))]);
        let b = data(&[("result", json!(1)), ("extra", json!(null))]);
        assert!(!tol.compare(&a, &b).unwrap());
    }

    #[test]
    fn negative_tolerance_is_a_comparator_error() {
        let tol = NumericTolerance::new(-1.0, 0.0);
        assert!(tol.compare(&DriverData::new(), &DriverData::new()).is_err());
    }

    #[test]
    fn closure_comparator_maps_errors() {
        let cmp = FnComparator::new("result_only", |o, s| {
            let o = o.get("result").ok_or("oracle has no result")?;
            Ok(Some(o) == s.get("result"))
        });
        assert_eq!(cmp.name(), "result_only");
        let good = data(&[("result", json!(1))]);
        assert!(cmp.compare(&good, &good).unwrap());
        let err = cmp.compare(&DriverData::new(), &good).unwrap_err();
        assert_eq!(err, ComparatorFailure::failed("oracle has no result"));
    }
}
