//! Parameter spec and restartable value sources.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::core::errors::{HarnessError, Result};
use crate::params::generator::ArgumentSets;

/// Iterator over one pass of a value source. Errors are plain messages; the
/// generator attaches the parameter name.
pub type ValueIter<'a> = Box<dyn Iterator<Item = std::result::Result<Value, String>> + 'a>;

type ProducerFn = dyn Fn() -> ValueIter<'static> + Send + Sync;

/// A restartable producer of candidate values for one parameter.
///
/// Every call to [`ValueSource::values`] starts a fresh pass from the first
/// value, so enumeration can restart without caching anything.
#[derive(Clone)]
pub enum ValueSource {
    /// A fixed list of values.
    Values(Vec<Value>),
    /// A constant; same as a one-element list.
    Scalar(Value),
    /// Half-open integer range `start..end` advancing by `step`.
    IntRange { start: i64, end: i64, step: i64 },
    /// A sub-space; each value is a JSON object for one nested point.
    Nested(ParameterSpec),
    /// Caller-supplied factory, called once per pass. May be unbounded.
    Producer {
        factory: Arc<ProducerFn>,
        len: Option<u64>,
    },
}

impl ValueSource {
    /// Fixed list from anything convertible to JSON values.
    pub fn values<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Self::Values(values.into_iter().map(Into::into).collect())
    }

    pub fn scalar(value: impl Into<Value>) -> Self {
        Self::Scalar(value.into())
    }

    /// `start..end` with step 1.
    #[must_use]
    pub const fn range(start: i64, end: i64) -> Self {
        Self::IntRange {
            start,
            end,
            step: 1,
        }
    }

    #[must_use]
    pub const fn range_step(start: i64, end: i64, step: i64) -> Self {
        Self::IntRange { start, end, step }
    }

    #[must_use]
    pub fn nested(spec: ParameterSpec) -> Self {
        Self::Nested(spec)
    }

    /// Source backed by a factory producing a fresh iterator per pass.
    pub fn producer<F, I>(factory: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Iterator<Item = std::result::Result<Value, String>> + 'static,
    {
        Self::Producer {
            factory: Arc::new(move || Box::new(factory()) as ValueIter<'static>),
            len: None,
        }
    }

    /// Like [`ValueSource::producer`], with a known number of values per pass.
    pub fn producer_with_len<F, I>(len: u64, factory: F) -> Self
    where
        F: Fn() -> I + Send + Sync + 'static,
        I: Iterator<Item = std::result::Result<Value, String>> + 'static,
    {
        let mut source = Self::producer(factory);
        if let Self::Producer { len: slot, .. } = &mut source {
            *slot = Some(len);
        }
        source
    }

    /// Start a fresh pass over the values.
    #[must_use]
    pub fn values_iter(&self) -> ValueIter<'_> {
        match self {
            Self::Values(values) => Box::new(values.iter().cloned().map(Ok)),
            Self::Scalar(value) => Box::new(std::iter::once(Ok(value.clone()))),
            Self::IntRange { start, end, step } => Box::new(IntRangeIter {
                next: *start,
                end: *end,
                step: *step,
            }),
            Self::Nested(spec) => Box::new(
                ArgumentSets::new(spec).map(|item| {
                    item.map(|args| args.to_value())
                        .map_err(|err| err.to_string())
                }),
            ),
            Self::Producer { factory, .. } => factory(),
        }
    }

    /// Exact number of values per pass, when known.
    #[must_use]
    pub fn len_hint(&self) -> Option<u64> {
        match self {
            Self::Values(values) => Some(values.len() as u64),
            Self::Scalar(_) => Some(1),
            Self::IntRange { start, end, step } => Some(range_len(*start, *end, *step)),
            Self::Nested(spec) => spec.len_hint(),
            Self::Producer { len, .. } => *len,
        }
    }

    fn validate(&self, name: &str) -> Result<()> {
        match self {
            Self::IntRange { step: 0, .. } => Err(HarnessError::invalid_spec(format!(
                "range for `{name}` has zero step"
            ))),
            Self::Nested(spec) => spec.validate(),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for ValueSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Values(values) => f.debug_tuple("Values").field(values).finish(),
            Self::Scalar(value) => f.debug_tuple("Scalar").field(value).finish(),
            Self::IntRange { start, end, step } => f
                .debug_struct("IntRange")
                .field("start", start)
                .field("end", end)
                .field("step", step)
                .finish(),
            Self::Nested(spec) => f.debug_tuple("Nested").field(spec).finish(),
            Self::Producer { len, .. } => f.debug_struct("Producer").field("len", len).finish(),
        }
    }
}

struct IntRangeIter {
    next: i64,
    end: i64,
    step: i64,
}

impl Iterator for IntRangeIter {
    type Item = std::result::Result<Value, String>;

    fn next(&mut self) -> Option<Self::Item> {
        let in_range = if self.step > 0 {
            self.next < self.end
        } else {
            self.next > self.end
        };
        if !in_range || self.step == 0 {
            return None;
        }
        let current = self.next;
        match current.checked_add(self.step) {
            Some(next) => self.next = next,
            None => self.next = self.end,
        }
        Some(Ok(Value::from(current)))
    }
}

#[allow(clippy::cast_sign_loss)]
fn range_len(start: i64, end: i64, step: i64) -> u64 {
    let span = i128::from(end) - i128::from(start);
    let step = i128::from(step);
    if step == 0 || span == 0 || (span > 0) != (step > 0) {
        return 0;
    }
    let (span, step) = (span.abs(), step.abs());
    ((span + step - 1) / step) as u64
}

/// Ordered declaration of the parameter space: name → value source.
#[derive(Debug, Clone, Default)]
pub struct ParameterSpec {
    params: Vec<(String, ValueSource)>,
}

impl ParameterSpec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ParameterSpec::push`]; duplicates are reported when
    /// the generator validates the whole parameter list.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, source: ValueSource) -> Self {
        self.params.push((name.into(), source));
        self
    }

    /// Declare a parameter, rejecting empty and duplicate names.
    pub fn push(&mut self, name: impl Into<String>, source: ValueSource) -> Result<()> {
        let name = name.into();
        if name.is_empty() {
            return Err(HarnessError::invalid_spec("parameter name must not be empty"));
        }
        if self.contains(&name) {
            return Err(HarnessError::invalid_spec(format!(
                "duplicate parameter `{name}`"
            )));
        }
        self.params.push((name, source));
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.params.iter().any(|(key, _)| key == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.iter().map(|(key, _)| key.as_str())
    }

    pub(crate) fn entries(&self) -> &[(String, ValueSource)] {
        &self.params
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Exact number of argument sets, when every source knows its length.
    #[must_use]
    pub fn len_hint(&self) -> Option<u64> {
        self.params
            .iter()
            .try_fold(1_u64, |acc, (_, source)| {
                source.len_hint().map(|len| acc.saturating_mul(len))
            })
    }

    /// Check names and sources, recursing into nested specs.
    pub fn validate(&self) -> Result<()> {
        for (idx, (name, source)) in self.params.iter().enumerate() {
            if name.is_empty() {
                return Err(HarnessError::invalid_spec("parameter name must not be empty"));
            }
            if self.params[..idx].iter().any(|(earlier, _)| earlier == name) {
                return Err(HarnessError::invalid_spec(format!(
                    "duplicate parameter `{name}`"
                )));
            }
            source.validate(name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collect(source: &ValueSource) -> Vec<Value> {
        source.values_iter().map(|v| v.unwrap()).collect()
    }

    #[test]
    fn ranges_honor_step_and_direction() {
        assert_eq!(collect(&ValueSource::range(0, 3)), vec![json!(0), json!(1), json!(2)]);
        assert_eq!(
            collect(&ValueSource::range_step(10, 0, -4)),
            vec![json!(10), json!(6), json!(2)]
        );
        assert!(collect(&ValueSource::range(5, 5)).is_empty());
        assert!(collect(&ValueSource::range(5, 1)).is_empty());
    }

    #[test]
    fn range_len_matches_iteration() {
        for (start, end, step) in [(0, 10, 3), (10, 0, -3), (0, 0, 1), (-5, 5, 2), (3, 1, 1)] {
            let source = ValueSource::range_step(start, end, step);
            assert_eq!(
                source.len_hint(),
                Some(collect(&source).len() as u64),
                "{start}..{end} by {step}"
            );
        }
    }

    #[test]
    fn range_near_bounds_does_not_overflow() {
        let source = ValueSource::range_step(i64::MAX - 2, i64::MAX, 5);
        assert_eq!(collect(&source), vec![json!(i64::MAX - 2)]);
    }

    #[test]
    fn producer_restarts_each_pass() {
        let source = ValueSource::producer(|| (1..=3).map(|n| Ok(json!(n))));
        assert_eq!(collect(&source), collect(&source));
        assert_eq!(source.len_hint(), None);
        let sized = ValueSource::producer_with_len(3, || (1..=3).map(|n| Ok(json!(n))));
        assert_eq!(sized.len_hint(), Some(3));
    }

    #[test]
    fn push_rejects_duplicates_and_empty_names() {
        let mut spec = ParameterSpec::new();
        spec.push("a", ValueSource::values([1, 2])).unwrap();
        let err = spec.push("a", ValueSource::values([3])).unwrap_err();
        assert!(err.to_string().contains("duplicate parameter `a`"));
        assert!(spec.push("", ValueSource::scalar(1)).is_err());
    }

    #[test]
    fn validate_catches_builder_duplicates_and_zero_step() {
        let dup = ParameterSpec::new()
            .with("a", ValueSource::scalar(1))
            .with("a", ValueSource::scalar(2));
        assert_eq!(dup.validate().unwrap_err().code(), "DFH-1001");

        let nested_bad = ParameterSpec::new().with(
            "size",
            ValueSource::nested(
                ParameterSpec::new().with("w", ValueSource::range_step(0, 4, 0)),
            ),
        );
        assert!(nested_bad.validate().is_err());
    }

    #[test]
    fn len_hint_is_product_or_unknown() {
        let spec = ParameterSpec::new()
            .with("a", ValueSource::values([1, 2, 3]))
            .with("b", ValueSource::range(0, 4))
            .with("c", ValueSource::scalar("x"));
        assert_eq!(spec.len_hint(), Some(12));
        let open = spec.with("d", ValueSource::producer(|| std::iter::repeat(Ok(json!(0)))));
        assert_eq!(open.len_hint(), None);
        assert_eq!(ParameterSpec::new().len_hint(), Some(1));
    }
}
