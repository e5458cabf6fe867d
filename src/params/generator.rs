//! Lazy cartesian enumeration of a [`ParameterSpec`].
//!
//! The generator walks the product like an odometer: the last-declared
//! parameter turns fastest, the first-declared slowest. Only the current value
//! of each parameter is held; when an inner source wraps it is restarted from
//! its producer rather than replayed from a cache, so unbounded or very large
//! spaces cost one argument set at a time.

use std::iter::FusedIterator;

use serde_json::Value;

use crate::core::errors::{HarnessError, Result};
use crate::params::argset::ArgumentSet;
use crate::params::source::{ParameterSpec, ValueIter};

/// Restartable source of [`ArgumentSet`]s for a validated spec.
#[derive(Debug, Clone)]
pub struct ArgumentSetGenerator {
    spec: ParameterSpec,
}

impl ArgumentSetGenerator {
    /// Validate `spec` and wrap it.
    pub fn new(spec: ParameterSpec) -> Result<Self> {
        spec.validate()?;
        Ok(Self { spec })
    }

    #[must_use]
    pub fn spec(&self) -> &ParameterSpec {
        &self.spec
    }

    /// Start a fresh pass. Each pass re-reads every source from the start.
    #[must_use]
    pub fn iter(&self) -> ArgumentSets<'_> {
        ArgumentSets::new(&self.spec)
    }

    /// Exact number of argument sets per pass, when known.
    #[must_use]
    pub fn len_hint(&self) -> Option<u64> {
        self.spec.len_hint()
    }
}

impl<'a> IntoIterator for &'a ArgumentSetGenerator {
    type Item = Result<ArgumentSet>;
    type IntoIter = ArgumentSets<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassState {
    Fresh,
    Running,
    Done,
}

/// One pass over the product. Fused after exhaustion or the first error.
pub struct ArgumentSets<'a> {
    spec: &'a ParameterSpec,
    cursors: Vec<ValueIter<'a>>,
    current: Vec<Value>,
    state: PassState,
}

impl<'a> ArgumentSets<'a> {
    pub(crate) fn new(spec: &'a ParameterSpec) -> Self {
        Self {
            spec,
            cursors: Vec::with_capacity(spec.len()),
            current: Vec::with_capacity(spec.len()),
            state: PassState::Fresh,
        }
    }

    fn source_error(&self, idx: usize, details: String) -> HarnessError {
        HarnessError::ValueSource {
            parameter: self.spec.entries()[idx].0.clone(),
            details,
        }
    }

    fn snapshot(&self) -> ArgumentSet {
        ArgumentSet::from_entries(
            self.spec
                .entries()
                .iter()
                .zip(&self.current)
                .map(|((name, _), value)| (name.clone(), value.clone()))
                .collect(),
        )
    }

    /// Open every source and take its first value.
    fn start(&mut self) -> Option<Result<ArgumentSet>> {
        let spec = self.spec;
        for (idx, (_, source)) in spec.entries().iter().enumerate() {
            let mut cursor = source.values_iter();
            match cursor.next() {
                Some(Ok(value)) => {
                    self.cursors.push(cursor);
                    self.current.push(value);
                }
                Some(Err(details)) => return self.fail(idx, details),
                None => {
                    self.state = PassState::Done;
                    return None;
                }
            }
        }
        self.state = PassState::Running;
        Some(Ok(self.snapshot()))
    }

    /// Turn the odometer by one position.
    fn advance(&mut self) -> Option<Result<ArgumentSet>> {
        for idx in (0..self.cursors.len()).rev() {
            match self.cursors[idx].next() {
                Some(Ok(value)) => {
                    self.current[idx] = value;
                    for inner in idx + 1..self.cursors.len() {
                        if let Err(err) = self.restart(inner) {
                            self.state = PassState::Done;
                            return Some(Err(err));
                        }
                    }
                    return Some(Ok(self.snapshot()));
                }
                Some(Err(details)) => return self.fail(idx, details),
                None => {}
            }
        }
        self.state = PassState::Done;
        None
    }

    fn restart(&mut self, idx: usize) -> Result<()> {
        let spec = self.spec;
        let mut cursor = spec.entries()[idx].1.values_iter();
        match cursor.next() {
            Some(Ok(value)) => {
                self.current[idx] = value;
                self.cursors[idx] = cursor;
                Ok(())
            }
            Some(Err(details)) => Err(self.source_error(idx, details)),
            None => Err(self.source_error(
                idx,
                "source produced no values when restarted".to_string(),
            )),
        }
    }

    fn fail(&mut self, idx: usize, details: String) -> Option<Result<ArgumentSet>> {
        self.state = PassState::Done;
        Some(Err(self.source_error(idx, details)))
    }
}

impl Iterator for ArgumentSets<'_> {
    type Item = Result<ArgumentSet>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.state {
            PassState::Fresh => self.start(),
            PassState::Running => self.advance(),
            PassState::Done => None,
        }
    }
}

impl FusedIterator for ArgumentSets<'_> {}
