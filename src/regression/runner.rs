//! The comparison loop.
//!
//! For every argument set, for every test case: bailout checks, one oracle
//! extraction, then each SUT in declared order, each pairing ending in exactly
//! one [`Outcome`]. Driver and comparator failures become outcomes; only a
//! failing argument-set generator stops the run.

#![allow(missing_docs)]

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;

use crate::compare::diff::value_diff;
use crate::compare::{Comparator, ComparatorFailure};
use crate::core::config::HarnessConfig;
use crate::core::errors::{HarnessError, Result};
use crate::driver::instance::guarded;
use crate::driver::{DriverData, DriverFailure, DriverInstance, DriverSettings, DriverType};
use crate::hacks::{Case, Rule};
use crate::logger::{EventSink, EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};
use crate::params::{ArgumentSet, ArgumentSetGenerator};
use crate::regression::TestCase;
use crate::regression::throttle::Throttle;
use crate::tracker::{Outcome, OutcomeDetail, OutcomeStatus, ResultTracker, error_id};

type OnNext = Box<dyn FnMut(&ArgumentSet, Option<&ArgumentSet>)>;

/// The generator failed; the run stopped. `partial` holds everything
/// recorded up to that point, with the abort noted.
#[derive(Debug, Error)]
#[error("run aborted after {} argsets: {error}", .partial.argsets_done())]
pub struct RunAborted {
    #[source]
    pub error: HarnessError,
    pub partial: Box<ResultTracker>,
}

/// Everything that shapes a run besides the generator and the test cases.
pub struct RunOptions {
    /// Flat `"Driver.setting"` map; see [`DriverSettings::scoped`].
    pub settings: BTreeMap<String, Value>,
    pub apply_hacks: Vec<Rule>,
    pub cleanup: Vec<Rule>,
    pub catch_panics: bool,
    pub default_timeout: Option<Duration>,
    /// Per-driver deadlines, overriding the driver type's own.
    pub driver_timeouts: BTreeMap<String, Duration>,
    pub throttle: Option<Throttle>,
    on_next: Option<OnNext>,
    sink: Option<Box<dyn EventSink>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            settings: BTreeMap::new(),
            apply_hacks: Vec::new(),
            cleanup: Vec::new(),
            catch_panics: true,
            default_timeout: None,
            driver_timeouts: BTreeMap::new(),
            throttle: None,
            on_next: None,
            sink: None,
        }
    }
}

impl fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunOptions")
            .field("settings", &self.settings)
            .field("apply_hacks", &self.apply_hacks.len())
            .field("cleanup", &self.cleanup.len())
            .field("catch_panics", &self.catch_panics)
            .field("default_timeout", &self.default_timeout)
            .field("driver_timeouts", &self.driver_timeouts)
            .field("throttle", &self.throttle)
            .field("on_next", &self.on_next.is_some())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

impl RunOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Options from a loaded config: settings, rules, timeouts, throttle and
    /// the JSONL log.
    pub fn from_config(cfg: &HarnessConfig) -> Result<Self> {
        let throttle = cfg
            .run
            .throttle_max_load
            .map(|max| Throttle::new(max, Duration::from_millis(cfg.run.throttle_frame_ms)))
            .transpose()?;
        let sink = cfg.log.jsonl_path.as_ref().map(|path| {
            let writer = JsonlWriter::open(JsonlConfig {
                fallback_path: cfg.log.fallback_path.clone(),
                max_size_bytes: cfg.log.max_size_bytes,
                ..JsonlConfig::new(path.clone())
            });
            Box::new(writer) as Box<dyn EventSink>
        });
        Ok(Self {
            settings: cfg.flat_driver_settings(),
            apply_hacks: cfg.rules.apply_hacks.clone(),
            cleanup: cfg.rules.cleanup.clone(),
            catch_panics: cfg.run.catch_panics,
            default_timeout: cfg.run.default_timeout_ms.map(Duration::from_millis),
            driver_timeouts: cfg.driver_timeouts(),
            throttle,
            on_next: None,
            sink,
        })
    }

    #[must_use]
    pub fn with_settings(mut self, settings: BTreeMap<String, Value>) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_apply_hacks(mut self, rules: Vec<Rule>) -> Self {
        self.apply_hacks = rules;
        self
    }

    #[must_use]
    pub fn with_cleanup(mut self, rules: Vec<Rule>) -> Self {
        self.cleanup = rules;
        self
    }

    #[must_use]
    pub fn catch_panics(mut self, enabled: bool) -> Self {
        self.catch_panics = enabled;
        self
    }

    #[must_use]
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn driver_timeout(mut self, driver: impl Into<String>, timeout: Duration) -> Self {
        self.driver_timeouts.insert(driver.into(), timeout);
        self
    }

    #[must_use]
    pub fn throttle(mut self, throttle: Throttle) -> Self {
        self.throttle = Some(throttle);
        self
    }

    /// Called after each argument set is pulled, with the previous one.
    #[must_use]
    pub fn on_next<F>(mut self, hook: F) -> Self
    where
        F: FnMut(&ArgumentSet, Option<&ArgumentSet>) + 'static,
    {
        self.on_next = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    fn timeout_for(&self, driver_type: &DriverType) -> Option<Duration> {
        self.driver_timeouts
            .get(driver_type.name())
            .copied()
            .or_else(|| driver_type.timeout())
            .or(self.default_timeout)
    }
}

/// Runs test cases over a generator with a fixed set of options.
#[derive(Debug)]
pub struct RegressionRunner {
    options: RunOptions,
    settings_cache: BTreeMap<String, DriverSettings>,
}

/// Position of the pairing being evaluated.
struct Slot<'a> {
    index: u64,
    argset: &'a ArgumentSet,
    test_case: usize,
}

impl Slot<'_> {
    fn outcome(&self, oracle: &str, sut: &str, status: OutcomeStatus) -> Outcome {
        Outcome::new(
            self.index,
            self.argset.clone(),
            self.test_case,
            oracle,
            sut,
            status,
        )
    }

    fn log(&self, event: EventType, severity: Severity, oracle: &str, sut: Option<&str>) -> LogEntry {
        let mut entry = LogEntry::new(event, severity);
        entry.argset_index = Some(self.index);
        entry.argset = Some(self.argset.to_value());
        entry.test_case = Some(self.test_case);
        entry.oracle = Some(oracle.to_string());
        entry.sut = sut.map(str::to_string);
        entry
    }
}

impl RegressionRunner {
    #[must_use]
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            settings_cache: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Evaluate every test case on every argument set.
    ///
    /// Produces N·M·K outcomes for N argument sets, M test cases and K SUT
    /// types per case. Fails only if the generator fails.
    pub fn run(
        &mut self,
        generator: &ArgumentSetGenerator,
        test_cases: &[TestCase],
    ) -> std::result::Result<ResultTracker, RunAborted> {
        let mut tracker = ResultTracker::new();
        let mut start = LogEntry::new(EventType::RunStart, Severity::Info);
        start.details = Some(format!(
            "test_cases={} argsets={}",
            test_cases.len(),
            generator
                .len_hint()
                .map_or_else(|| "unknown".to_string(), |n| n.to_string())
        ));
        self.emit(&start);

        let mut previous: Option<ArgumentSet> = None;
        for (index, item) in (0u64..).zip(generator.iter()) {
            let argset = match item {
                Ok(argset) => argset,
                Err(error) => return Err(self.abort(tracker, error)),
            };

            if let Some(throttle) = self.options.throttle.as_mut() {
                tracker.record_throttle(throttle.wait());
            }
            if let Some(hook) = self.options.on_next.as_mut() {
                let started = Instant::now();
                hook(&argset, previous.as_ref());
                tracker.record_on_next(started.elapsed());
            }

            for (test_case, case) in test_cases.iter().enumerate() {
                let slot = Slot {
                    index,
                    argset: &argset,
                    test_case,
                };
                self.run_test_case(&mut tracker, &slot, case);
            }
            tracker.argset_done();
            previous = Some(argset);
        }

        tracker.finish();
        let mut done = LogEntry::new(EventType::RunComplete, Severity::Info);
        done.duration_ms = Some(u64::try_from(tracker.duration().as_millis()).unwrap_or(u64::MAX));
        done.stats = serde_json::to_value(tracker.stats()).ok();
        self.emit(&done);
        self.flush();
        Ok(tracker)
    }

    fn abort(&mut self, mut tracker: ResultTracker, error: HarnessError) -> RunAborted {
        tracker.record_abort(&error);
        tracker.finish();
        let mut entry = LogEntry::new(EventType::RunAborted, Severity::Error);
        entry.error_kind = Some(error.code().to_string());
        entry.error_message = Some(error.to_string());
        entry.stats = serde_json::to_value(tracker.stats()).ok();
        self.emit(&entry);
        self.flush();
        RunAborted {
            error,
            partial: Box::new(tracker),
        }
    }

    fn run_test_case(&mut self, tracker: &mut ResultTracker, slot: &Slot<'_>, case: &TestCase) {
        let oracle_type = case.oracle();
        let oname = oracle_type.name();

        if let Some(bailout) = oracle_type.check_values(slot.argset) {
            tracker.record_bailout(oname);
            for sut_type in case.suts() {
                tracker.record(
                    slot.outcome(oname, sut_type.name(), OutcomeStatus::Skipped)
                        .with_detail(OutcomeDetail::Bailout {
                            driver: oname.to_string(),
                            bailout: bailout.name().to_string(),
                        }),
                );
            }
            return;
        }

        let sut_bailouts: Vec<Option<String>> = case
            .suts()
            .iter()
            .map(|sut| sut.check_values(slot.argset).map(|b| b.name().to_string()))
            .collect();
        let oracle = if sut_bailouts.iter().all(Option::is_some) {
            None
        } else {
            Some(self.extract(tracker, slot, oracle_type))
        };
        if let Some((Err(failure), _)) = &oracle {
            let mut entry = slot.log(EventType::OracleError, Severity::Error, oname, None);
            entry.error_kind = Some(failure.kind().to_string());
            entry.error_message = Some(failure.to_string());
            self.emit(&entry);
        }

        for (sut_type, bailout) in case.suts().iter().zip(sut_bailouts) {
            let rname = sut_type.name();
            if let Some(bailout) = bailout {
                tracker.record_bailout(rname);
                tracker.record(
                    slot.outcome(oname, rname, OutcomeStatus::Skipped)
                        .with_detail(OutcomeDetail::Bailout {
                            driver: rname.to_string(),
                            bailout,
                        }),
                );
                continue;
            }
            let Some((oracle_result, oracle_elapsed)) = &oracle else {
                continue;
            };
            let oracle_data = match oracle_result {
                Ok(data) => data,
                Err(failure) => {
                    tracker.record(
                        slot.outcome(oname, rname, OutcomeStatus::OracleExtractionError)
                            .with_detail(OutcomeDetail::Driver {
                                driver: oname.to_string(),
                                failure: failure.clone(),
                            })
                            .with_timing(*oracle_elapsed, None),
                    );
                    continue;
                }
            };

            let (sut_result, sut_elapsed) = self.extract(tracker, slot, sut_type);
            let outcome = match sut_result {
                Err(failure) => {
                    let mut entry = slot.log(EventType::SutError, Severity::Error, oname, Some(rname));
                    entry.error_kind = Some(failure.kind().to_string());
                    entry.error_message = Some(failure.to_string());
                    self.emit(&entry);
                    slot.outcome(oname, rname, OutcomeStatus::SutExtractionError)
                        .with_detail(OutcomeDetail::Driver {
                            driver: rname.to_string(),
                            failure,
                        })
                }
                Ok(sut_data) => {
                    self.compare(tracker, slot, case.comparator(), oracle_data, &sut_data, oname, rname)
                }
            };
            tracker.record(outcome.with_timing(*oracle_elapsed, sut_elapsed));
        }
    }

    fn extract(
        &mut self,
        tracker: &mut ResultTracker,
        slot: &Slot<'_>,
        driver_type: &DriverType,
    ) -> (std::result::Result<DriverData, DriverFailure>, Option<Duration>) {
        let settings = self
            .settings_cache
            .entry(driver_type.name().to_string())
            .or_insert_with(|| DriverSettings::scoped(&self.options.settings, driver_type.name()))
            .clone();
        let mut instance: DriverInstance = driver_type
            .instantiate(slot.argset.clone(), settings)
            .catch_panics(self.options.catch_panics)
            .timeout(self.options.timeout_for(driver_type));
        let result = instance.extract().cloned().map_err(Clone::clone);
        tracker.record_extraction(
            driver_type.name(),
            slot.index,
            slot.argset,
            instance.elapsed(),
            instance.overhead(),
            result.is_err(),
        );
        (result, instance.elapsed())
    }

    #[allow(clippy::too_many_arguments)]
    fn compare(
        &mut self,
        tracker: &mut ResultTracker,
        slot: &Slot<'_>,
        comparator: &dyn Comparator,
        oracle: &DriverData,
        sut: &DriverData,
        oname: &str,
        rname: &str,
    ) -> Outcome {
        let mut case = Case::new(slot.argset, oracle, sut, oname, rname);
        let hacked = match case.apply(&self.options.apply_hacks) {
            Ok(matched) => matched,
            Err(err) => {
                return self.comparator_error(slot, comparator, oname, rname, ComparatorFailure::failed(err));
            }
        };
        tracker.record_hacks(oname, rname, u64::from(hacked));

        let verdict = self.call_comparator(comparator, &case);
        let verdict = match verdict {
            Ok(false) if !comparator.is_strict_equality() && !self.options.cleanup.is_empty() => {
                match case.apply(&self.options.cleanup) {
                    Err(err) => Err(ComparatorFailure::failed(err)),
                    Ok(_) => match self.call_comparator(comparator, &case) {
                        Ok(true) => Err(ComparatorFailure::CleanupChangedVerdict),
                        other => other,
                    },
                }
            }
            other => other,
        };

        match verdict {
            Ok(true) => slot.outcome(oname, rname, OutcomeStatus::Pass),
            Err(failure) => self.comparator_error(slot, comparator, oname, rname, failure),
            Ok(false) => {
                let (oracle, sut) = (case.oracle(), case.result());
                let diff = value_diff(
                    &case.as_value()["oracle"],
                    &case.as_value()["result"],
                    oname,
                    rname,
                );
                let mut entry = slot.log(EventType::Mismatch, Severity::Warning, oname, Some(rname));
                entry.eid = Some(error_id(&diff));
                entry.details = Some(diff.clone());
                self.emit(&entry);
                slot.outcome(oname, rname, OutcomeStatus::Mismatch)
                    .with_detail(OutcomeDetail::Mismatch { oracle, sut, diff })
            }
        }
    }

    fn call_comparator(
        &self,
        comparator: &dyn Comparator,
        case: &Case,
    ) -> std::result::Result<bool, ComparatorFailure> {
        let (oracle, sut) = (case.oracle(), case.result());
        guarded(self.options.catch_panics, comparator_panicked, || {
            comparator.compare(&oracle, &sut)
        })
    }

    fn comparator_error(
        &mut self,
        slot: &Slot<'_>,
        comparator: &dyn Comparator,
        oname: &str,
        rname: &str,
        failure: ComparatorFailure,
    ) -> Outcome {
        let mut entry = slot.log(EventType::ComparatorError, Severity::Error, oname, Some(rname));
        entry.error_message = Some(failure.to_string());
        entry.details = Some(comparator.name().to_string());
        self.emit(&entry);
        slot.outcome(oname, rname, OutcomeStatus::ComparatorError)
            .with_detail(OutcomeDetail::Comparator {
                comparator: comparator.name().to_string(),
                failure,
            })
    }

    fn emit(&mut self, entry: &LogEntry) {
        if let Some(sink) = self.options.sink.as_mut() {
            sink.emit(entry);
        }
    }

    fn flush(&mut self) {
        if let Some(sink) = self.options.sink.as_mut() {
            sink.flush();
        }
    }
}

fn comparator_panicked(message: String) -> ComparatorFailure {
    ComparatorFailure::Panicked { message }
}
