//! Result tracking: outcomes, aggregates, driver statistics and reports.
//!
//! The tracker is append-only while a run is in progress; every read method
//! takes `&self` and leaves it untouched.

#![allow(missing_docs)]

pub mod outcome;
pub mod report;
pub mod stats;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::core::errors::Result;
use crate::params::ArgumentSet;

pub use outcome::{Outcome, OutcomeDetail, OutcomeStatus};
pub use report::{DistinctError, ReportOptions, error_id};
pub use stats::{DriverCounters, DriverStats, RunStats};

use report::group_errors;
use stats::duration_ms;

/// One timed driver extraction, kept for the slowest-N listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub argset_index: u64,
    pub argset: ArgumentSet,
    pub elapsed: Duration,
}

/// Why a run stopped early.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbortRecord {
    pub after_argsets: u64,
    pub error: String,
}

/// Accumulates outcomes for one run.
#[derive(Debug)]
pub struct ResultTracker {
    outcomes: Vec<Outcome>,
    argsets_done: u64,
    drivers: BTreeMap<String, DriverCounters>,
    extractions: BTreeMap<String, Vec<Extraction>>,
    hacks: u64,
    hacked_cases: u64,
    compared_cases: u64,
    on_next: Duration,
    throttled: Duration,
    started: Instant,
    finished: Option<Duration>,
    abort: Option<AbortRecord>,
}

impl Default for ResultTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultTracker {
    #[must_use]
    pub fn new() -> Self {
        Self {
            outcomes: Vec::new(),
            argsets_done: 0,
            drivers: BTreeMap::new(),
            extractions: BTreeMap::new(),
            hacks: 0,
            hacked_cases: 0,
            compared_cases: 0,
            on_next: Duration::ZERO,
            throttled: Duration::ZERO,
            started: Instant::now(),
            finished: None,
            abort: None,
        }
    }

    // ──────────────────── recording ────────────────────

    pub fn record(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    /// Mark one argument set as fully processed.
    pub fn argset_done(&mut self) {
        self.argsets_done += 1;
    }

    pub fn record_extraction(
        &mut self,
        driver: &str,
        argset_index: u64,
        argset: &ArgumentSet,
        elapsed: Option<Duration>,
        overhead: Option<Duration>,
        failed: bool,
    ) {
        let counters = self.drivers.entry(driver.to_string()).or_default();
        counters.calls += 1;
        counters.duration += elapsed.unwrap_or_default();
        counters.overhead += overhead.unwrap_or_default();
        if failed {
            counters.failures += 1;
        }
        if let Some(elapsed) = elapsed {
            self.extractions
                .entry(driver.to_string())
                .or_default()
                .push(Extraction {
                    argset_index,
                    argset: argset.clone(),
                    elapsed,
                });
        }
    }

    pub fn record_bailout(&mut self, driver: &str) {
        self.drivers.entry(driver.to_string()).or_default().bailouts += 1;
    }

    /// Count rewriting rules matched for one compared case.
    pub fn record_hacks(&mut self, oracle: &str, sut: &str, matched: u64) {
        self.compared_cases += 1;
        if matched == 0 {
            return;
        }
        self.hacks += matched;
        self.hacked_cases += 1;
        self.drivers.entry(oracle.to_string()).or_default().ohacks += matched;
        self.drivers.entry(sut.to_string()).or_default().rhacks += matched;
    }

    pub fn record_on_next(&mut self, spent: Duration) {
        self.on_next += spent;
    }

    pub fn record_throttle(&mut self, spent: Duration) {
        self.throttled += spent;
    }

    pub fn record_abort(&mut self, error: impl ToString) {
        self.abort = Some(AbortRecord {
            after_argsets: self.argsets_done,
            error: error.to_string(),
        });
    }

    /// Freeze the run duration.
    pub fn finish(&mut self) {
        if self.finished.is_none() {
            self.finished = Some(self.started.elapsed());
        }
    }

    // ──────────────────── queries ────────────────────

    #[must_use]
    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    #[must_use]
    pub const fn argsets_done(&self) -> u64 {
        self.argsets_done
    }

    /// True iff some outcome is neither a pass nor skipped.
    #[must_use]
    pub fn errors_found(&self) -> bool {
        self.outcomes.iter().any(Outcome::is_error)
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.outcomes.len() as u64
    }

    #[must_use]
    pub fn passed(&self) -> u64 {
        self.count_where(|s| s == OutcomeStatus::Pass)
    }

    #[must_use]
    pub fn mismatched(&self) -> u64 {
        self.count_where(|s| s == OutcomeStatus::Mismatch)
    }

    /// Extraction and comparator errors.
    #[must_use]
    pub fn errored(&self) -> u64 {
        self.count_where(OutcomeStatus::is_failure)
    }

    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.count_where(|s| s == OutcomeStatus::Skipped)
    }

    #[must_use]
    pub fn count(&self, status: OutcomeStatus) -> u64 {
        self.count_where(|s| s == status)
    }

    fn count_where(&self, pred: impl Fn(OutcomeStatus) -> bool) -> u64 {
        self.outcomes.iter().filter(|o| pred(o.status)).count() as u64
    }

    /// Failing outcomes grouped by error string, in first-seen order.
    #[must_use]
    pub fn distinct_errors(&self) -> Vec<DistinctError<'_>> {
        group_errors(&self.outcomes)
    }

    #[must_use]
    pub fn abort(&self) -> Option<&AbortRecord> {
        self.abort.as_ref()
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_some()
    }

    /// Wall time of the run (so far, if not finished).
    #[must_use]
    pub fn duration(&self) -> Duration {
        self.finished.unwrap_or_else(|| self.started.elapsed())
    }

    /// Up to `n` slowest extractions per driver, slowest first.
    #[must_use]
    pub fn slowest(&self, n: usize) -> BTreeMap<String, Vec<Extraction>> {
        self.extractions
            .iter()
            .map(|(driver, calls)| {
                let mut calls = calls.clone();
                calls.sort_by(|a, b| {
                    b.elapsed
                        .cmp(&a.elapsed)
                        .then(a.argset_index.cmp(&b.argset_index))
                });
                calls.truncate(n);
                (driver.clone(), calls)
            })
            .filter(|(_, calls)| !calls.is_empty())
            .collect()
    }

    #[must_use]
    pub fn stats(&self) -> RunStats {
        let mismatched = self.mismatched();
        let errored = self.errored();
        RunStats {
            argsets: self.argsets_done,
            tests_done: self.total(),
            passed: self.passed(),
            mismatched,
            errored,
            skipped: self.skipped(),
            total_errors: mismatched + errored,
            distinct_errors: self.distinct_errors().len() as u64,
            duration_ms: duration_ms(self.duration()),
            on_next_ms: duration_ms(self.on_next),
            throttled_ms: duration_ms(self.throttled),
            hacks: self.hacks,
            hacked_cases: self.hacked_cases,
            cases_hacked_pct: (self.compared_cases > 0).then(|| {
                let pct = 100.0 * self.hacked_cases as f64 / self.compared_cases as f64;
                (pct * 100.0).round() / 100.0
            }),
            aborted: self.abort.is_some(),
            drivers: self
                .drivers
                .iter()
                .map(|(name, counters)| (name.clone(), counters.summary()))
                .collect(),
        }
    }

    #[must_use]
    pub fn format_report(&self) -> String {
        self.format_report_with(&ReportOptions::default())
    }

    #[must_use]
    pub fn format_report_with(&self, opts: &ReportOptions) -> String {
        report::render(self, opts)
    }

    /// Write `<eid>.jsonl` per distinct error into `dir` (created if needed).
    pub fn write_args_jsonl(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        report::write_args(self, dir.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::driver::{DriverData, DriverFailure};

    fn args(n: i64) -> ArgumentSet {
        [("n", json!(n))].into_iter().collect()
    }

    fn mismatch(n: i64, diff: &str) -> Outcome {
        Outcome::new(n as u64, args(n), 0, "Py", "Cli", OutcomeStatus::Mismatch).with_detail(
            OutcomeDetail::Mismatch {
                oracle: DriverData::from([("r".to_string(), json!(n))]),
                sut: DriverData::from([("r".to_string(), json!(-n))]),
                diff: diff.to_string(),
            },
        )
    }

    fn pass(n: i64) -> Outcome {
        Outcome::new(n as u64, args(n), 0, "Py", "Cli", OutcomeStatus::Pass)
    }

    fn sample() -> ResultTracker {
        let mut t = ResultTracker::new();
        t.record(pass(0));
        t.record(mismatch(1, "diff one"));
        t.record(mismatch(2, "diff two"));
        t.record(mismatch(3, "diff one"));
        t.record(
            Outcome::new(4, args(4), 0, "Py", "Cli", OutcomeStatus::SutExtractionError)
                .with_detail(OutcomeDetail::Driver {
                    driver: "Cli".into(),
                    failure: DriverFailure::TimedOut { limit_ms: 10 },
                }),
        );
        t.record(Outcome::new(5, args(5), 0, "Py", "Cli", OutcomeStatus::Skipped));
        for _ in 0..6 {
            t.argset_done();
        }
        t.finish();
        t
    }

    #[test]
    fn counts() {
        let t = sample();
        assert_eq!(t.total(), 6);
        assert_eq!(t.passed(), 1);
        assert_eq!(t.mismatched(), 3);
        assert_eq!(t.errored(), 1);
        assert_eq!(t.skipped(), 1);
        assert_eq!(t.count(OutcomeStatus::SutExtractionError), 1);
        assert!(t.errors_found());
    }

    #[test]
    fn passes_and_skips_are_not_errors() {
        let mut t = ResultTracker::new();
        t.record(pass(0));
        t.record(Outcome::new(1, args(1), 0, "Py", "Cli", OutcomeStatus::Skipped));
        assert!(!t.errors_found());
        assert!(t.distinct_errors().is_empty());
    }

    #[test]
    fn distinct_errors_group_in_first_seen_order() {
        let t = sample();
        let errors = t.distinct_errors();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].error, "diff one");
        assert_eq!(errors[0].count(), 2);
        assert_eq!(errors[0].outcomes[1].argset, args(3));
        assert_eq!(errors[1].error, "diff two");
        assert_eq!(errors[2].status, OutcomeStatus::SutExtractionError);
        assert_eq!(errors[0].eid, error_id("diff one"));
    }

    #[test]
    fn report_lists_errors_and_truncates() {
        let t = sample();
        let report = t.format_report_with(&ReportOptions {
            max_argsets_shown: 1,
            slowest_n: 0,
            include_stats: false,
        });
        assert!(report.starts_with("Found 4 (3 distinct) errors in 6 tests with 6 argsets"));
        assert!(report.contains(&format!("~~~ ERROR FOUND ({})", error_id("diff one"))));
        assert!(report.contains("--- argsets affected (2)"));
        assert!(report.contains("{n=1}"));
        assert!(!report.contains("{n=3}"));
        assert!(report.contains("[...] not showing 1 cases"));
        assert!(report.contains("oracle: {\"r\":1}"));
    }

    #[test]
    fn first_snapshots_name_their_argset() {
        let mut t = ResultTracker::new();
        t.record(mismatch(2, "same diff"));
        t.record(mismatch(7, "same diff"));
        let report = t.format_report();
        assert!(
            report.contains("argset: {n=2}\noracle: {\"r\":2}\nsut:    {\"r\":-2}"),
            "{report}"
        );
        assert!(!report.contains("argset: {n=7}"));
    }

    #[test]
    fn clashing_error_ids_are_widened() {
        // Both digests start with dd48623.
        let (a, b) = ("error 10570", "error 19973");
        assert_eq!(error_id(a), error_id(b));
        let mut t = ResultTracker::new();
        t.record(mismatch(1, a));
        t.record(mismatch(2, b));
        t.record(mismatch(3, "diff one"));
        let errors = t.distinct_errors();
        assert_eq!(errors.len(), 3);
        assert_eq!(errors[0].eid, "dd486239");
        assert_eq!(errors[1].eid, "dd486236");
        assert_eq!(errors[2].eid, error_id("diff one"));

        let dir = tempfile::tempdir().unwrap();
        let files = t.write_args_jsonl(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(std::fs::read_to_string(&files[0]).unwrap(), "{\"n\":1}\n");
        assert_eq!(std::fs::read_to_string(&files[1]).unwrap(), "{\"n\":2}\n");
    }

    #[test]
    fn report_can_include_stats() {
        let t = sample();
        let report = t.format_report_with(&ReportOptions {
            include_stats: true,
            ..ReportOptions::default()
        });
        assert!(report.contains("--- stats"));
        assert!(report.contains("\"mismatched\": 3"));
    }

    #[test]
    fn slowest_per_driver() {
        let mut t = ResultTracker::new();
        for (i, ms) in [5u64, 50, 20, 1].into_iter().enumerate() {
            let i = i as u64;
            let elapsed = Some(Duration::from_millis(ms));
            t.record_extraction("Py", i, &args(i as i64), elapsed, None, false);
        }
        t.record_extraction("Cli", 0, &args(0), None, None, true);
        let slowest = t.slowest(2);
        assert_eq!(slowest.len(), 1);
        let py = &slowest["Py"];
        assert_eq!(py.len(), 2);
        assert_eq!(py[0].elapsed, Duration::from_millis(50));
        assert_eq!(py[1].argset_index, 2);
    }

    #[test]
    fn stats_aggregate_drivers() {
        let mut t = ResultTracker::new();
        let ms = |n| Some(Duration::from_millis(n));
        t.record_extraction("Py", 0, &args(0), ms(10), ms(2), false);
        t.record_extraction("Py", 1, &args(1), ms(30), ms(2), true);
        t.record_bailout("Cli");
        t.record_hacks("Py", "Cli", 2);
        t.record_hacks("Py", "Cli", 0);
        let stats = t.stats();
        let py = &stats.drivers["Py"];
        assert_eq!(py.calls, 2);
        assert_eq!(py.failures, 1);
        assert_eq!(py.duration_ms, 40);
        assert_eq!(py.duration_per_call_ms, Some(20));
        assert_eq!(py.ohacks, 2);
        assert_eq!(stats.drivers["Cli"].bailouts, 1);
        assert_eq!(stats.drivers["Cli"].rhacks, 2);
        assert_eq!(stats.hacks, 2);
        assert_eq!(stats.cases_hacked_pct, Some(50.0));
        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["drivers"]["Py"]["calls"], json!(2));
    }

    #[test]
    fn abort_is_recorded() {
        let mut t = sample();
        t.record_abort("[DFH-1002] value source `n` failed: gone");
        assert!(t.is_aborted());
        assert_eq!(t.abort().unwrap().after_argsets, 6);
        assert!(t.format_report().contains("RUN ABORTED after 6 argsets"));
        assert!(t.stats().aborted);
    }

    #[test]
    fn reads_do_not_mutate() {
        let t = sample();
        let first = t.format_report();
        let _ = t.stats();
        let _ = t.distinct_errors();
        assert_eq!(t.format_report(), first);
    }

    #[test]
    fn args_export_one_file_per_error() {
        let t = sample();
        let dir = tempfile::tempdir().unwrap();
        let files = t.write_args_jsonl(dir.path().join("errors")).unwrap();
        assert_eq!(files.len(), 3);
        let first = std::fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<&str> = first.lines().collect();
        assert_eq!(lines, vec![r#"{"n":1}"#, r#"{"n":3}"#]);
        assert!(files[0].ends_with(format!("{}.jsonl", error_id("diff one"))));
    }
}
