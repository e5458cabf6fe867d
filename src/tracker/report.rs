//! Human-readable report and per-error exports.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::core::config::ReportConfig;
use crate::core::errors::{HarnessError, Result};
use crate::tracker::outcome::{Outcome, OutcomeDetail, OutcomeStatus};
use crate::tracker::ResultTracker;

/// Knobs for [`ResultTracker::format_report_with`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOptions {
    /// Argument sets listed per error; `0` lists all.
    pub max_argsets_shown: usize,
    /// Slowest extractions listed per driver; `0` omits the section.
    pub slowest_n: usize,
    /// Append the JSON statistics block.
    pub include_stats: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            max_argsets_shown: 0,
            slowest_n: 3,
            include_stats: false,
        }
    }
}

impl From<&ReportConfig> for ReportOptions {
    fn from(cfg: &ReportConfig) -> Self {
        Self {
            max_argsets_shown: cfg.max_argsets_shown,
            slowest_n: cfg.slowest_n,
            include_stats: cfg.include_stats,
        }
    }
}

/// Default length of an error id.
pub const EID_LEN: usize = 7;

/// Failing outcomes sharing one error string.
#[derive(Debug, Clone)]
pub struct DistinctError<'a> {
    /// First [`EID_LEN`] hex chars of the SHA-256 of `error`, longer when
    /// another group of the same run shares that prefix.
    pub eid: String,
    pub error: String,
    pub status: OutcomeStatus,
    pub outcomes: Vec<&'a Outcome>,
}

impl DistinctError<'_> {
    #[must_use]
    pub fn count(&self) -> usize {
        self.outcomes.len()
    }

    /// First affected mismatch and its snapshots, if this is a mismatch group.
    #[must_use]
    pub fn first_mismatch(&self) -> Option<(&Outcome, &OutcomeDetail)> {
        self.outcomes.iter().find_map(|o| match &o.detail {
            Some(detail @ OutcomeDetail::Mismatch { .. }) => Some((*o, detail)),
            _ => None,
        })
    }
}

/// Short error id, git style.
#[must_use]
pub fn error_id(error: &str) -> String {
    digest_prefix(error, EID_LEN)
}

fn digest_prefix(error: &str, len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(error.as_bytes());
    let mut hex = format!("{:x}", hasher.finalize());
    hex.truncate(len);
    hex
}

/// Lengthen ids shared by several groups until each id is unique.
fn widen_clashing_ids(groups: &mut [DistinctError<'_>]) {
    let mut len = EID_LEN;
    loop {
        let mut seen: BTreeMap<&str, usize> = BTreeMap::new();
        for group in groups.iter() {
            *seen.entry(group.eid.as_str()).or_default() += 1;
        }
        let clashing: BTreeSet<String> = seen
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|(eid, _)| eid.to_string())
            .collect();
        if clashing.is_empty() || len >= 64 {
            return;
        }
        len += 1;
        for group in groups.iter_mut().filter(|g| clashing.contains(&g.eid)) {
            group.eid = digest_prefix(&group.error, len);
        }
    }
}

pub(crate) fn group_errors(outcomes: &[Outcome]) -> Vec<DistinctError<'_>> {
    let mut groups: Vec<DistinctError<'_>> = Vec::new();
    for outcome in outcomes {
        let Some(error) = outcome.error_string() else {
            continue;
        };
        match groups.iter_mut().find(|g| g.error == error) {
            Some(group) => group.outcomes.push(outcome),
            None => groups.push(DistinctError {
                eid: error_id(&error),
                error,
                status: outcome.status,
                outcomes: vec![outcome],
            }),
        }
    }
    widen_clashing_ids(&mut groups);
    groups
}

pub(crate) fn render(tracker: &ResultTracker, opts: &ReportOptions) -> String {
    let errors = tracker.distinct_errors();
    let mut out = String::new();

    let _ = writeln!(
        out,
        "Found {} ({} distinct) errors in {} tests with {} argsets (duration: {:.3}s):",
        tracker.mismatched() + tracker.errored(),
        errors.len(),
        tracker.total(),
        tracker.argsets_done(),
        tracker.duration().as_secs_f64(),
    );
    let _ = writeln!(
        out,
        "passed: {}, mismatched: {}, errored: {}, skipped: {}",
        tracker.passed(),
        tracker.mismatched(),
        tracker.errored(),
        tracker.skipped(),
    );
    if let Some(abort) = tracker.abort() {
        let _ = writeln!(
            out,
            "RUN ABORTED after {} argsets: {}",
            abort.after_argsets, abort.error
        );
    }

    for error in &errors {
        out.push('\n');
        format_error(&mut out, error, opts.max_argsets_shown);
    }

    if opts.slowest_n > 0 {
        let slowest = tracker.slowest(opts.slowest_n);
        if !slowest.is_empty() {
            let _ = writeln!(out, "\n--- slowest extractions ----------------------------");
            for (driver, calls) in &slowest {
                let _ = writeln!(out, "{driver}:");
                for call in calls {
                    let _ = writeln!(
                        out,
                        "  {:>10.3} ms  #{} {}",
                        call.elapsed.as_secs_f64() * 1000.0,
                        call.argset_index,
                        call.argset
                    );
                }
            }
        }
    }

    if opts.include_stats {
        let stats = serde_json::to_string_pretty(&tracker.stats()).unwrap_or_default();
        let _ = writeln!(out, "\n--- stats -----------------------------------------\n{stats}");
    }

    out
}

fn format_error(out: &mut String, error: &DistinctError<'_>, max_shown: usize) {
    let count = error.count();
    let _ = writeln!(
        out,
        "~~~ ERROR FOUND ({}) ~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~\n\
         --- {} ---------------------------------------------\n{}",
        error.eid,
        error.status.label(),
        error.error
    );
    if let Some((first, OutcomeDetail::Mismatch { oracle, sut, .. })) = error.first_mismatch() {
        let _ = writeln!(
            out,
            "--- first snapshots ---------------------------------\n\
             argset: {}\noracle: {}\nsut:    {}",
            first.argset,
            serde_json::to_string(oracle).unwrap_or_default(),
            serde_json::to_string(sut).unwrap_or_default(),
        );
    }
    let _ = writeln!(
        out,
        "--- argsets affected ({count}) ---------------------------"
    );
    let shown = if max_shown > 0 { max_shown.min(count) } else { count };
    for outcome in &error.outcomes[..shown] {
        let _ = writeln!(out, "{}", outcome.argset);
    }
    if shown < count {
        let _ = writeln!(
            out,
            "[...] not showing {} cases, see {}.jsonl for full list",
            count - shown,
            error.eid
        );
    }
}

/// One `<eid>.jsonl` per distinct error, one argument set per line.
pub(crate) fn write_args(tracker: &ResultTracker, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|err| HarnessError::io(dir, err))?;
    let mut written = Vec::new();
    for error in tracker.distinct_errors() {
        let path = dir.join(format!("{}.jsonl", error.eid));
        let file = File::create(&path).map_err(|err| HarnessError::io(&path, err))?;
        let mut writer = BufWriter::new(file);
        for outcome in &error.outcomes {
            let line = serde_json::to_string(&outcome.argset)?;
            writeln!(writer, "{line}").map_err(|err| HarnessError::io(&path, err))?;
        }
        writer.flush().map_err(|err| HarnessError::io(&path, err))?;
        written.push(path);
    }
    Ok(written)
}
