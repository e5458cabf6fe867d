#![forbid(unsafe_code)]

//! Differential Harness (dfh): runs a reference implementation (the oracle)
//! and one or more systems under test over the same generated inputs and
//! reports where they disagree.
//!
//! The moving parts:
//! 1. **Argument sets** ([`params`]): lazy cartesian products over named
//!    value sources.
//! 2. **Drivers** ([`driver`]): one adapter per implementation, instantiated
//!    per argument set and extracted at most once.
//! 3. **Comparison** ([`compare`], [`hacks`]): comparators plus data rewriting
//!    rules applied before and after a failed comparison.
//! 4. **Run loop and tracking** ([`regression`], [`tracker`], [`logger`]):
//!    fault-isolated evaluation of every pairing, grouped error reports and a
//!    JSONL event log.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use differential_harness::prelude::*;
//! use serde_json::json;
//!
//! let generator = ArgumentSetGenerator::new(
//!     ParameterSpec::new()
//!         .with("a", ValueSource::values([1, 2]))
//!         .with("b", ValueSource::values([3, 4])),
//! )?;
//! let add = |name: &str| {
//!     FnDriver::driver_type(name, |args, _| {
//!         let n = |k: &str| args.get(k).and_then(|v| v.as_i64()).unwrap_or_default();
//!         Ok(DriverData::from([("result".to_string(), json!(n("a") + n("b")))]))
//!     })
//! };
//! let case = TestCase::new(Equality, add("PyCalc"), vec![add("CliCalc")])?;
//! let tracker = run(&generator, &[case])?;
//! println!("{}", tracker.format_report());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod prelude;

pub mod compare;
pub mod core;
pub mod driver;
pub mod hacks;
pub mod logger;
pub mod params;
pub mod regression;
pub mod tracker;
