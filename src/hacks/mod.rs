//! Case rewriting: paths into case documents, pattern matching and rules
//! that smooth over known, accepted differences before comparison.

pub mod matching;
pub mod path;
pub mod rules;

pub use matching::{DEFAULT_MATCH_DEPTH, data_match, data_match_with_limit};
pub use path::DataPath;
pub use rules::{Action, Case, Rule};
