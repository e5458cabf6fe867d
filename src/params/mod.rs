//! Parameter space: specs, value sources, and the cartesian argument-set generator.

pub mod argset;
pub mod generator;
pub mod source;

pub use argset::ArgumentSet;
pub use generator::{ArgumentSetGenerator, ArgumentSets};
pub use source::{ParameterSpec, ValueSource};
