//! Command-line entry points.

pub mod run;
