//! Multi-provider LLM consensus engine: parallel fan-out, convergence
//! detection, and arbiter synthesis.
//!
//! `src/main.rs` is a thin demonstration harness; everything that
//! matters lives here so it can be exercised from tests and from other
//! binaries without going through the CLI.

pub mod arbiter;
pub mod circuit_breaker;
pub mod client;
pub mod config;
pub mod convergence;
pub mod coordinator;
pub mod cost;
pub mod error;
pub mod ids;
pub mod model;
pub mod prelude;
pub mod provider;
pub mod rate_limit;
pub mod store;
