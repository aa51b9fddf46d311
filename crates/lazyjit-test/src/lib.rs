//! Shared test fixtures for lazyjit crates.
//!
//! - [`units`] - sample compilation units used across the test suites
//! - [`probe`] - a compile-counting code generator and override data cells
//!
//! # Usage
//!
//! Add as a dev-dependency in your crate's `Cargo.toml`:
//!
//! ```toml
//! [dev-dependencies]
//! lazyjit-test = { workspace = true }
//! ```

pub mod probe;
pub mod units;

pub use probe::{CountingCodeGen, ProbeCell};
