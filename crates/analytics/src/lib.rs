//! # Ranking Engine
//!
//! Turns a ragged, possibly-gapped set of per-instrument daily price
//! histories into comparable market-wide rankings.
//!
//! ## Architectural Principles
//!
//! - **Layer 1 Logic:** This is a pure logic crate. It has no knowledge of
//!   databases, schedulers or caches. It depends only on `core-types` and the
//!   parameter structs of `configuration`.
//! - **Stateless Calculation:** `RankingEngine` takes the full universe and a
//!   reference date and returns one `Evaluation` per ranking. Instruments that
//!   cannot be scored are reported, never raised as errors.
//!
//! ## Public API
//!
//! - `RankingEngine`: the three ranking operations.
//! - `Evaluation` / `InstrumentOutcome`: the winner plus per-instrument diagnostics.
//! - `indicators`: simple moving average and least-squares trend fit.

// Declare the modules that constitute this crate.
pub mod engine;
pub mod error;
pub mod indicators;
pub mod ranking;

// Re-export the key components to create a clean, public-facing API.
pub use engine::RankingEngine;
pub use error::AnalyticsError;
pub use indicators::{linear_regression, simple_moving_average, LinearFit};
pub use ranking::{Direction, Evaluation, InstrumentOutcome, Universe};
