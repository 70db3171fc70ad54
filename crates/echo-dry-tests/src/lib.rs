// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Shared test doubles and fixtures for the Echo timer crates.
#![forbid(unsafe_code)]
//!
//! # Modules
//!
//! - [`fire_log`] - Records which task fired and when
//! - [`harness`] - Manual-clock scheduler driven step by step

pub mod fire_log;
pub mod harness;

pub use fire_log::{FireLog, Firing};
pub use harness::ManualHarness;
