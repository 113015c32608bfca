//! Floodgate - In-process Admission Control
//!
//! This crate implements an admission gate invoked once per incoming request.
//! Each request passes a temporary-ban check, a global token or leaky bucket,
//! and a per-entity bucket; a sliding window of recent outcomes bans entities
//! whose reject ratio stays too high.

pub mod admission;
pub mod clock;
pub mod config;
pub mod error;
pub mod report;
pub mod sim;
