//! Core domain types
//!
//! These types describe a single test-at-scale task: the payload that identifies it,
//! the status record reported for it, the repository's test configuration and the
//! results produced by discovery and execution.

pub mod diff;
pub mod payload;
pub mod result;
pub mod tas;
pub mod task;
