//! Experiment and draw lifecycle: creation, arm draws, outcome recording and
//! the auto-fail sweep that closes stale draws.
//!
//! Data lives behind the `ExperimentStore` trait; `InMemoryStore` keeps it in
//! DashMap for development and tests.

pub mod auto_fail;
pub mod service;
pub mod store;

pub use auto_fail::{AutoFailSweeper, SweepReport};
pub use service::{DrawRequest, DrawResponse, ExperimentService};
pub use store::{ExperimentStore, InMemoryStore};
