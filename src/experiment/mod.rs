//! Running strategy configs and persisting their results.

pub mod runner;
pub mod store;

pub use runner::{ExperimentRunner, LocalRunner};
pub use store::ResultStore;
