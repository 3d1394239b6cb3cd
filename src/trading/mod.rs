pub mod alerts;
pub mod delivery;
pub mod execution;
pub mod performance;
pub mod pipeline;

pub use pipeline::{Pipeline, ProcessOutcome};
