//! The iteration loop and its supporting pieces

mod controller;
mod cost;
mod error;
mod progress;
mod workers;

pub use controller::{IterationController, RunOutcome};
pub use cost::{CostTracker, HeuristicCostEstimator};
pub use error::ControllerError;
pub use progress::{ProgressCallback, ProgressEvent, ProgressPhase, WorkerInfo};
pub use workers::{WorkerTracker, spawn_listener};
