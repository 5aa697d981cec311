//! Federated training coordinator.
//!
//! Workers announce themselves to the `RegistrationListener`, which stores a
//! `WorkerSession` per worker in the `WorkerRegistry`. The
//! `TrainingController` then runs the configured rounds: every round the
//! `RoundExecutor` fans the global model out to a snapshot of the roster,
//! the `Aggregator` averages whatever came back and the controller applies
//! it before starting the next one.

pub mod aggregation;
pub mod checkpoint;
pub mod configs;
pub mod controller;
pub mod error;
pub mod model;
pub mod registry;
pub mod round;
pub mod session;

#[cfg(test)]
mod testing;

pub use aggregation::Aggregator;
pub use controller::{
    ControllerState, Evaluation, Evaluator, RoundOutcome, RoundReport, SkipEvaluation,
    TrainingController,
};
pub use error::{CoordinatorError, Result};
pub use model::{GlobalModel, Tensor, TrainPlan};
pub use registry::{RegistrationListener, WorkerRegistry};
pub use round::{RoundExecutor, RoundResult, WorkerUpdate};
pub use session::{Connection, Dial, ParameterHandle, TcpDial, WorkerAddr, WorkerSession};
