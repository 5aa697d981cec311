use std::{fmt, io};

/// The coordinator's result type.
pub type Result<T> = std::result::Result<T, CoordinatorError>;

/// All errors that can occur in the coordinator.
#[derive(Debug)]
pub enum CoordinatorError {
    /// Invalid configuration, caught before the first round.
    Configuration(String),
    /// A worker announced an id that is already registered.
    DuplicateWorker { worker_id: String },
    /// A registration channel sent something other than id, host and port.
    InvalidRegistration(String),
    /// A worker failed, or timed out, during one of its per-round steps.
    WorkerUnavailable {
        worker_id: String,
        source: io::Error,
    },
    /// A worker returned a tensor whose shape differs from the global model's.
    ShapeMismatch {
        worker_id: String,
        index: usize,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    /// A worker returned a different number of tensors than the global model holds.
    TensorCountMismatch {
        worker_id: String,
        expected: usize,
        got: usize,
    },
    /// No worker contributed to the round.
    EmptyAggregation,
    /// Loading or persisting the global model failed.
    Checkpoint(String),
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for CoordinatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::DuplicateWorker { worker_id } => {
                write!(f, "worker {worker_id} is already registered")
            }
            Self::InvalidRegistration(msg) => write!(f, "invalid registration: {msg}"),
            Self::WorkerUnavailable { worker_id, source } => {
                write!(f, "worker {worker_id} unavailable: {source}")
            }
            Self::ShapeMismatch {
                worker_id,
                index,
                expected,
                got,
            } => write!(
                f,
                "worker {worker_id} tensor {index} has shape {got:?}, expected {expected:?}"
            ),
            Self::TensorCountMismatch {
                worker_id,
                expected,
                got,
            } => write!(
                f,
                "worker {worker_id} returned {got} tensors, expected {expected}"
            ),
            Self::EmptyAggregation => f.write_str("no worker contributed to the aggregation"),
            Self::Checkpoint(msg) => write!(f, "checkpoint error: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for CoordinatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WorkerUnavailable { source, .. } => Some(source),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CoordinatorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Boundary conversion for the binary.
impl From<CoordinatorError> for io::Error {
    fn from(value: CoordinatorError) -> Self {
        match value {
            CoordinatorError::Io(e) => e,
            other => io::Error::other(other),
        }
    }
}
