use std::{error::Error, fmt, io};

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Worker runtime failures.
///
/// Only `Io` ends a session, every other variant is reported back to the
/// coordinator as a `Msg::Err` reply.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },
    TensorLengthMismatch {
        label: String,
        got: usize,
        expected: usize,
    },
    MissingObject(String),
    Training(String),
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::UnexpectedMessage { expected, got } => {
                write!(f, "unexpected message: expected {expected}, got {got}")
            }
            WorkerErr::TensorLengthMismatch {
                label,
                got,
                expected,
            } => write!(
                f,
                "tensor {label} length mismatch: got {got} values, shape holds {expected}"
            ),
            WorkerErr::MissingObject(what) => write!(f, "missing object: {what}"),
            WorkerErr::Training(msg) => write!(f, "training failed: {msg}"),
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<WorkerErr> for io::Error {
    fn from(value: WorkerErr) -> Self {
        match value {
            WorkerErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
