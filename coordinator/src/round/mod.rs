mod executor;
mod result;

pub use executor::RoundExecutor;
pub use result::{RoundResult, WorkerUpdate};
