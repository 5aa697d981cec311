pub mod announce;
pub mod error;
pub mod store;
pub mod trainer;
pub mod worker;

pub use announce::{announce, connect_and_announce};
pub use error::{Result, WorkerErr};
pub use store::{ObjectStore, Tensor};
pub use trainer::{TrainJob, Trainer};
pub use worker::Worker;
