use comms::specs::{PlanSpec, TrainConfigSpec};

use crate::{Result, Tensor};

/// Everything a local training run gets to see.
pub struct TrainJob<'a> {
    /// The parameter tensors in model order, updated in place.
    pub params: &'a mut [Tensor],
    pub config: &'a TrainConfigSpec,
    pub plan: &'a PlanSpec,
    pub dataset_key: &'a str,
    pub epoch: usize,
}

/// The local optimization procedure of a worker.
///
/// The runtime only handles the protocol, the actual training over the
/// worker's private data lives behind this trait.
pub trait Trainer: Send {
    /// Trains `job.params` in place.
    ///
    /// # Returns
    /// The loss of the last training batch.
    fn train(&mut self, job: TrainJob<'_>) -> Result<f32>;
}

impl<F> Trainer for F
where
    F: FnMut(TrainJob<'_>) -> Result<f32> + Send,
{
    fn train(&mut self, job: TrainJob<'_>) -> Result<f32> {
        self(job)
    }
}
