use std::num::NonZeroUsize;

use comms::specs::TrainConfigSpec;

/// The hyperparameters and identifiers of one training run.
///
/// Built once at startup by the `Adapter` and never modified afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingConfig {
    /// Amount of federated rounds, zero goes straight to serving.
    pub rounds: usize,
    pub batch_size: NonZeroUsize,
    pub learning_rate: f32,
    pub random_sample: bool,
    pub max_batches: Option<NonZeroUsize>,
    pub dataset_key: String,
    pub model_id: String,
    /// Prefix of every parameter tensor label sent to a worker.
    pub param_label_prefix: String,
    pub plan_id: String,
}

impl TrainingConfig {
    /// Builds the wire form of this config.
    ///
    /// # Arguments
    /// * `tensor_count` - The amount of parameter tensors pushed before this config.
    pub fn to_spec(&self, tensor_count: usize) -> TrainConfigSpec {
        TrainConfigSpec {
            model_id: self.model_id.clone(),
            plan_id: self.plan_id.clone(),
            param_label_prefix: self.param_label_prefix.clone(),
            learning_rate: self.learning_rate,
            batch_size: self.batch_size.get(),
            random_sample: self.random_sample,
            max_batches: self.max_batches.map(NonZeroUsize::get),
            dataset_key: self.dataset_key.clone(),
            rounds: self.rounds,
            tensor_count,
        }
    }
}
