use serde::{Deserialize, Serialize};

/// Wire-level training hyperparameters pushed to a worker before each fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfigSpec {
    pub model_id: String,
    pub plan_id: String,
    pub param_label_prefix: String,
    pub learning_rate: f32,
    pub batch_size: usize,
    pub random_sample: bool,
    pub max_batches: Option<usize>,
    pub dataset_key: String,
    pub rounds: usize,
    /// How many parameter tensors were stored before this config.
    pub tensor_count: usize,
}

/// Builds the label of the `index`th parameter tensor sent to `worker_id`.
///
/// Tensors of different workers may share one remote address space, so the
/// worker id is part of the label.
pub fn tensor_label(prefix: &str, worker_id: &str, index: usize) -> String {
    format!("{prefix}_{worker_id}_{index}")
}
