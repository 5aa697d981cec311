use std::collections::HashMap;

use comms::specs::{PlanSpec, TrainConfigSpec};

use crate::{Result, WorkerErr};

/// A parameter tensor held by the worker, stored flat in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

impl Tensor {
    /// Creates a new `Tensor`, checking that `values` fills `shape` exactly.
    ///
    /// # Arguments
    /// * `label` - Name used in the error report.
    /// * `shape` - The dimensions of the tensor.
    /// * `values` - The flat row-major values.
    pub fn new(label: &str, shape: Vec<usize>, values: Vec<f32>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();

        if values.len() != expected {
            return Err(WorkerErr::TensorLengthMismatch {
                label: label.to_string(),
                got: values.len(),
                expected,
            });
        }

        Ok(Self { shape, values })
    }
}

/// Every object the coordinator materialized on this worker.
#[derive(Debug, Default)]
pub struct ObjectStore {
    tensors: HashMap<String, Tensor>,
    plans: HashMap<String, PlanSpec>,
    config: Option<TrainConfigSpec>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops all tensors, plans and the train config.
    pub fn clear(&mut self) {
        self.tensors.clear();
        self.plans.clear();
        self.config = None;
    }

    pub fn insert_tensor(&mut self, label: String, tensor: Tensor) {
        self.tensors.insert(label, tensor);
    }

    pub fn tensor(&self, label: &str) -> Option<&Tensor> {
        self.tensors.get(label)
    }

    /// Removes the tensors under `labels`, in order.
    ///
    /// Nothing is removed if any of them is missing.
    pub fn take_tensors(&mut self, labels: &[String]) -> Result<Vec<Tensor>> {
        if let Some(missing) = labels.iter().find(|l| !self.tensors.contains_key(*l)) {
            return Err(WorkerErr::MissingObject(format!("tensor {missing}")));
        }

        Ok(labels
            .iter()
            .filter_map(|label| self.tensors.remove(label))
            .collect())
    }

    /// Stores a plan, replacing any older copy with the same id.
    pub fn insert_plan(&mut self, plan: PlanSpec) {
        self.plans.insert(plan.id.clone(), plan);
    }

    pub fn plan(&self, id: &str) -> Option<&PlanSpec> {
        self.plans.get(id)
    }

    pub fn set_config(&mut self, config: TrainConfigSpec) {
        self.config = Some(config);
    }

    pub fn config(&self) -> Option<&TrainConfigSpec> {
        self.config.as_ref()
    }

    pub fn tensor_count(&self) -> usize {
        self.tensors.len()
    }
}
