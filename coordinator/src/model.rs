use std::sync::Arc;

use comms::specs::PlanSpec;
use ndarray::ArrayD;

/// A parameter tensor: a dense, row-major, n-dimensional `f32` array.
pub type Tensor = ArrayD<f32>;

/// The single authoritative parameter set, owned by the `TrainingController`.
///
/// Rounds only ever borrow it immutably, the controller needs a mutable
/// borrow to `apply` an aggregate, so a round in flight can't observe a
/// half-updated model.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalModel {
    params: Vec<Tensor>,
}

impl GlobalModel {
    pub fn new(params: Vec<Tensor>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[Tensor] {
        &self.params
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// The shape of every parameter tensor, in order.
    pub fn layout(&self) -> Vec<Vec<usize>> {
        self.params.iter().map(|p| p.shape().to_vec()).collect()
    }

    /// Replaces the parameters with an aggregate of the same layout.
    ///
    /// # Arguments
    /// * `params` - The new parameters, as produced by the `Aggregator` for this model.
    pub fn apply(&mut self, params: Vec<Tensor>) {
        debug_assert_eq!(params.len(), self.params.len());
        debug_assert!(
            self.params
                .iter()
                .zip(&params)
                .all(|(old, new)| old.shape() == new.shape())
        );

        self.params = params;
    }
}

/// The serialized description of the local training procedure.
///
/// Cheap to clone, every worker receives its own copy under the same id.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainPlan {
    id: String,
    body: Arc<[u8]>,
}

impl TrainPlan {
    pub fn new(id: impl Into<String>, body: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// A fresh wire copy that keeps the plan's logical id.
    pub fn to_spec(&self) -> PlanSpec {
        PlanSpec {
            id: self.id.clone(),
            body: self.body.to_vec(),
        }
    }
}
