use serde::{Deserialize, Serialize};

/// Wire-level copy of a training plan.
///
/// Workers keep plans keyed by `id`, so every copy sent for the same plan
/// must carry the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSpec {
    pub id: String,
    pub body: Vec<u8>,
}
