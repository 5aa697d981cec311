mod plan;
mod training;

pub use plan::PlanSpec;
pub use training::{TrainConfigSpec, tensor_label};
