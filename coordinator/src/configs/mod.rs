mod adapter;
mod file;
mod schedule;
mod training;

pub use adapter::Adapter;
pub use file::{ConfigFile, ScheduleSection, TrainingSection};
pub use schedule::{DuplicatePolicy, ScheduleConfig};
pub use training::TrainingConfig;
