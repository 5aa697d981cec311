use std::{fs, path::Path};

use serde::{Deserialize, Deserializer};

use super::DuplicatePolicy;
use crate::error::{CoordinatorError, Result};

/// The on-disk JSON configuration, every field is optional.
///
/// Values are kept loosely typed here so the `Adapter` can report what is
/// wrong with them instead of a bare parse error.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub training: TrainingSection,
    pub schedule: ScheduleSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TrainingSection {
    pub rounds: Option<i64>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f32>,
    pub random_sample: Option<bool>,
    pub max_batches: Option<usize>,
    pub dataset_key: Option<String>,
    pub model_id: Option<String>,
    pub param_label_prefix: Option<String>,
    pub plan_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleSection {
    pub min_workers: Option<usize>,
    pub warmup_secs: Option<f64>,
    pub settle_delay_secs: Option<f64>,
    /// `null` disables the per-worker timeout.
    #[serde(deserialize_with = "present")]
    pub worker_timeout_secs: Option<Option<f64>>,
    pub duplicate_policy: Option<DuplicatePolicy>,
    pub connect_attempts: Option<u32>,
    pub connect_backoff_secs: Option<f64>,
}

impl ConfigFile {
    /// Reads and parses a JSON config file.
    ///
    /// # Errors
    /// Returns `CoordinatorError::Configuration` if the file can't be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            CoordinatorError::Configuration(format!("reading {}: {e}", path.display()))
        })?;

        Self::parse(&text)
            .map_err(|e| CoordinatorError::Configuration(format!("{}: {e}", path.display())))
    }

    /// Parses a JSON config document.
    pub fn parse(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

/// Keeps an explicit `null` apart from a missing field.
fn present<'de, D, T>(de: D) -> std::result::Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(de).map(Some)
}
