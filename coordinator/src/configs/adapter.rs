use std::{
    num::{NonZeroU32, NonZeroUsize},
    time::Duration,
};

use super::{ConfigFile, ScheduleConfig, ScheduleSection, TrainingConfig, TrainingSection};
use crate::error::{CoordinatorError, Result};

const DEFAULT_ROUNDS: usize = 10;
const DEFAULT_BATCH_SIZE: usize = 64;
const DEFAULT_LEARNING_RATE: f32 = 0.01;
const DEFAULT_DATASET_KEY: &str = "mnist";
const DEFAULT_MODEL_ID: &str = "model";
const DEFAULT_PARAM_LABEL_PREFIX: &str = "model_param";
const DEFAULT_PLAN_ID: &str = "train_plan";

const DEFAULT_WARMUP_SECS: f64 = 30.0;
const DEFAULT_WORKER_TIMEOUT_SECS: f64 = 300.0;
const DEFAULT_CONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_CONNECT_BACKOFF_SECS: f64 = 0.2;

/// Turns the loosely typed `ConfigFile` into validated run configs.
pub struct Adapter;

impl Adapter {
    pub fn new() -> Self {
        Self
    }

    /// Validates `file` and fills in defaults.
    ///
    /// # Errors
    /// Returns `CoordinatorError::Configuration` naming the first offending field.
    pub fn adapt_config(&self, file: ConfigFile) -> Result<(TrainingConfig, ScheduleConfig)> {
        let training = self.adapt_training(file.training)?;
        let schedule = self.adapt_schedule(file.schedule)?;
        Ok((training, schedule))
    }

    // -------------------------------------------------------------------------
    // Training
    // -------------------------------------------------------------------------

    fn adapt_training(&self, section: TrainingSection) -> Result<TrainingConfig> {
        let rounds = match section.rounds {
            None => DEFAULT_ROUNDS,
            Some(rounds) => usize::try_from(rounds).map_err(|_| {
                invalid(format!("training.rounds must not be negative, got {rounds}"))
            })?,
        };

        let batch_size = section.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        let batch_size = NonZeroUsize::new(batch_size)
            .ok_or_else(|| invalid("training.batch_size must be greater than 0".into()))?;

        let learning_rate = section.learning_rate.unwrap_or(DEFAULT_LEARNING_RATE);
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(invalid(format!(
                "training.learning_rate must be a positive number, got {learning_rate}"
            )));
        }

        let max_batches = match section.max_batches {
            None => None,
            Some(n) => Some(NonZeroUsize::new(n).ok_or_else(|| {
                invalid("training.max_batches must be greater than 0 when set".into())
            })?),
        };

        Ok(TrainingConfig {
            rounds,
            batch_size,
            learning_rate,
            random_sample: section.random_sample.unwrap_or(true),
            max_batches,
            dataset_key: identifier("training.dataset_key", section.dataset_key, DEFAULT_DATASET_KEY)?,
            model_id: identifier("training.model_id", section.model_id, DEFAULT_MODEL_ID)?,
            param_label_prefix: identifier(
                "training.param_label_prefix",
                section.param_label_prefix,
                DEFAULT_PARAM_LABEL_PREFIX,
            )?,
            plan_id: identifier("training.plan_id", section.plan_id, DEFAULT_PLAN_ID)?,
        })
    }

    // -------------------------------------------------------------------------
    // Schedule
    // -------------------------------------------------------------------------

    fn adapt_schedule(&self, section: ScheduleSection) -> Result<ScheduleConfig> {
        let worker_timeout = match section.worker_timeout_secs {
            None => Some(DEFAULT_WORKER_TIMEOUT_SECS),
            Some(timeout) => timeout,
        };

        let worker_timeout = match worker_timeout {
            None => None,
            Some(secs) => {
                let timeout = seconds("schedule.worker_timeout_secs", secs)?;
                if timeout.is_zero() {
                    return Err(invalid(
                        "schedule.worker_timeout_secs must be greater than 0, use null to disable it"
                            .into(),
                    ));
                }
                Some(timeout)
            }
        };

        let connect_attempts = section.connect_attempts.unwrap_or(DEFAULT_CONNECT_ATTEMPTS);
        let connect_attempts = NonZeroU32::new(connect_attempts)
            .ok_or_else(|| invalid("schedule.connect_attempts must be greater than 0".into()))?;

        Ok(ScheduleConfig {
            min_workers: section.min_workers,
            warmup: seconds(
                "schedule.warmup_secs",
                section.warmup_secs.unwrap_or(DEFAULT_WARMUP_SECS),
            )?,
            settle_delay: seconds(
                "schedule.settle_delay_secs",
                section.settle_delay_secs.unwrap_or(0.0),
            )?,
            worker_timeout,
            duplicate_policy: section.duplicate_policy.unwrap_or_default(),
            connect_attempts,
            connect_backoff: seconds(
                "schedule.connect_backoff_secs",
                section
                    .connect_backoff_secs
                    .unwrap_or(DEFAULT_CONNECT_BACKOFF_SECS),
            )?,
        })
    }
}

impl Default for Adapter {
    fn default() -> Self {
        Self::new()
    }
}

fn invalid(msg: String) -> CoordinatorError {
    CoordinatorError::Configuration(msg)
}

fn seconds(field: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs)
        .map_err(|_| invalid(format!("{field} must be a non-negative number of seconds, got {secs}")))
}

fn identifier(field: &str, value: Option<String>, default: &str) -> Result<String> {
    let value = value.unwrap_or_else(|| default.to_string());

    if value.trim().is_empty() {
        return Err(invalid(format!("{field} must not be empty")));
    }

    Ok(value)
}
