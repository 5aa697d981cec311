use std::{fmt, future::Future, path::PathBuf};

use log::{info, warn};

use crate::{
    aggregation::Aggregator,
    checkpoint,
    configs::{ScheduleConfig, TrainingConfig},
    model::{GlobalModel, TrainPlan},
    registry::WorkerRegistry,
    round::RoundExecutor,
};

/// Where the controller is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    /// Waiting for the first workers to register.
    WarmingUp,
    Round(usize),
    /// Every round ran, the model is final.
    Serving,
}

/// The validation metrics of the global model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f32,
    pub accuracy: f32,
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loss {:.4}, accuracy {:.2}%", self.loss, self.accuracy * 100.0)
    }
}

/// Validates the global model after every applied round.
pub trait Evaluator: Send {
    /// # Returns
    /// The model's metrics, or `None` if it can't be evaluated.
    fn evaluate(&mut self, model: &GlobalModel) -> Option<Evaluation>;
}

/// An `Evaluator` for runs without a held-out dataset.
#[derive(Debug, Default, Clone, Copy)]
pub struct SkipEvaluation;

impl Evaluator for SkipEvaluation {
    fn evaluate(&mut self, _model: &GlobalModel) -> Option<Evaluation> {
        None
    }
}

/// What happened to the global model at the end of a round.
#[derive(Debug, Clone, PartialEq)]
pub enum RoundOutcome {
    Applied,
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    pub round: usize,
    pub contributors: Vec<String>,
    pub excluded: Vec<String>,
    pub mean_loss: Option<f32>,
    pub evaluation: Option<Evaluation>,
    pub outcome: RoundOutcome,
}

/// Drives the whole training run, it owns the global model.
pub struct TrainingController<E: Evaluator> {
    model: GlobalModel,
    plan: TrainPlan,
    config: TrainingConfig,
    schedule: ScheduleConfig,
    registry: WorkerRegistry,
    executor: RoundExecutor,
    aggregator: Aggregator,
    evaluator: E,
    checkpoint: Option<PathBuf>,
    state: ControllerState,
    reports: Vec<RoundReport>,
}

impl<E: Evaluator> TrainingController<E> {
    /// Creates a new `TrainingController`.
    ///
    /// # Arguments
    /// * `model` - The initial global model.
    /// * `plan` - The plan every worker runs each round.
    /// * `config` - The run's hyperparameters.
    /// * `schedule` - Warm-up and timeout settings.
    /// * `registry` - The roster the rounds draw from.
    /// * `evaluator` - Validates the model after every applied round.
    ///
    /// # Returns
    /// A new controller in the `Idle` state.
    pub fn new(
        model: GlobalModel,
        plan: TrainPlan,
        config: TrainingConfig,
        schedule: ScheduleConfig,
        registry: WorkerRegistry,
        evaluator: E,
    ) -> Self {
        Self {
            aggregator: Aggregator::for_model(&model),
            executor: RoundExecutor::new(schedule.worker_timeout),
            model,
            plan,
            config,
            schedule,
            registry,
            evaluator,
            checkpoint: None,
            state: ControllerState::Idle,
            reports: Vec::new(),
        }
    }

    /// Persists the model at `path` after every applied round.
    pub fn with_checkpoint(mut self, path: PathBuf) -> Self {
        self.checkpoint = Some(path);
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn model(&self) -> &GlobalModel {
        &self.model
    }

    pub fn reports(&self) -> &[RoundReport] {
        &self.reports
    }

    /// Runs every configured round, one after the other, then enters `Serving`.
    ///
    /// A round whose aggregation fails leaves the model untouched and the
    /// run moves on to the next round.
    pub async fn run(&mut self) {
        if self.config.rounds > 0 {
            self.state = ControllerState::WarmingUp;
            let warmup = self.schedule.warmup;

            let ready = match self.schedule.min_workers {
                Some(min_workers) => {
                    info!("waiting for {min_workers} worker(s), at most {warmup:?}");
                    self.registry.wait_for(min_workers, warmup).await
                }
                None => {
                    info!("waiting {warmup:?} for workers to register");
                    tokio::time::sleep(warmup).await;
                    self.registry.len()
                }
            };
            info!("warm-up done with {ready} worker(s) registered");
        }

        for round in 0..self.config.rounds {
            self.state = ControllerState::Round(round);
            let report = self.run_round(round).await;
            self.reports.push(report);
        }

        self.state = ControllerState::Serving;
        info!("all {} round(s) done, serving the final model", self.config.rounds);
    }

    /// Parks the controller in `Serving` until `shutdown` resolves.
    pub async fn serve_until<F: Future<Output = ()>>(&self, shutdown: F) {
        debug_assert_eq!(self.state, ControllerState::Serving);
        shutdown.await;
        info!("shutting down with {} worker(s) registered", self.registry.len());
    }

    async fn run_round(&mut self, round: usize) -> RoundReport {
        let roster = self.registry.snapshot();
        let result = self
            .executor
            .run_round(&roster, self.model.params(), &self.plan, &self.config, round)
            .await;

        let mut report = RoundReport {
            round,
            contributors: result.contributors(),
            excluded: result.excluded().iter().map(|(id, _)| id.clone()).collect(),
            mean_loss: result.mean_loss(),
            evaluation: None,
            outcome: RoundOutcome::Applied,
        };

        let averaged = match self.aggregator.average(&result.into_parameters()) {
            Ok(averaged) => averaged,
            Err(e) => {
                warn!(round = round; "skipping round: {e}");
                report.outcome = RoundOutcome::Skipped(e.to_string());
                return report;
            }
        };

        self.model.apply(averaged);
        info!(round = round, contributors = report.contributors.len(); "global model updated");

        report.evaluation = self.evaluator.evaluate(&self.model);
        match report.evaluation {
            Some(evaluation) => info!(round = round; "validation {evaluation}"),
            None => info!(round = round; "no evaluator, validation skipped"),
        }

        if let Some(path) = &self.checkpoint {
            match checkpoint::save(path, &self.model) {
                Ok(()) => info!(round = round; "checkpoint written to {}", path.display()),
                Err(e) => warn!(round = round; "checkpoint failed: {e}"),
            }
        }

        report
    }
}
