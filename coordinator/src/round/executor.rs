use std::{io, time::Duration};

use futures::{StreamExt, stream::FuturesUnordered};
use log::{debug, info, warn};

use super::{RoundResult, WorkerUpdate};
use crate::{
    configs::TrainingConfig,
    error::{CoordinatorError, Result},
    model::{Tensor, TrainPlan},
    session::WorkerSession,
};

/// Runs one training round over a roster snapshot.
#[derive(Debug, Clone)]
pub struct RoundExecutor {
    worker_timeout: Option<Duration>,
}

impl RoundExecutor {
    /// Creates a new `RoundExecutor`.
    ///
    /// # Arguments
    /// * `worker_timeout` - How long a worker may take for its whole round, `None` waits forever.
    pub fn new(worker_timeout: Option<Duration>) -> Self {
        Self { worker_timeout }
    }

    /// Fans the round out to every worker in `roster` and joins them.
    ///
    /// All workers start from the same `params`. A worker that fails or
    /// times out is excluded from the result, the others are unaffected.
    ///
    /// # Arguments
    /// * `roster` - The workers taking part, a snapshot of the registry.
    /// * `params` - The global parameters at the start of the round.
    /// * `plan` - The training plan to run.
    /// * `config` - The training hyperparameters.
    /// * `epoch` - The round index.
    ///
    /// # Returns
    /// The loss and updated parameters of every worker that completed.
    pub async fn run_round(
        &self,
        roster: &[WorkerSession],
        params: &[Tensor],
        plan: &TrainPlan,
        config: &TrainingConfig,
        epoch: usize,
    ) -> RoundResult {
        info!(round = epoch, roster = roster.len(); "starting round");

        let mut result = RoundResult::new(epoch);
        let mut pending: FuturesUnordered<_> = roster
            .iter()
            .map(|session| async move {
                let outcome = self.run_worker(session, params, plan, config, epoch).await;
                (session, outcome)
            })
            .collect();

        while let Some((session, outcome)) = pending.next().await {
            let worker_id = session.id().to_string();

            match outcome {
                Ok(update) => {
                    debug!(worker_id = worker_id.as_str(), round = epoch; "worker reported loss {}", update.loss);
                    result.record(worker_id, update);
                }
                Err(e) => {
                    warn!(worker_id = worker_id.as_str(), round = epoch; "excluded from round: {e}");
                    result.exclude(worker_id, e);
                }
            }
        }

        result
    }

    async fn run_worker(
        &self,
        session: &WorkerSession,
        params: &[Tensor],
        plan: &TrainPlan,
        config: &TrainingConfig,
        epoch: usize,
    ) -> Result<WorkerUpdate> {
        let steps = Self::worker_steps(session, params, plan, config, epoch);

        let Some(limit) = self.worker_timeout else {
            return steps.await;
        };

        match tokio::time::timeout(limit, steps).await {
            Ok(outcome) => outcome,
            Err(_) => Err(CoordinatorError::WorkerUnavailable {
                worker_id: session.id().to_string(),
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no answer within {limit:?}"),
                ),
            }),
        }
    }

    /// The strictly ordered per worker sequence.
    async fn worker_steps(
        session: &WorkerSession,
        params: &[Tensor],
        plan: &TrainPlan,
        config: &TrainingConfig,
        epoch: usize,
    ) -> Result<WorkerUpdate> {
        session.reset_remote_state().await?;
        let handles = session
            .push_parameters(params, &config.param_label_prefix)
            .await?;
        session.push_train_config(config, handles.len()).await?;
        session.push_train_plan(plan).await?;

        let loss = session.invoke_training(&config.dataset_key, epoch).await?;

        let mut updated = Vec::with_capacity(handles.len());
        for handle in &handles {
            updated.push(session.fetch_parameter(handle).await?);
        }

        Ok(WorkerUpdate {
            loss,
            params: updated,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use ndarray::{arr1, arr2};

    use super::*;
    use crate::{
        WorkerRegistry,
        session::WorkerAddr,
        testing::{DuplexDial, constant, failing, schedule, training},
    };
    use worker::TrainJob;

    fn plan() -> TrainPlan {
        TrainPlan::new("plan", b"sgd".to_vec())
    }

    fn params() -> Vec<Tensor> {
        vec![
            arr2(&[[0.0, 0.0], [0.0, 0.0]]).into_dyn(),
            arr1(&[0.0]).into_dyn(),
        ]
    }

    async fn registry_of(dial: &DuplexDial, workers: &[(&str, u16)]) -> WorkerRegistry {
        let registry = WorkerRegistry::new(schedule(), Arc::new(dial.clone()));
        for (id, port) in workers {
            registry
                .register(id.to_string(), WorkerAddr::new("local", *port))
                .await
                .unwrap();
        }
        registry
    }

    #[tokio::test]
    async fn every_worker_runs_the_steps_in_order() {
        let dial = DuplexDial::new();
        dial.serve(7001, "alice");
        dial.serve(7002, "bob");
        let registry = registry_of(&dial, &[("alice", 7001), ("bob", 7002)]).await;

        let executor = RoundExecutor::new(None);
        let result = executor
            .run_round(&registry.snapshot(), &params(), &plan(), &training(1), 0)
            .await;

        assert_eq!(result.contributors(), ["alice", "bob"]);
        for port in [7001, 7002] {
            assert_eq!(
                dial.journal(port),
                [
                    "clear_objects",
                    "store_tensor",
                    "store_tensor",
                    "set_train_config",
                    "store_plan",
                    "fit",
                    "fetch_tensor",
                    "fetch_tensor",
                ]
            );
        }
    }

    #[tokio::test]
    async fn updated_parameters_keep_their_shapes() {
        let dial = DuplexDial::new();
        dial.serve(7001, "alice");
        let registry = registry_of(&dial, &[("alice", 7001)]).await;

        let result = RoundExecutor::new(None)
            .run_round(&registry.snapshot(), &params(), &plan(), &training(1), 0)
            .await;

        let update = &result.updates()["alice"];
        assert_eq!(update.loss, 7001.0);
        assert_eq!(update.params[0], arr2(&[[7001.0, 7001.0], [7001.0, 7001.0]]).into_dyn());
        assert_eq!(update.params[1], arr1(&[7001.0]).into_dyn());
    }

    #[tokio::test]
    async fn a_failing_worker_is_excluded_and_the_others_contribute() {
        let dial = DuplexDial::new();
        dial.serve_with(7001, "alice", constant(1.0));
        dial.serve_with(7002, "bob", failing("diverged"));
        dial.serve_with(7003, "carol", constant(3.0));
        let registry =
            registry_of(&dial, &[("alice", 7001), ("bob", 7002), ("carol", 7003)]).await;

        let result = RoundExecutor::new(None)
            .run_round(&registry.snapshot(), &params(), &plan(), &training(1), 0)
            .await;

        assert_eq!(result.contributors(), ["alice", "carol"]);
        assert_eq!(result.excluded().len(), 1);

        let (id, reason) = &result.excluded()[0];
        assert_eq!(id, "bob");
        assert!(reason.to_string().contains("diverged"));
        assert_eq!(result.mean_loss(), Some(2.0));
    }

    #[tokio::test]
    async fn a_non_finite_loss_still_counts_as_a_contribution() {
        let dial = DuplexDial::new();
        dial.serve_with(7001, "alice", Box::new(|_job: TrainJob<'_>| Ok(f32::NAN)));
        dial.serve_with(7002, "bob", Box::new(|_job: TrainJob<'_>| Ok(f32::INFINITY)));
        let registry = registry_of(&dial, &[("alice", 7001), ("bob", 7002)]).await;

        let result = RoundExecutor::new(None)
            .run_round(&registry.snapshot(), &params(), &plan(), &training(1), 0)
            .await;

        assert_eq!(result.contributors(), ["alice", "bob"]);
        assert!(result.excluded().is_empty());
        assert!(result.updates()["alice"].loss.is_nan());
        assert_eq!(result.updates()["bob"].loss, f32::INFINITY);
    }

    #[tokio::test(start_paused = true)]
    async fn a_hung_worker_times_out_without_stalling_the_round() {
        let dial = DuplexDial::new();
        dial.serve(7001, "alice");
        dial.hang(7002);
        let registry = registry_of(&dial, &[("alice", 7001), ("bob", 7002)]).await;

        let result = RoundExecutor::new(Some(Duration::from_secs(5)))
            .run_round(&registry.snapshot(), &params(), &plan(), &training(1), 0)
            .await;

        assert_eq!(result.contributors(), ["alice"]);
        let (id, reason) = &result.excluded()[0];
        assert_eq!(id, "bob");

        let CoordinatorError::WorkerUnavailable { source, .. } = reason else {
            panic!("expected an unavailable worker, got {reason:?}");
        };
        assert_eq!(source.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn an_empty_roster_yields_an_empty_result() {
        let result = RoundExecutor::new(None)
            .run_round(&[], &params(), &plan(), &training(1), 3)
            .await;

        assert_eq!(result.round(), 3);
        assert!(result.updates().is_empty());
        assert!(result.excluded().is_empty());
        assert_eq!(result.mean_loss(), None);
    }

    #[tokio::test]
    async fn a_late_joiner_waits_for_the_next_round() {
        let dial = DuplexDial::new();
        dial.serve(7001, "alice");
        dial.serve(7002, "bob");
        let registry = registry_of(&dial, &[("alice", 7001)]).await;
        let executor = RoundExecutor::new(None);
        let (params, plan, config) = (params(), plan(), training(2));

        let roster = registry.snapshot();
        let (first, joined) = tokio::join!(
            executor.run_round(&roster, &params, &plan, &config, 0),
            registry.register("bob".into(), WorkerAddr::new("local", 7002)),
        );
        joined.unwrap();
        assert_eq!(first.contributors(), ["alice"]);

        let second = executor
            .run_round(&registry.snapshot(), &params, &plan, &config, 1)
            .await;
        assert_eq!(second.contributors(), ["alice", "bob"]);
    }

    #[tokio::test]
    async fn a_broken_session_is_redialed_next_round() {
        let dial = DuplexDial::new();
        dial.serve_with(7001, "alice", failing("out of memory"));
        let registry = registry_of(&dial, &[("alice", 7001)]).await;
        let executor = RoundExecutor::new(None);

        let first = executor
            .run_round(&registry.snapshot(), &params(), &plan(), &training(2), 0)
            .await;
        assert!(first.contributors().is_empty());

        dial.serve_with(7001, "alice", constant(1.0));
        let second = executor
            .run_round(&registry.snapshot(), &params(), &plan(), &training(2), 1)
            .await;

        assert_eq!(second.contributors(), ["alice"]);
        assert_eq!(dial.dials(7001), 2);
    }
}
