mod listener;

use std::{sync::Arc, time::Duration};

use log::{info, warn};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::{
    configs::{DuplicatePolicy, ScheduleConfig},
    error::{CoordinatorError, Result},
    session::{Dial, WorkerAddr, WorkerSession},
};

pub use listener::{RegistrationListener, accept_worker};

struct Inner {
    sessions: Mutex<Vec<WorkerSession>>,
    size: watch::Sender<usize>,
    dial: Arc<dyn Dial>,
    schedule: ScheduleConfig,
}

/// The roster of registered workers, in registration order.
///
/// Registrations and snapshots serialize on a short lived lock, a snapshot
/// never observes a registration that completed after it was taken.
#[derive(Clone)]
pub struct WorkerRegistry {
    inner: Arc<Inner>,
}

impl WorkerRegistry {
    /// Creates a new empty `WorkerRegistry`.
    ///
    /// # Arguments
    /// * `schedule` - Duplicate policy, settle delay and dial retry settings.
    /// * `dial` - How sessions reach their worker.
    pub fn new(schedule: ScheduleConfig, dial: Arc<dyn Dial>) -> Self {
        let (size, _) = watch::channel(0);
        let inner = Inner {
            sessions: Mutex::new(Vec::new()),
            size,
            dial,
            schedule,
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    /// Creates, connects and stores the session of a newly announced worker.
    ///
    /// # Arguments
    /// * `worker_id` - The announced identity.
    /// * `addr` - The announced session address.
    ///
    /// # Returns
    /// The stored session.
    ///
    /// # Errors
    /// `DuplicateWorker` if the id is taken under the `Reject` policy,
    /// `WorkerUnavailable` if the worker can't be dialed.
    pub async fn register(&self, worker_id: String, addr: WorkerAddr) -> Result<WorkerSession> {
        let schedule = &self.inner.schedule;

        if schedule.duplicate_policy == DuplicatePolicy::Reject && self.contains(&worker_id) {
            return Err(self.duplicate(worker_id));
        }

        if !schedule.settle_delay.is_zero() {
            tokio::time::sleep(schedule.settle_delay).await;
        }

        let session = WorkerSession::new(worker_id, addr, self.inner.dial.clone());
        session
            .connect(schedule.connect_attempts, schedule.connect_backoff)
            .await?;

        let replaced = {
            let mut sessions = self.inner.sessions.lock();
            let existing = sessions.iter().position(|s| s.id() == session.id());

            let replaced = match (existing, schedule.duplicate_policy) {
                (Some(_), DuplicatePolicy::Reject) => {
                    return Err(self.duplicate(session.id().to_string()));
                }
                (Some(i), DuplicatePolicy::Replace) => {
                    info!(worker_id = session.id(); "replacing the session of a re-registered worker");
                    Some(std::mem::replace(&mut sessions[i], session.clone()))
                }
                (None, _) => {
                    sessions.push(session.clone());
                    None
                }
            };

            self.inner.size.send_replace(sessions.len());
            info!(worker_id = session.id(), roster = sessions.len(); "worker joined from {}", session.addr());
            replaced
        };

        if let Some(old) = replaced {
            old.disconnect().await;
        }

        Ok(session)
    }

    /// The current roster, later registrations don't show up in it.
    pub fn snapshot(&self) -> Vec<WorkerSession> {
        self.inner.sessions.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, worker_id: &str) -> bool {
        self.inner.sessions.lock().iter().any(|s| s.id() == worker_id)
    }

    /// Waits until at least `min_workers` are registered or `grace` elapsed.
    ///
    /// # Returns
    /// The roster size at the time it stopped waiting.
    pub async fn wait_for(&self, min_workers: usize, grace: Duration) -> usize {
        let mut size = self.inner.size.subscribe();
        let ready = size.wait_for(|len| *len >= min_workers);

        if tokio::time::timeout(grace, ready).await.is_err() {
            warn!("warm-up elapsed before {min_workers} worker(s) registered");
        }

        self.len()
    }

    fn duplicate(&self, worker_id: String) -> CoordinatorError {
        warn!(worker_id = worker_id.as_str(); "rejecting duplicate registration");
        CoordinatorError::DuplicateWorker { worker_id }
    }
}
