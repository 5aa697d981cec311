//! In-memory workers for the coordinator's unit tests.

use std::{
    collections::HashMap,
    io,
    num::{NonZeroU32, NonZeroUsize},
    sync::Arc,
    time::Duration,
};

use comms::msg::{Command, Msg};
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use worker::{TrainJob, Worker};

use crate::{
    configs::{DuplicatePolicy, ScheduleConfig, TrainingConfig},
    session::{Connection, Dial, WorkerAddr},
};

pub type BoxTrainer = Box<dyn FnMut(TrainJob<'_>) -> worker::Result<f32> + Send>;
type SharedWorker = Arc<tokio::sync::Mutex<Worker<BoxTrainer>>>;

const PIPE_SIZE: usize = 1 << 16;

#[derive(Clone)]
enum Behaviour {
    Serve(SharedWorker),
    Hang,
    Refuse,
}

#[derive(Default)]
struct State {
    behaviours: HashMap<u16, Behaviour>,
    dials: HashMap<u16, usize>,
    journals: HashMap<u16, Arc<Mutex<Vec<&'static str>>>>,
    parked: Vec<DuplexStream>,
}

/// Dials in-memory workers keyed by port.
#[derive(Clone, Default)]
pub struct DuplexDial {
    state: Arc<Mutex<State>>,
}

impl DuplexDial {
    pub fn new() -> Self {
        Self::default()
    }

    /// A worker that sets every parameter to its own port number.
    pub fn serve(&self, port: u16, worker_id: &str) {
        self.serve_with(port, worker_id, constant(port as f32));
    }

    pub fn serve_with(&self, port: u16, worker_id: &str, trainer: BoxTrainer) {
        let worker = Arc::new(tokio::sync::Mutex::new(Worker::new(worker_id, trainer)));
        self.state
            .lock()
            .behaviours
            .insert(port, Behaviour::Serve(worker));
    }

    /// A worker that accepts connections but never answers.
    pub fn hang(&self, port: u16) {
        self.state.lock().behaviours.insert(port, Behaviour::Hang);
    }

    pub fn refuse(&self, port: u16) {
        self.state.lock().behaviours.insert(port, Behaviour::Refuse);
    }

    pub fn dials(&self, port: u16) -> usize {
        self.state.lock().dials.get(&port).copied().unwrap_or_default()
    }

    /// Every command the worker at `port` received, in order.
    pub fn journal(&self, port: u16) -> Vec<&'static str> {
        self.state
            .lock()
            .journals
            .get(&port)
            .map(|j| j.lock().clone())
            .unwrap_or_default()
    }

    fn journal_for(&self, port: u16) -> Arc<Mutex<Vec<&'static str>>> {
        self.state.lock().journals.entry(port).or_default().clone()
    }
}

#[async_trait::async_trait]
impl Dial for DuplexDial {
    async fn dial(&self, addr: &WorkerAddr) -> io::Result<Connection> {
        let behaviour = {
            let mut state = self.state.lock();
            *state.dials.entry(addr.port).or_default() += 1;
            state.behaviours.get(&addr.port).cloned()
        };

        let (coordinator, remote) = tokio::io::duplex(PIPE_SIZE);

        match behaviour {
            Some(Behaviour::Serve(worker)) => spawn_worker(worker, remote, self.journal_for(addr.port)),
            Some(Behaviour::Hang) => self.state.lock().parked.push(remote),
            Some(Behaviour::Refuse) | None => {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    format!("nothing listens at {addr}"),
                ));
            }
        }

        let (rx, tx) = tokio::io::split(coordinator);
        Ok(Connection::new(rx, tx))
    }
}

/// Runs `worker` behind a proxy that journals every command it forwards.
fn spawn_worker(worker: SharedWorker, front: DuplexStream, journal: Arc<Mutex<Vec<&'static str>>>) {
    let (back, remote) = tokio::io::duplex(PIPE_SIZE);
    let (front_rx, mut front_tx) = tokio::io::split(front);
    let (mut back_rx, back_tx) = tokio::io::split(back);

    tokio::spawn(async move {
        let (mut rx, mut tx) = comms::channel(front_rx, back_tx);
        let mut rx_buf: Vec<f32> = Vec::new();

        while let Ok(msg) = rx.recv_into::<Msg, _>(&mut rx_buf).await {
            if let Msg::Control(cmd) = &msg {
                journal.lock().push(command_name(cmd));
            }
            if tx.send(&msg).await.is_err() {
                break;
            }
        }
    });

    tokio::spawn(async move {
        let _ = tokio::io::copy(&mut back_rx, &mut front_tx).await;
    });

    tokio::spawn(async move {
        let (rx, tx) = tokio::io::split(remote);
        let (rx, tx) = comms::channel(rx, tx);
        let mut worker = worker.lock().await;
        let _ = worker.serve(rx, tx).await;
    });
}

fn command_name(cmd: &Command) -> &'static str {
    match cmd {
        Command::ClearObjects => "clear_objects",
        Command::StoreTensor { .. } => "store_tensor",
        Command::SetTrainConfig(_) => "set_train_config",
        Command::StorePlan(_) => "store_plan",
        Command::Fit { .. } => "fit",
        Command::FetchTensor { .. } => "fetch_tensor",
        Command::Ack => "ack",
        Command::Loss(_) => "loss",
        Command::Tensor { .. } => "tensor",
        Command::Disconnect => "disconnect",
    }
}

/// Sets every parameter value to `value` and reports it as the loss.
pub fn constant(value: f32) -> BoxTrainer {
    Box::new(move |mut job: TrainJob<'_>| {
        for tensor in job.params.iter_mut() {
            tensor.values.fill(value);
        }
        Ok(value)
    })
}

/// Adds `delta` to every parameter value.
pub fn shift(delta: f32) -> BoxTrainer {
    Box::new(move |mut job: TrainJob<'_>| {
        for tensor in job.params.iter_mut() {
            tensor.values.iter_mut().for_each(|v| *v += delta);
        }
        Ok(delta)
    })
}

pub fn failing(reason: &'static str) -> BoxTrainer {
    Box::new(move |_job: TrainJob<'_>| Err(worker::WorkerErr::Training(reason.into())))
}

pub fn schedule() -> ScheduleConfig {
    ScheduleConfig {
        min_workers: None,
        warmup: Duration::ZERO,
        settle_delay: Duration::ZERO,
        worker_timeout: Some(Duration::from_secs(5)),
        duplicate_policy: DuplicatePolicy::Reject,
        connect_attempts: NonZeroU32::MIN,
        connect_backoff: Duration::from_millis(10),
    }
}

pub fn training(rounds: usize) -> TrainingConfig {
    TrainingConfig {
        rounds,
        batch_size: NonZeroUsize::new(32).unwrap(),
        learning_rate: 0.1,
        random_sample: true,
        max_batches: None,
        dataset_key: "mnist".into(),
        model_id: "mlp".into(),
        param_label_prefix: "param".into(),
        plan_id: "plan".into(),
    }
}
