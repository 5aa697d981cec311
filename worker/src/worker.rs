use std::borrow::Cow;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg},
    specs::tensor_label,
};
use log::{debug, info, warn};
use tokio::{
    io::{self, AsyncRead, AsyncWrite},
    net::TcpListener,
    task,
};

use crate::{ObjectStore, Result, Tensor, TrainJob, Trainer, WorkerErr};

/// What to answer to a single request.
enum Reply {
    Ack,
    Loss(f32),
    Tensor(String),
    Disconnect,
}

/// Infrastructure worker runtime.
///
/// Answers the coordinator's session requests on top of an `ObjectStore`
/// and hands the actual training over to a `Trainer`.
pub struct Worker<T: Trainer> {
    worker_id: String,
    /// Moved onto the blocking pool for every `Fit`, `None` only while it runs there.
    trainer: Option<T>,
    store: ObjectStore,
}

impl<T: Trainer + 'static> Worker<T> {
    /// Creates a new `Worker`.
    ///
    /// # Args
    /// * `worker_id` - The identity announced to the coordinator, also part of every tensor label.
    /// * `trainer` - The local training procedure.
    ///
    /// # Returns
    /// A new worker instance.
    pub fn new(worker_id: impl Into<String>, trainer: T) -> Self {
        Self {
            worker_id: worker_id.into(),
            trainer: Some(trainer),
            store: ObjectStore::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.worker_id
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    /// Accepts coordinator sessions one after the other, forever.
    ///
    /// A broken session is logged and the next connection is awaited, the
    /// coordinator re-dials on its next round.
    ///
    /// # Args
    /// * `listener` - The listener at the address announced to the coordinator.
    ///
    /// # Errors
    /// Returns `io::Error` only if accepting fails.
    pub async fn listen(&mut self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (stream, addr) = listener.accept().await?;
            info!(worker_id = self.worker_id.as_str(); "coordinator session from {addr}");

            let (rx, tx) = stream.into_split();
            let (rx, tx) = comms::channel(rx, tx);

            if let Err(e) = self.serve(rx, tx).await {
                warn!(worker_id = self.worker_id.as_str(); "session with {addr} ended: {e}");
            }
        }
    }

    /// Serves one coordinator session until it disconnects.
    ///
    /// # Args
    /// * `rx` - Receiving end of the session channel.
    /// * `tx` - Sending end of the session channel.
    ///
    /// # Returns
    /// Returns `Ok(())` on `Disconnect` or when the coordinator closes the channel.
    ///
    /// # Errors
    /// Returns `WorkerErr::Io` on I/O failures, protocol errors are answered with `Msg::Err`.
    pub async fn serve<R, W>(&mut self, mut rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut rx_buf: Vec<f32> = Vec::new();

        loop {
            let cmd = match rx.recv_into(&mut rx_buf).await {
                Ok(Msg::Control(cmd)) => cmd,
                Ok(other) => {
                    let err = WorkerErr::UnexpectedMessage {
                        expected: "control",
                        got: other.kind(),
                    };
                    Self::send_err(&mut tx, &err).await?;
                    continue;
                }
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!(worker_id = self.worker_id.as_str(); "coordinator closed the session");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            debug!(worker_id = self.worker_id.as_str(); "received {cmd:?}");

            match self.handle(cmd, &mut rx, &mut rx_buf).await {
                Ok(Reply::Ack) => tx.send(&Msg::Control(Command::Ack)).await?,
                Ok(Reply::Loss(loss)) => tx.send(&Msg::Control(Command::Loss(loss))).await?,
                Ok(Reply::Tensor(label)) => Self::send_tensor(&self.store, &mut tx, label).await?,
                Ok(Reply::Disconnect) => {
                    info!(worker_id = self.worker_id.as_str(); "disconnect received from coordinator");
                    tx.send(&Msg::Control(Command::Disconnect)).await?;
                    return Ok(());
                }
                Err(WorkerErr::Io(e)) => return Err(e.into()),
                Err(err) => {
                    warn!(worker_id = self.worker_id.as_str(); "request failed: {err}");
                    Self::send_err(&mut tx, &err).await?;
                }
            }
        }
    }

    async fn handle<R>(
        &mut self,
        cmd: Command,
        rx: &mut OnoReceiver<R>,
        rx_buf: &mut Vec<f32>,
    ) -> Result<Reply>
    where
        R: AsyncRead + Unpin + Send,
    {
        match cmd {
            Command::ClearObjects => {
                let dropped = self.store.tensor_count();
                debug!(worker_id = self.worker_id.as_str(); "dropping {dropped} stored tensor(s)");
                self.store.clear();
                Ok(Reply::Ack)
            }
            Command::StoreTensor { label, shape } => {
                self.store_tensor(rx, rx_buf, label, shape).await
            }
            Command::SetTrainConfig(config) => {
                self.store.set_config(config);
                Ok(Reply::Ack)
            }
            Command::StorePlan(plan) => {
                self.store.insert_plan(plan);
                Ok(Reply::Ack)
            }
            Command::Fit { dataset_key, epoch } => {
                self.fit(dataset_key, epoch).await.map(Reply::Loss)
            }
            Command::FetchTensor { label } => match self.store.tensor(&label) {
                Some(_) => Ok(Reply::Tensor(label)),
                None => Err(WorkerErr::MissingObject(format!("tensor {label}"))),
            },
            Command::Disconnect => Ok(Reply::Disconnect),
            Command::Ack | Command::Loss(_) | Command::Tensor { .. } => {
                Err(WorkerErr::UnexpectedMessage {
                    expected: "request",
                    got: "reply",
                })
            }
        }
    }

    /// Reads the `Data` frame that follows a `StoreTensor` header.
    async fn store_tensor<R>(
        &mut self,
        rx: &mut OnoReceiver<R>,
        rx_buf: &mut Vec<f32>,
        label: String,
        shape: Vec<usize>,
    ) -> Result<Reply>
    where
        R: AsyncRead + Unpin + Send,
    {
        let values = match rx.recv_into(rx_buf).await? {
            Msg::Data(values) => values.to_vec(),
            other => {
                return Err(WorkerErr::UnexpectedMessage {
                    expected: "data",
                    got: other.kind(),
                });
            }
        };

        let tensor = Tensor::new(&label, shape, values)?;
        self.store.insert_tensor(label, tensor);
        Ok(Reply::Ack)
    }

    /// Runs the stored plan over this worker's stored parameter tensors.
    ///
    /// The trainer and the tensors are moved onto the blocking pool for the
    /// run and put back afterwards.
    async fn fit(&mut self, dataset_key: String, epoch: usize) -> Result<f32> {
        let config = self
            .store
            .config()
            .cloned()
            .ok_or_else(|| WorkerErr::MissingObject("train config".into()))?;

        let plan = self
            .store
            .plan(&config.plan_id)
            .cloned()
            .ok_or_else(|| WorkerErr::MissingObject(format!("plan {}", config.plan_id)))?;

        let labels: Vec<_> = (0..config.tensor_count)
            .map(|i| tensor_label(&config.param_label_prefix, &self.worker_id, i))
            .collect();

        let mut trainer = self
            .trainer
            .take()
            .ok_or_else(|| WorkerErr::Training("trainer lost by an earlier run".into()))?;

        let mut params = match self.store.take_tensors(&labels) {
            Ok(params) => params,
            Err(e) => {
                self.trainer = Some(trainer);
                return Err(e);
            }
        };

        let (trainer, params, loss) = task::spawn_blocking(move || {
            let job = TrainJob {
                params: &mut params,
                config: &config,
                plan: &plan,
                dataset_key: &dataset_key,
                epoch,
            };
            let loss = trainer.train(job);
            (trainer, params, loss)
        })
        .await
        .map_err(|e| WorkerErr::Training(format!("trainer panicked: {e}")))?;

        self.trainer = Some(trainer);
        for (label, tensor) in labels.into_iter().zip(params) {
            self.store.insert_tensor(label, tensor);
        }

        let loss = loss?;
        debug!(worker_id = self.worker_id.as_str(); "epoch {epoch} finished with loss {loss}");
        Ok(loss)
    }

    async fn send_tensor<W>(store: &ObjectStore, tx: &mut OnoSender<W>, label: String) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let Some(tensor) = store.tensor(&label) else {
            let err = WorkerErr::MissingObject(format!("tensor {label}"));
            return Self::send_err(tx, &err).await;
        };

        let header = Msg::Control(Command::Tensor {
            label,
            shape: tensor.shape.clone(),
        });

        tx.send(&header).await?;
        tx.send(&Msg::Data(&tensor.values)).await
    }

    async fn send_err<W>(tx: &mut OnoSender<W>, err: &WorkerErr) -> io::Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let msg = Msg::Err(Cow::Owned(err.to_string()));
        tx.send(&msg).await
    }
}
