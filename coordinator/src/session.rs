use std::{borrow::Cow, fmt, io, num::NonZeroU32, sync::Arc, time::Duration};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg},
    specs::tensor_label,
};
use log::{debug, warn};
use ndarray::IxDyn;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    sync::Mutex,
};

use crate::{
    configs::TrainingConfig,
    error::{CoordinatorError, Result},
    model::{Tensor, TrainPlan},
};

type BoxedRx = Box<dyn AsyncRead + Send + Unpin>;
type BoxedTx = Box<dyn AsyncWrite + Send + Unpin>;

/// Where a worker answers its session requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerAddr {
    pub host: String,
    pub port: u16,
}

impl WorkerAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for WorkerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An open request/response channel to one worker.
pub struct Connection {
    rx: OnoReceiver<BoxedRx>,
    tx: OnoSender<BoxedTx>,
    rx_buf: Vec<f32>,
}

impl Connection {
    /// Creates a new `Connection` over any pair of byte streams.
    ///
    /// # Arguments
    /// * `rx` - The reading half of the stream.
    /// * `tx` - The writing half of the stream.
    pub fn new<R, W>(rx: R, tx: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (rx, tx) = comms::channel(Box::new(rx) as BoxedRx, Box::new(tx) as BoxedTx);

        Self {
            rx,
            tx,
            rx_buf: Vec::new(),
        }
    }

    async fn request(&mut self, cmd: Command) -> io::Result<Command> {
        self.tx.send(&Msg::Control(cmd)).await?;
        self.reply().await
    }

    async fn reply(&mut self) -> io::Result<Command> {
        match self.rx.recv_into(&mut self.rx_buf).await? {
            Msg::Control(cmd) => Ok(cmd),
            Msg::Err(reason) => Err(io::Error::other(reason.into_owned())),
            other => Err(unexpected("a control reply", other.kind())),
        }
    }

    async fn expect_ack(&mut self, cmd: Command) -> io::Result<()> {
        match self.request(cmd).await? {
            Command::Ack => Ok(()),
            other => Err(unexpected("ack", &format!("{other:?}"))),
        }
    }

    async fn store_tensor(&mut self, label: String, tensor: &Tensor) -> io::Result<()> {
        let header = Msg::Control(Command::StoreTensor {
            label,
            shape: tensor.shape().to_vec(),
        });
        self.tx.send(&header).await?;

        let values: Cow<'_, [f32]> = match tensor.as_slice() {
            Some(values) => Cow::Borrowed(values),
            None => Cow::Owned(tensor.iter().copied().collect()),
        };
        self.tx.send(&Msg::Data(&values)).await?;

        match self.reply().await? {
            Command::Ack => Ok(()),
            other => Err(unexpected("ack", &format!("{other:?}"))),
        }
    }

    async fn fetch_tensor(&mut self, label: &str) -> io::Result<(Vec<usize>, Vec<f32>)> {
        let cmd = Command::FetchTensor {
            label: label.to_string(),
        };

        let shape = match self.request(cmd).await? {
            Command::Tensor { label: got, shape } if got == label => shape,
            other => return Err(unexpected(&format!("tensor {label}"), &format!("{other:?}"))),
        };

        match self.rx.recv_into(&mut self.rx_buf).await? {
            Msg::Data(values) => Ok((shape, values.to_vec())),
            Msg::Err(reason) => Err(io::Error::other(reason.into_owned())),
            other => Err(unexpected("tensor data", other.kind())),
        }
    }
}

fn unexpected(expected: &str, got: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("expected {expected}, got {got}"),
    )
}

/// Opens connections to workers.
///
/// The seam between sessions and the transport, tests dial in-memory workers.
#[async_trait::async_trait]
pub trait Dial: Send + Sync {
    async fn dial(&self, addr: &WorkerAddr) -> io::Result<Connection>;
}

/// Dials workers over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpDial;

#[async_trait::async_trait]
impl Dial for TcpDial {
    async fn dial(&self, addr: &WorkerAddr) -> io::Result<Connection> {
        let stream = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
        stream.set_nodelay(true)?;

        let (rx, tx) = stream.into_split();
        Ok(Connection::new(rx, tx))
    }
}

/// Identifies one parameter tensor stored on a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterHandle {
    pub index: usize,
    pub label: String,
    pub shape: Vec<usize>,
}

struct Inner {
    worker_id: String,
    addr: WorkerAddr,
    dial: Arc<dyn Dial>,
    conn: Mutex<Option<Connection>>,
}

/// The coordinator side proxy to one worker.
///
/// Cloning is cheap, every clone drives the same connection. A connection is
/// only put back after a step succeeded: a failed or cancelled step drops it
/// and the next step dials the worker again.
#[derive(Clone)]
pub struct WorkerSession {
    inner: Arc<Inner>,
}

impl WorkerSession {
    /// Creates a new, not yet connected, `WorkerSession`.
    ///
    /// # Arguments
    /// * `worker_id` - The identity the worker announced.
    /// * `addr` - Where the worker serves its session.
    /// * `dial` - How to reach it.
    pub fn new(worker_id: impl Into<String>, addr: WorkerAddr, dial: Arc<dyn Dial>) -> Self {
        let inner = Inner {
            worker_id: worker_id.into(),
            addr,
            dial,
            conn: Mutex::new(None),
        };

        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.worker_id
    }

    pub fn addr(&self) -> &WorkerAddr {
        &self.inner.addr
    }

    /// Whether both handles drive the same session.
    pub fn same_session(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Dials the worker until it answers.
    ///
    /// # Arguments
    /// * `attempts` - The maximum amount of dials.
    /// * `backoff` - Delay after the first failed dial, grows linearly with every attempt.
    ///
    /// # Errors
    /// Returns `CoordinatorError::WorkerUnavailable` with the last dial error.
    pub async fn connect(&self, attempts: NonZeroU32, backoff: Duration) -> Result<()> {
        let mut slot = self.inner.conn.lock().await;
        if slot.is_some() {
            return Ok(());
        }

        let mut attempt = 1;
        loop {
            match self.inner.dial.dial(&self.inner.addr).await {
                Ok(conn) => {
                    *slot = Some(conn);
                    return Ok(());
                }
                Err(e) if attempt < attempts.get() => {
                    warn!(worker_id = self.id(); "dial {attempt}/{attempts} to {} failed: {e}", self.inner.addr);
                    tokio::time::sleep(backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(self.unavailable(e)),
            }
        }
    }

    /// Clears every object previous rounds left on the worker.
    pub async fn reset_remote_state(&self) -> Result<()> {
        let mut slot = self.inner.conn.lock().await;
        let mut conn = self.checkout(&mut slot).await?;

        conn.expect_ack(Command::ClearObjects)
            .await
            .map_err(|e| self.unavailable(e))?;

        *slot = Some(conn);
        Ok(())
    }

    /// Sends every parameter tensor under a label unique to this worker.
    ///
    /// # Arguments
    /// * `params` - The round's parameter snapshot.
    /// * `label_prefix` - The configured tensor label prefix.
    ///
    /// # Returns
    /// One handle per tensor, in order.
    pub async fn push_parameters(
        &self,
        params: &[Tensor],
        label_prefix: &str,
    ) -> Result<Vec<ParameterHandle>> {
        let mut slot = self.inner.conn.lock().await;
        let mut conn = self.checkout(&mut slot).await?;
        let mut handles = Vec::with_capacity(params.len());

        for (index, param) in params.iter().enumerate() {
            let label = tensor_label(label_prefix, self.id(), index);

            conn.store_tensor(label.clone(), param)
                .await
                .map_err(|e| self.unavailable(e))?;

            handles.push(ParameterHandle {
                index,
                label,
                shape: param.shape().to_vec(),
            });
        }

        *slot = Some(conn);
        Ok(handles)
    }

    /// Sends the hyperparameters along with the amount of tensors pushed before.
    pub async fn push_train_config(&self, config: &TrainingConfig, tensor_count: usize) -> Result<()> {
        let mut slot = self.inner.conn.lock().await;
        let mut conn = self.checkout(&mut slot).await?;

        let cmd = Command::SetTrainConfig(config.to_spec(tensor_count));
        conn.expect_ack(cmd).await.map_err(|e| self.unavailable(e))?;

        *slot = Some(conn);
        Ok(())
    }

    /// Sends a fresh copy of the plan under its logical id.
    pub async fn push_train_plan(&self, plan: &TrainPlan) -> Result<()> {
        let mut slot = self.inner.conn.lock().await;
        let mut conn = self.checkout(&mut slot).await?;

        let cmd = Command::StorePlan(plan.to_spec());
        conn.expect_ack(cmd).await.map_err(|e| self.unavailable(e))?;

        *slot = Some(conn);
        Ok(())
    }

    /// Runs the stored plan on the worker.
    ///
    /// # Arguments
    /// * `dataset_key` - The dataset the worker trains on.
    /// * `epoch` - The round index.
    ///
    /// # Returns
    /// The loss the worker reported once it finished.
    pub async fn invoke_training(&self, dataset_key: &str, epoch: usize) -> Result<f32> {
        let mut slot = self.inner.conn.lock().await;
        let mut conn = self.checkout(&mut slot).await?;

        let cmd = Command::Fit {
            dataset_key: dataset_key.to_string(),
            epoch,
        };

        let loss = match conn.request(cmd).await {
            Ok(Command::Loss(loss)) => loss,
            Ok(other) => return Err(self.unavailable(unexpected("loss", &format!("{other:?}")))),
            Err(e) => return Err(self.unavailable(e)),
        };

        *slot = Some(conn);
        Ok(loss)
    }

    /// Retrieves the trained value of the tensor behind `handle`.
    ///
    /// Only meaningful once `invoke_training` returned.
    pub async fn fetch_parameter(&self, handle: &ParameterHandle) -> Result<Tensor> {
        let mut slot = self.inner.conn.lock().await;
        let mut conn = self.checkout(&mut slot).await?;

        let (shape, values) = conn
            .fetch_tensor(&handle.label)
            .await
            .map_err(|e| self.unavailable(e))?;

        *slot = Some(conn);

        Tensor::from_shape_vec(IxDyn(&shape), values).map_err(|e| {
            let e = io::Error::new(io::ErrorKind::InvalidData, format!("{}: {e}", handle.label));
            self.unavailable(e)
        })
    }

    /// Tells the worker the session is over, errors are ignored.
    pub async fn disconnect(&self) {
        let Some(mut conn) = self.inner.conn.lock().await.take() else {
            return;
        };

        if let Err(e) = conn.request(Command::Disconnect).await {
            debug!(worker_id = self.id(); "disconnect not acknowledged: {e}");
        }
    }

    /// Takes the open connection out of `slot`, dialing once if there is none.
    async fn checkout(&self, slot: &mut Option<Connection>) -> Result<Connection> {
        if let Some(conn) = slot.take() {
            return Ok(conn);
        }

        debug!(worker_id = self.id(); "dialing {}", self.inner.addr);
        self.inner
            .dial
            .dial(&self.inner.addr)
            .await
            .map_err(|e| self.unavailable(e))
    }

    fn unavailable(&self, source: io::Error) -> CoordinatorError {
        CoordinatorError::WorkerUnavailable {
            worker_id: self.id().to_string(),
            source,
        }
    }
}

impl fmt::Debug for WorkerSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerSession")
            .field("worker_id", &self.inner.worker_id)
            .field("addr", &self.inner.addr)
            .finish()
    }
}
