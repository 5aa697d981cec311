use std::net::SocketAddr;

use comms::{OnoReceiver, msg::Msg};
use log::{debug, info, warn};
use tokio::{
    io::{self, AsyncRead},
    net::TcpListener,
};

use super::WorkerRegistry;
use crate::{
    error::{CoordinatorError, Result},
    session::{WorkerAddr, WorkerSession},
};

/// Accepts worker registrations and feeds them into the registry.
///
/// Runs independently of the rounds, a registration never waits for one.
pub struct RegistrationListener {
    listener: TcpListener,
    registry: WorkerRegistry,
}

impl RegistrationListener {
    /// Binds the registration endpoint.
    ///
    /// # Arguments
    /// * `host` - The interface to listen on.
    /// * `port` - The port to listen on, `0` picks a free one.
    /// * `registry` - Where accepted workers are stored.
    pub async fn bind(host: &str, port: u16, registry: WorkerRegistry) -> io::Result<Self> {
        let listener = TcpListener::bind((host, port)).await?;
        info!("listening for workers on {}", listener.local_addr()?);
        Ok(Self { listener, registry })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts registration channels forever, each one on its own task.
    ///
    /// # Errors
    /// Returns `io::Error` only if accepting fails.
    pub async fn run(self) -> io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            debug!("registration channel opened by {addr}");

            let registry = self.registry.clone();
            tokio::spawn(async move {
                let (rx, tx) = stream.into_split();
                let (rx, _tx) = comms::channel(rx, tx);

                if let Err(e) = accept_worker(rx, &registry).await {
                    warn!("registration from {addr} failed: {e}");
                }
            });
        }
    }
}

/// Serves one registration channel.
///
/// Reads the worker's id, host and port, registers it and then holds the
/// channel until the worker closes it.
///
/// # Errors
/// `InvalidRegistration` on anything but three text frames with a valid
/// port, otherwise whatever `WorkerRegistry::register` fails with.
pub async fn accept_worker<R>(mut rx: OnoReceiver<R>, registry: &WorkerRegistry) -> Result<WorkerSession>
where
    R: AsyncRead + Unpin,
{
    let mut rx_buf: Vec<u32> = Vec::new();

    let worker_id = recv_text(&mut rx, &mut rx_buf, "worker id").await?;
    let host = recv_text(&mut rx, &mut rx_buf, "worker host").await?;
    let port = recv_text(&mut rx, &mut rx_buf, "worker port").await?;

    let port: u16 = port.trim().parse().map_err(|e| {
        CoordinatorError::InvalidRegistration(format!("worker port {port:?}: {e}"))
    })?;

    if worker_id.is_empty() || host.is_empty() {
        return Err(CoordinatorError::InvalidRegistration(
            "worker id and host must not be empty".into(),
        ));
    }

    info!(worker_id = worker_id.as_str(); "registration received for {host}:{port}");
    let session = registry.register(worker_id, WorkerAddr::new(host, port)).await?;

    while rx.recv_into::<Msg, _>(&mut rx_buf).await.is_ok() {}
    debug!(worker_id = session.id(); "registration channel closed");

    Ok(session)
}

async fn recv_text<R>(rx: &mut OnoReceiver<R>, rx_buf: &mut Vec<u32>, what: &str) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    match rx.recv_into(rx_buf).await {
        Ok(Msg::Text(text)) => Ok(text.into_owned()),
        Ok(other) => Err(CoordinatorError::InvalidRegistration(format!(
            "expected {what} as text, got {}",
            other.kind()
        ))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(
            CoordinatorError::InvalidRegistration(format!("channel closed before the {what}")),
        ),
        Err(e) => Err(e.into()),
    }
}
