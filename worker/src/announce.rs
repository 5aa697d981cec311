use std::borrow::Cow;

use comms::{OnoReceiver, OnoSender, msg::Msg};
use log::info;
use tokio::{
    io::{self, AsyncWrite},
    net::{
        TcpStream, ToSocketAddrs,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};

/// Sends the three registration messages: id, host and port, in that order.
///
/// # Arguments
/// * `tx` - The sending end of the registration channel.
/// * `worker_id` - The unique identity of this worker.
/// * `host` - The host the coordinator should dial for sessions.
/// * `port` - The port the coordinator should dial for sessions.
pub async fn announce<W>(
    tx: &mut OnoSender<W>,
    worker_id: &str,
    host: &str,
    port: u16,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let port = port.to_string();

    for text in [worker_id, host, port.as_str()] {
        tx.send(&Msg::Text(Cow::Borrowed(text))).await?;
    }

    Ok(())
}

/// Connects to the coordinator and announces this worker.
///
/// The returned channel must be kept alive, the registration channel is
/// persistent.
pub async fn connect_and_announce<A: ToSocketAddrs>(
    coordinator: A,
    worker_id: &str,
    host: &str,
    port: u16,
) -> io::Result<(OnoReceiver<OwnedReadHalf>, OnoSender<OwnedWriteHalf>)> {
    let stream = TcpStream::connect(coordinator).await?;
    let peer = stream.peer_addr()?;
    let (rx, tx) = stream.into_split();
    let (rx, mut tx) = comms::channel(rx, tx);

    announce(&mut tx, worker_id, host, port).await?;
    info!("announced {worker_id} at {host}:{port} to coordinator {peer}");
    Ok((rx, tx))
}
