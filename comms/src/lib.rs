//! Framed messaging between the coordinator and its workers.
//!
//! Every frame is a big endian `u64` length followed by a `u32` kind header
//! and the kind's payload, see `msg::Msg`.

mod align;
mod deserialize;
pub mod msg;
mod receiver;
mod sender;
mod serialize;
pub mod specs;

use tokio::io::{AsyncRead, AsyncWrite};

pub use align::{Align1, Align4};
pub use deserialize::Deserialize;
pub use receiver::OnoReceiver;
pub use sender::OnoSender;
pub use serialize::Serialize;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Largest frame either end accepts, a corrupted length prefix would
/// otherwise make the receiver allocate whatever the peer claims.
const MAX_FRAME_LEN: usize = u32::MAX as usize;

/// Wraps a reader and a writer into the two ends of a session channel.
///
/// # Arguments
/// * `rx` - Where incoming frames are read from.
/// * `tx` - Where outgoing frames are written to.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
