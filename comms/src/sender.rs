use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, MAX_FRAME_LEN, Serialize};

/// The writing end of a session channel.
///
/// Keeps one scratch buffer for the length prefix and the serialized header,
/// payloads that are already contiguous in memory are written straight after it.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Writes `msg` as one frame and flushes it.
    ///
    /// # Errors
    /// `InvalidInput` if the frame is over the limit the receiving end
    /// accepts, nothing is written in that case. Otherwise whatever the
    /// underlying writer fails with.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);

        let payload = msg.serialize(buf);
        let len = buf.len() - LEN_TYPE_SIZE + payload.map_or(0, <[u8]>::len);

        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("frame of {len} bytes exceeds the {MAX_FRAME_LEN} bytes limit"),
            ));
        }

        buf[..LEN_TYPE_SIZE].copy_from_slice(&(len as LenType).to_be_bytes());
        tx.write_all(buf).await?;

        if let Some(payload) = payload {
            tx.write_all(payload).await?;
        }

        tx.flush().await
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::AsyncReadExt;

    use super::*;
    use crate::msg::Msg;

    #[tokio::test]
    async fn the_length_prefix_covers_header_and_payload() -> io::Result<()> {
        let (a, mut b) = tokio::io::duplex(256);
        let mut tx = OnoSender::new(a);

        tx.send(&Msg::Data(&[1.5, -2.0])).await?;

        let mut frame = [0; LEN_TYPE_SIZE + 4 + 8];
        b.read_exact(&mut frame).await?;

        assert_eq!(frame[..LEN_TYPE_SIZE], 12u64.to_be_bytes());
        assert_eq!(frame[LEN_TYPE_SIZE..LEN_TYPE_SIZE + 4], 2u32.to_be_bytes());
        assert_eq!(frame[LEN_TYPE_SIZE + 4..LEN_TYPE_SIZE + 8], 1.5f32.to_ne_bytes());
        Ok(())
    }
}
