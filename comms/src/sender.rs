use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::{LEN_TYPE_SIZE, LenType, Serialize};

/// The sending end handle of the communication.
pub struct OnoSender<W>
where
    W: AsyncWrite + Unpin,
{
    tx: W,
    buf: Vec<u8>,
}

impl<W: AsyncWrite + Unpin> OnoSender<W> {
    /// Creates a new `OnoSender` instance.
    ///
    /// # Arguments
    /// * `tx` - The underlying writer.
    pub(super) fn new(tx: W) -> Self {
        Self {
            tx,
            buf: Vec::new(),
        }
    }

    /// Sends `msg` and flushes the writer.
    ///
    /// # Errors
    /// Any `io::Error` raised by the underlying writer.
    pub async fn send<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        self.feed(msg).await?;
        self.flush().await
    }

    /// Writes one framed message without flushing, so several can leave together.
    ///
    /// The frame is the big endian body length followed by the body; a
    /// borrowed tail returned by the serializer is written after the owned
    /// part without being copied.
    ///
    /// # Errors
    /// `InvalidData` if `msg` can't be encoded, or any `io::Error` raised by
    /// the underlying writer.
    pub async fn feed<'a, T: Serialize<'a>>(&mut self, msg: &'a T) -> io::Result<()> {
        let Self { buf, tx } = self;

        buf.clear();
        buf.resize(LEN_TYPE_SIZE, 0);

        let tail = msg.serialize(buf)?;
        let body_len = buf.len() - LEN_TYPE_SIZE + tail.map_or(0, <[_]>::len);
        buf[..LEN_TYPE_SIZE].copy_from_slice(&(body_len as LenType).to_be_bytes());

        tx.write_all(buf).await?;
        if let Some(tail) = tail {
            tx.write_all(tail).await?;
        }

        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.tx.flush().await
    }

    /// Shuts the underlying writer down, the other end will observe an end of stream.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}
