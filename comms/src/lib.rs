mod align;
mod codec;
pub mod collective;
pub mod msg;
mod receiver;
mod sender;
mod share_dataset;
pub mod specs;

use tokio::io::{AsyncRead, AsyncWrite};

pub use align::Align8;
pub use collective::Peer;
pub use codec::{Deserialize, Serialize};
pub use receiver::OnoReceiver;
pub use sender::OnoSender;
pub use share_dataset::{dataset_msgs, recv_dataset};

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// A type erased readable half, lets TCP and in-memory transports share a peer type.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// A type erased writable half, lets TCP and in-memory transports share a peer type.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Wraps the two halves of a connection into the protocol's endpoints.
///
/// # Arguments
/// * `rx` - The readable half.
/// * `tx` - The writable half.
pub fn channel<R, W>(rx: R, tx: W) -> (OnoReceiver<R>, OnoSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (OnoReceiver::new(rx), OnoSender::new(tx))
}
