//! Collective exchanges between the coordinator and its workers.
//!
//! Every exchange runs one future per live peer concurrently and waits for all
//! of them or for the deadline, whichever comes first. A peer that errors,
//! closes its stream or misses the deadline is marked dead and skipped by every
//! later exchange.

use std::{io, time::Duration};

use futures::future::join_all;
use log::{debug, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::timeout,
};

use crate::{BoxedReader, BoxedWriter, OnoReceiver, OnoSender, msg::Msg};

/// The coordinator's handle on a single worker.
pub struct Peer {
    id: usize,
    rx: OnoReceiver<BoxedReader>,
    tx: OnoSender<BoxedWriter>,
    buf: Vec<u64>,
    alive: bool,
}

impl Peer {
    /// Creates a new `Peer` over any pair of async halves.
    ///
    /// # Arguments
    /// * `id` - The worker identifier.
    /// * `rx` - The readable half of the connection.
    /// * `tx` - The writable half of the connection.
    pub fn new<R, W>(id: usize, rx: R, tx: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let (rx, tx) = crate::channel(Box::new(rx) as BoxedReader, Box::new(tx) as BoxedWriter);

        Self {
            id,
            rx,
            tx,
            buf: Vec::new(),
            alive: true,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Excludes the peer from every later exchange.
    pub fn mark_dead(&mut self) {
        self.alive = false;
    }

    /// Sends every message in `msgs`, in order.
    pub async fn send_all(&mut self, msgs: &[Msg<'_>]) -> io::Result<()> {
        for msg in msgs {
            self.tx.feed(msg).await?;
        }

        self.tx.flush().await
    }

    /// Waits for the next message, borrowing the peer's receive buffer.
    pub async fn recv(&mut self) -> io::Result<Msg<'_>> {
        self.rx.recv_into(&mut self.buf).await
    }

    /// Closes the writing half of the connection.
    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.tx.shutdown().await
    }
}

fn timed_out(id: usize, deadline: Duration) -> io::Error {
    io::Error::new(
        io::ErrorKind::TimedOut,
        format!("peer {id} did not answer within {deadline:?}"),
    )
}

/// Applies the deadline to `fut` and marks `peer` dead if it fails.
async fn guarded<T>(
    id: usize,
    deadline: Duration,
    fut: impl Future<Output = io::Result<T>>,
) -> io::Result<T> {
    match timeout(deadline, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(timed_out(id, deadline)),
    }
}

fn settle<T>(peer: &mut Peer, res: &io::Result<T>) {
    if let Err(e) = res {
        warn!(worker_id = peer.id; "peer failed, excluding it: {e}");
        peer.mark_dead();
    }
}

/// Sends the same messages to every live peer.
///
/// # Returns
/// The ids of the peers that failed during this exchange, with their errors.
pub async fn broadcast(
    peers: &mut [Peer],
    msgs: &[Msg<'_>],
    deadline: Duration,
) -> Vec<(usize, io::Error)> {
    let futs = peers.iter_mut().filter(|p| p.alive).map(|peer| async move {
        let id = peer.id;
        let res = guarded(id, deadline, peer.send_all(msgs)).await;
        settle(peer, &res);
        res.err().map(|e| (id, e))
    });

    let failures: Vec<_> = join_all(futs).await.into_iter().flatten().collect();
    debug!(failed = failures.len(); "broadcast finished");
    failures
}

/// Sends each live peer its own part.
///
/// `parts` is aligned with `peers`; a dead peer's part is skipped, and so is an
/// empty one.
///
/// # Returns
/// The ids of the peers that failed during this exchange, with their errors.
pub async fn scatter(
    peers: &mut [Peer],
    parts: &[Vec<Msg<'_>>],
    deadline: Duration,
) -> Vec<(usize, io::Error)> {
    let futs = peers
        .iter_mut()
        .zip(parts)
        .filter(|(p, part)| p.alive && !part.is_empty())
        .map(|(peer, part)| async move {
            let id = peer.id;
            let res = guarded(id, deadline, peer.send_all(part)).await;
            settle(peer, &res);
            res.err().map(|e| (id, e))
        });

    let failures: Vec<_> = join_all(futs).await.into_iter().flatten().collect();
    debug!(failed = failures.len(); "scatter finished");
    failures
}

/// Receives one message from each selected live peer and decodes it.
///
/// `decode` turns the borrowed message into an owned value; a decoding error
/// is treated like any other failure of the peer.
///
/// # Arguments
/// * `peers` - The worker handles.
/// * `expect` - Which peers (by position) are expected to answer.
/// * `deadline` - How long to wait for each answer.
/// * `decode` - Maps the peer id and the received message into `T`.
///
/// # Returns
/// One `(peer id, result)` pair for every selected peer that was alive.
pub async fn gather<T, F>(
    peers: &mut [Peer],
    expect: &[bool],
    deadline: Duration,
    decode: F,
) -> Vec<(usize, io::Result<T>)>
where
    F: Fn(usize, Msg<'_>) -> io::Result<T>,
{
    let decode = &decode;
    let futs = peers
        .iter_mut()
        .zip(expect)
        .filter(|(p, expected)| p.alive && **expected)
        .map(|(peer, _)| async move {
            let id = peer.id;
            let res = guarded(id, deadline, async {
                let msg = peer.recv().await?;
                decode(id, msg)
            })
            .await;

            settle(peer, &res);
            (id, res)
        });

    join_all(futs).await
}
