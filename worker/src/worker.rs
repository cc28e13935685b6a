use std::{io, sync::Arc};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
    specs::{Points, WorkerFailure},
};
use estimators::{Catalog, Dataset};
use log::{debug, info, warn};
use ndarray::ArrayView2;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    WorkerUnit,
    error::{Result, WorkerErr},
};

/// Serves a single coordinator connection.
pub struct Worker {
    unit: WorkerUnit,
}

impl Worker {
    /// Creates a new `Worker`.
    ///
    /// # Arguments
    /// * `catalog` - The estimators this worker knows how to build.
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self {
            unit: WorkerUnit::new(catalog),
        }
    }

    /// Answers the coordinator's requests until it disconnects.
    ///
    /// # Arguments
    /// * `rx` - Receiving end of the coordinator channel.
    /// * `tx` - Sending end of the coordinator channel.
    ///
    /// # Returns
    /// `Ok(())` once the coordinator says `Disconnect` or closes the stream.
    ///
    /// # Errors
    /// Returns `WorkerErr` on I/O failures or protocol violations.
    pub async fn run<R, W>(mut self, mut rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut buf: Vec<u64> = Vec::new();

        loop {
            let cmd = match rx.recv_into(&mut buf).await {
                Ok(Msg::Control(cmd)) => cmd,
                Ok(Msg::Err(detail)) => {
                    warn!(worker_id = self.unit.worker_id(); "coordinator reported: {detail}");
                    continue;
                }
                Ok(msg) => return Err(WorkerErr::UnexpectedMessage { got: msg.kind() }),
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!(worker_id = self.unit.worker_id(); "coordinator closed the connection");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };

            match cmd {
                Command::LoadDataset(spec) => {
                    let (features, targets) = comms::recv_dataset(&spec, &mut rx, &mut buf).await?;
                    let dataset = Dataset::from_flat(features, spec.nfeatures, targets)?;
                    self.unit.load_dataset(dataset);
                }
                Command::Assign(spec) => {
                    let reply = match self.unit.assign(spec) {
                        Ok(hosted) => Command::AssignAck {
                            worker_id: self.unit.worker_id(),
                            hosted,
                        },
                        Err(failure) => Command::Failure(failure),
                    };
                    tx.send(&Msg::Control(reply)).await?;
                }
                Command::Fit => {
                    let report = self.unit.fit();
                    debug!(
                        worker_id = report.worker_id,
                        outcomes = report.outcomes.len();
                        "sending fit report"
                    );
                    tx.send(&Msg::Control(Command::FitAck(report))).await?;
                }
                Command::Predict(spec) => {
                    let answer = match spec.points {
                        Points::Inline { nrows, ncols } => {
                            match recv_points(&mut rx, &mut buf, nrows, ncols).await? {
                                Ok(points) => self.unit.predict(&spec, Some(points)),
                                Err(failure) => Err(failure),
                            }
                        }
                        Points::Dataset { .. } => self.unit.predict(&spec, None),
                    };

                    match answer {
                        Ok(values) => {
                            tx.send(&Msg::Data(Payload::Predictions(&values))).await?;
                        }
                        Err(failure) => {
                            warn!(worker_id = self.unit.worker_id(); "refusing prediction: {failure}");
                            tx.send(&Msg::Control(Command::Failure(failure))).await?;
                        }
                    }
                }
                Command::Export { estimators } => {
                    let reply = match self.unit.export(&estimators) {
                        Ok(states) => Command::Exported(states),
                        Err(failure) => Command::Failure(failure),
                    };
                    tx.send(&Msg::Control(reply)).await?;
                }
                Command::Restore(spec) => {
                    let reply = match self.unit.restore(spec) {
                        Ok(hosted) => Command::AssignAck {
                            worker_id: self.unit.worker_id(),
                            hosted,
                        },
                        Err(failure) => Command::Failure(failure),
                    };
                    tx.send(&Msg::Control(reply)).await?;
                }
                Command::Disconnect => {
                    info!(worker_id = self.unit.worker_id(); "coordinator disconnected, wrapping up");
                    tx.send(&Msg::Control(Command::Disconnect)).await?;
                    tx.shutdown().await?;
                    return Ok(());
                }
                other => {
                    let failure = WorkerFailure::Rejected {
                        detail: format!("{} is not a request", Msg::Control(other).kind()),
                    };
                    tx.send(&Msg::Control(Command::Failure(failure))).await?;
                }
            }
        }
    }
}

/// Receives the inline points that follow a prediction request.
///
/// The outer result carries transport errors, the inner one whether the
/// points match the announced shape.
async fn recv_points<'buf, R>(
    rx: &mut OnoReceiver<R>,
    buf: &'buf mut Vec<u64>,
    nrows: usize,
    ncols: usize,
) -> Result<std::result::Result<ArrayView2<'buf, f64>, WorkerFailure>>
where
    R: AsyncRead + Unpin + Send,
{
    let msg: Msg<'buf> = rx.recv_into(buf).await?;
    let values = match msg {
        Msg::Data(Payload::Points(values)) => values,
        msg => return Err(WorkerErr::UnexpectedMessage { got: msg.kind() }),
    };

    Ok(ArrayView2::from_shape((nrows, ncols), values).map_err(|e| {
        WorkerFailure::Rejected {
            detail: format!("{} values do not form {nrows}x{ncols} points: {e}", values.len()),
        }
    }))
}
