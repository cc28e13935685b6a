//! Replicates a dataset from the coordinator onto a worker.

use std::io;

use tokio::io::AsyncRead;

use crate::{
    OnoReceiver,
    msg::{Command, Msg, Payload},
    specs::DatasetSpec,
};

/// Builds the message sequence that ships a dataset: the spec, the feature
/// chunks and finally the targets.
///
/// # Arguments
/// * `spec` - The dataset's shape and chunking.
/// * `features` - Row-major features, `spec.nrows * spec.nfeatures` values.
/// * `targets` - One target per row.
pub fn dataset_msgs<'a>(spec: DatasetSpec, features: &'a [f64], targets: &'a [f64]) -> Vec<Msg<'a>> {
    let chunk = (spec.chunk_rows.get() * spec.nfeatures).max(1);

    let mut msgs = vec![Msg::Control(Command::LoadDataset(spec))];
    msgs.extend(
        features
            .chunks(chunk)
            .map(|c| Msg::Data(Payload::Features(c))),
    );
    msgs.push(Msg::Data(Payload::Targets(targets)));
    msgs
}

/// Receives the features and targets announced by `spec`.
///
/// # Returns
/// The row-major features and the targets, or an `InvalidData` error if the
/// peer deviates from the announced shape.
pub async fn recv_dataset<R>(
    spec: &DatasetSpec,
    receiver: &mut OnoReceiver<R>,
    buf: &mut Vec<u64>,
) -> io::Result<(Vec<f64>, Vec<f64>)>
where
    R: AsyncRead + Unpin,
{
    let expected = spec.feature_len();
    let mut features: Vec<f64> = Vec::with_capacity(expected);

    while features.len() < expected {
        let msg: Msg = receiver.recv_into(buf).await?;
        match msg {
            Msg::Data(Payload::Features(chunk)) => features.extend_from_slice(chunk),
            msg => return Err(msg.unexpected("data/features")),
        }
    }

    if features.len() != expected {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("received {} feature values, expected {expected}", features.len()),
        ));
    }

    let msg: Msg = receiver.recv_into(buf).await?;
    let targets = match msg {
        Msg::Data(Payload::Targets(targets)) => targets.to_vec(),
        msg => return Err(msg.unexpected("data/targets")),
    };

    if targets.len() != spec.nrows {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("received {} targets, expected {}", targets.len(), spec.nrows),
        ));
    }

    Ok((features, targets))
}
