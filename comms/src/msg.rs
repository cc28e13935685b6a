use std::{borrow::Cow, io};

use crate::{
    Deserialize, Serialize,
    specs::{AssignmentSpec, DatasetSpec, EstimatorState, FitReport, PredictSpec, RestoreSpec, WorkerFailure},
};

type Header = u64;
const HEADER_SIZE: usize = size_of::<Header>();

/// The payload data for the `Data` variant of the `Msg` enum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    /// A row-major chunk of the dataset's features.
    Features(&'a [f64]),
    /// The dataset's targets.
    Targets(&'a [f64]),
    /// Row-major points to predict on.
    Points(&'a [f64]),
    /// Prediction blocks, one per requested estimator.
    Predictions(&'a [f64]),
}

impl<'a> Payload<'a> {
    fn kind(&self) -> u8 {
        match self {
            Payload::Features(_) => 2,
            Payload::Targets(_) => 3,
            Payload::Points(_) => 4,
            Payload::Predictions(_) => 5,
        }
    }

    /// The numbers carried by the payload.
    pub fn values(&self) -> &'a [f64] {
        match *self {
            Payload::Features(v)
            | Payload::Targets(v)
            | Payload::Points(v)
            | Payload::Predictions(v) => v,
        }
    }
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    LoadDataset(DatasetSpec),
    Assign(AssignmentSpec),
    AssignAck { worker_id: usize, hosted: usize },
    Fit,
    FitAck(FitReport),
    Predict(PredictSpec),
    Export { estimators: Vec<usize> },
    Exported(Vec<EstimatorState>),
    Restore(RestoreSpec),
    Failure(WorkerFailure),
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short label of the message variant, used in logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(Command::LoadDataset(_)) => "control/load_dataset",
            Msg::Control(Command::Assign(_)) => "control/assign",
            Msg::Control(Command::AssignAck { .. }) => "control/assign_ack",
            Msg::Control(Command::Fit) => "control/fit",
            Msg::Control(Command::FitAck(_)) => "control/fit_ack",
            Msg::Control(Command::Predict(_)) => "control/predict",
            Msg::Control(Command::Export { .. }) => "control/export",
            Msg::Control(Command::Exported(_)) => "control/exported",
            Msg::Control(Command::Restore(_)) => "control/restore",
            Msg::Control(Command::Failure(_)) => "control/failure",
            Msg::Control(Command::Disconnect) => "control/disconnect",
            Msg::Data(Payload::Features(_)) => "data/features",
            Msg::Data(Payload::Targets(_)) => "data/targets",
            Msg::Data(Payload::Points(_)) => "data/points",
            Msg::Data(Payload::Predictions(_)) => "data/predictions",
            Msg::Err(_) => "err",
        }
    }

    /// Builds the error returned when a peer sends something the protocol doesn't allow here.
    pub fn unexpected(&self, expected: &str) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("expected {expected}, got {}", self.kind()),
        )
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind_byte<T>(byte: u8) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind byte {byte}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                let header = (0 as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                let header = (1 as Header).to_be_bytes();
                buf.extend_from_slice(&header);

                serde_json::to_writer(buf, &cmd)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                Ok(None)
            }
            Msg::Data(payload) => {
                let header = (payload.kind() as Header).to_be_bytes();
                buf.extend_from_slice(&header);
                Ok(Some(bytemuck::cast_slice(payload.values())))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        let Some((kind_buf, rest)) = buf.split_first_chunk::<HEADER_SIZE>() else {
            return Self::buf_is_too_small(buf.len());
        };

        let kind = Header::from_be_bytes(*kind_buf) as u8;

        match kind {
            0 => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            1 => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            2..6 => {
                let nums: &[f64] = bytemuck::try_cast_slice(rest).map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("malformed numeric payload of {} bytes: {e}", rest.len()),
                    )
                })?;

                let payload = match kind {
                    2 => Payload::Features(nums),
                    3 => Payload::Targets(nums),
                    4 => Payload::Points(nums),
                    5 => Payload::Predictions(nums),
                    _ => unreachable!(),
                };

                Ok(Self::Data(payload))
            }
            byte => Self::invalid_kind_byte(byte),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_survives_serialization() {
        let msg = Msg::Control(Command::Export {
            estimators: vec![3, 1, 2],
        });

        let mut buf = Vec::new();
        assert!(msg.serialize(&mut buf).unwrap().is_none());

        let got = Msg::deserialize(&buf).unwrap();
        assert_eq!(got, msg);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let buf = (9 as Header).to_be_bytes();
        let err = Msg::deserialize(&buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let err = Msg::deserialize(&[0, 1, 2]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
