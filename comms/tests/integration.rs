use std::num::NonZeroUsize;

use comms::{
    msg::{Command, Msg, Payload},
    specs::{AssignmentSpec, EstimatorAssignment, EstimatorSpec, PredictSpec, Points},
};
use tokio::io;

fn endpoints() -> (
    comms::OnoReceiver<io::ReadHalf<io::DuplexStream>>,
    comms::OnoSender<io::WriteHalf<io::DuplexStream>>,
) {
    let (one, two) = io::duplex(256);
    let (rx1, tx1) = io::split(one);
    let (rx2, tx2) = io::split(two);
    let (_, tx) = comms::channel(rx1, tx1);
    let (rx, _) = comms::channel(rx2, tx2);
    (rx, tx)
}

#[tokio::test]
async fn send_recv_control() {
    let (mut rx, mut tx) = endpoints();

    let msg = Msg::Control(Command::Assign(AssignmentSpec {
        worker_id: 2,
        estimator: EstimatorSpec::Ridge {
            alpha: 0.5,
            fit_intercept: true,
        },
        estimators: vec![EstimatorAssignment {
            estimator_id: 7,
            rows: vec![0, 4, 9],
            seed: 42,
        }],
    }));

    let send = async { tx.send(&msg).await };
    let mut buf: Vec<u64> = Vec::new();
    let recv = async {
        let got: Msg = rx.recv_into(&mut buf).await?;
        Ok::<_, std::io::Error>(got == msg)
    };

    let (sent, same) = tokio::join!(send, recv);
    sent.unwrap();
    assert!(same.unwrap());
}

#[tokio::test]
async fn payload_larger_than_pipe_is_reassembled() {
    let (mut rx, mut tx) = endpoints();

    let points: Vec<f64> = (0..1000).map(|i| i as f64 * 0.5).collect();
    let request = Msg::Control(Command::Predict(PredictSpec {
        estimators: vec![0, 1],
        points: Points::Inline {
            nrows: 500,
            ncols: 2,
        },
    }));
    let data = Msg::Data(Payload::Points(&points));

    let send = async {
        tx.send(&request).await?;
        tx.send(&data).await
    };

    let recv = async {
        let mut buf: Vec<u64> = Vec::new();
        let first: Msg = rx.recv_into(&mut buf).await?;
        assert_eq!(first, request);

        let second: Msg = rx.recv_into(&mut buf).await?;
        match second {
            Msg::Data(Payload::Points(got)) => Ok::<_, std::io::Error>(got.to_vec()),
            other => Err(other.unexpected("data/points")),
        }
    };

    let (sent, got) = tokio::join!(send, recv);
    sent.unwrap();
    assert_eq!(got.unwrap(), points);
}

#[test]
fn dataset_messages_are_chunked() {
    let spec = comms::specs::DatasetSpec {
        nrows: 5,
        nfeatures: 2,
        chunk_rows: NonZeroUsize::new(2).unwrap(),
    };
    let features = [0.0; 10];
    let targets = [1.0; 5];

    let msgs = comms::dataset_msgs(spec, &features, &targets);
    let kinds: Vec<_> = msgs.iter().map(Msg::kind).collect();
    assert_eq!(
        kinds,
        [
            "control/load_dataset",
            "data/features",
            "data/features",
            "data/features",
            "data/targets"
        ]
    );
}
