use std::{num::NonZeroUsize, sync::Arc};

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg, Payload},
    specs::{
        AssignmentSpec, DatasetSpec, EstimatorAssignment, EstimatorSpec, FitStatus, Points,
        PredictSpec, RestoreSpec, WorkerFailure,
    },
};
use estimators::Catalog;
use tokio::{
    io::{self, DuplexStream, ReadHalf, WriteHalf},
    task::JoinHandle,
};
use worker::{Worker, WorkerErr};

type Rx = OnoReceiver<ReadHalf<DuplexStream>>;
type Tx = OnoSender<WriteHalf<DuplexStream>>;

/// Spawns a worker and returns the coordinator's ends of its connection.
fn spawn_worker() -> (Rx, Tx, JoinHandle<Result<(), WorkerErr>>) {
    let (ours, theirs) = io::duplex(4096);
    let (rx, tx) = io::split(theirs);
    let (rx, tx) = comms::channel(rx, tx);
    let handle = tokio::spawn(Worker::new(Arc::new(Catalog::new())).run(rx, tx));

    let (rx, tx) = io::split(ours);
    let (rx, tx) = comms::channel(rx, tx);
    (rx, tx, handle)
}

/// `y = 3x - 1` over `x = 0..10`.
fn line() -> (Vec<f64>, Vec<f64>) {
    let features: Vec<f64> = (0..10).map(|i| i as f64).collect();
    let targets = features.iter().map(|x| 3.0 * x - 1.0).collect();
    (features, targets)
}

async fn load_line(tx: &mut Tx) {
    let (features, targets) = line();
    let spec = DatasetSpec {
        nrows: 10,
        nfeatures: 1,
        chunk_rows: NonZeroUsize::new(3).unwrap(),
    };

    for msg in comms::dataset_msgs(spec, &features, &targets) {
        tx.send(&msg).await.unwrap();
    }
}

async fn recv_command(rx: &mut Rx, buf: &mut Vec<u64>) -> Command {
    match rx.recv_into(buf).await.unwrap() {
        Msg::Control(cmd) => cmd,
        other => panic!("expected a command, got {}", other.kind()),
    }
}

async fn assign(rx: &mut Rx, tx: &mut Tx, buf: &mut Vec<u64>, subsets: Vec<(usize, Vec<usize>)>) {
    let nsubsets = subsets.len();
    let spec = AssignmentSpec {
        worker_id: 2,
        estimator: EstimatorSpec::Linear {
            fit_intercept: true,
        },
        estimators: subsets
            .into_iter()
            .map(|(estimator_id, rows)| EstimatorAssignment {
                estimator_id,
                rows,
                seed: 0,
            })
            .collect(),
    };

    tx.send(&Msg::Control(Command::Assign(spec))).await.unwrap();
    assert_eq!(
        recv_command(rx, buf).await,
        Command::AssignAck {
            worker_id: 2,
            hosted: nsubsets,
        }
    );
}

#[tokio::test]
async fn full_session_over_the_wire() {
    let (mut rx, mut tx, handle) = spawn_worker();
    let mut buf: Vec<u64> = Vec::new();

    load_line(&mut tx).await;
    assign(&mut rx, &mut tx, &mut buf, vec![(0, vec![0, 1, 2, 3, 4]), (1, vec![5, 6, 7, 8, 9])]).await;

    tx.send(&Msg::Control(Command::Fit)).await.unwrap();
    let Command::FitAck(report) = recv_command(&mut rx, &mut buf).await else {
        panic!("expected a fit report");
    };
    assert_eq!(report.worker_id, 2);
    assert_eq!(report.outcomes[0].status, FitStatus::Fitted { center: vec![2.0] });
    assert_eq!(report.outcomes[1].status, FitStatus::Fitted { center: vec![7.0] });

    let spec = PredictSpec {
        estimators: vec![1, 0],
        points: Points::Inline { nrows: 2, ncols: 1 },
    };
    tx.send(&Msg::Control(Command::Predict(spec))).await.unwrap();
    tx.send(&Msg::Data(Payload::Points(&[1.0, 2.0]))).await.unwrap();

    let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
    let values = match msg {
        Msg::Data(Payload::Predictions(values)) => values,
        other => panic!("expected predictions, got {}", other.kind()),
    };
    assert_eq!(values.len(), 4);
    for (got, expected) in values.iter().zip([2.0, 5.0, 2.0, 5.0]) {
        assert!((got - expected).abs() < 1e-9);
    }

    tx.send(&Msg::Control(Command::Disconnect)).await.unwrap();
    assert_eq!(recv_command(&mut rx, &mut buf).await, Command::Disconnect);
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn predicting_an_unknown_estimator_is_a_failure() {
    let (mut rx, mut tx, _handle) = spawn_worker();
    let mut buf: Vec<u64> = Vec::new();

    load_line(&mut tx).await;
    assign(&mut rx, &mut tx, &mut buf, vec![(0, vec![0, 1, 2])]).await;

    let spec = PredictSpec {
        estimators: vec![9],
        points: Points::Dataset { rows: vec![0] },
    };
    tx.send(&Msg::Control(Command::Predict(spec))).await.unwrap();

    assert_eq!(
        recv_command(&mut rx, &mut buf).await,
        Command::Failure(WorkerFailure::UnknownEstimator { estimator_id: 9 })
    );
}

#[tokio::test]
async fn export_then_restore_on_a_fresh_worker() {
    let (mut rx, mut tx, _handle) = spawn_worker();
    let mut buf: Vec<u64> = Vec::new();

    load_line(&mut tx).await;
    assign(&mut rx, &mut tx, &mut buf, vec![(4, vec![0, 3, 6, 9])]).await;
    tx.send(&Msg::Control(Command::Fit)).await.unwrap();
    recv_command(&mut rx, &mut buf).await;

    tx.send(&Msg::Control(Command::Export { estimators: vec![4] }))
        .await
        .unwrap();
    let Command::Exported(states) = recv_command(&mut rx, &mut buf).await else {
        panic!("expected exported states");
    };
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].center, vec![4.5]);

    let (mut rx, mut tx, _handle) = spawn_worker();
    let spec = RestoreSpec {
        worker_id: 0,
        estimators: states,
    };
    tx.send(&Msg::Control(Command::Restore(spec))).await.unwrap();
    assert_eq!(
        recv_command(&mut rx, &mut buf).await,
        Command::AssignAck {
            worker_id: 0,
            hosted: 1,
        }
    );

    let spec = PredictSpec {
        estimators: vec![4],
        points: Points::Inline { nrows: 1, ncols: 1 },
    };
    tx.send(&Msg::Control(Command::Predict(spec))).await.unwrap();
    tx.send(&Msg::Data(Payload::Points(&[10.0]))).await.unwrap();

    let msg: Msg = rx.recv_into(&mut buf).await.unwrap();
    let values = match msg {
        Msg::Data(Payload::Predictions(values)) => values,
        other => panic!("expected predictions, got {}", other.kind()),
    };
    assert!((values[0] - 29.0).abs() < 1e-9);
}

#[tokio::test]
async fn closing_the_stream_ends_the_worker() {
    let (rx, tx, handle) = spawn_worker();
    drop((rx, tx));
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn stray_data_is_a_protocol_violation() {
    let (_rx, mut tx, handle) = spawn_worker();
    tx.send(&Msg::Data(Payload::Targets(&[1.0]))).await.unwrap();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, WorkerErr::UnexpectedMessage { got: "data/targets" }));
}
