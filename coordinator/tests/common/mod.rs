#![allow(dead_code)]

use std::sync::Arc;

use comms::{
    Peer,
    msg::{Command, Msg},
};
use estimators::Catalog;
use ndarray::{Array1, Array2, ArrayView1};
use tokio::{io, runtime::Runtime};
use worker::Worker;

const PIPE_CAPACITY: usize = 1 << 16;

/// `y = 2 x0 - x1 + 0.5`.
pub fn truth(x: ArrayView1<f64>) -> f64 {
    2.0 * x[0] - x[1] + 0.5
}

/// A `10 x ceil(nrows / 10)` grid of points labeled by `truth`.
pub fn plane(nrows: usize) -> (Array2<f64>, Array1<f64>) {
    let features = Array2::from_shape_fn((nrows, 2), |(i, j)| match j {
        0 => (i % 10) as f64,
        _ => (i / 10) as f64 * 0.5,
    });
    let targets = features.rows().into_iter().map(truth).collect();
    (features, targets)
}

/// Ten points inside the grid, off its nodes.
pub fn queries() -> Array2<f64> {
    Array2::from_shape_fn((10, 2), |(i, j)| match j {
        0 => 0.5 + i as f64 * 0.8,
        _ => 4.5 - i as f64 * 0.3,
    })
}

pub fn assert_close(got: ArrayView1<f64>, expected: ArrayView1<f64>, tol: f64) {
    assert_eq!(got.len(), expected.len());
    for (i, (g, e)) in got.iter().zip(expected).enumerate() {
        assert!((g - e).abs() < tol, "row {i}: got {g}, expected {e}");
    }
}

/// How a fake worker misbehaves once asked to fit.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Closes the connection.
    DropOnFit,
    /// Never answers.
    SilentOnFit,
}

/// Spawns a real worker on `runtime` and returns the coordinator's handle on it.
pub fn real_peer(runtime: &Runtime, id: usize, catalog: Arc<Catalog>) -> Peer {
    let (ours, theirs) = io::duplex(PIPE_CAPACITY);
    let (rx, tx) = io::split(theirs);
    let (rx, tx) = comms::channel(rx, tx);
    runtime.spawn(Worker::new(catalog).run(rx, tx));

    let (rx, tx) = io::split(ours);
    Peer::new(id, rx, tx)
}

/// Spawns a worker that accepts the dataset and its assignment but fails at `Fit`.
pub fn faulty_peer(runtime: &Runtime, id: usize, fault: Fault) -> Peer {
    let (ours, theirs) = io::duplex(PIPE_CAPACITY);
    let (rx, tx) = io::split(theirs);

    runtime.spawn(async move {
        let (mut rx, mut tx) = comms::channel(rx, tx);
        let mut buf: Vec<u64> = Vec::new();

        loop {
            let cmd = match rx.recv_into(&mut buf).await {
                Ok(Msg::Control(cmd)) => cmd,
                _ => return,
            };

            match cmd {
                Command::LoadDataset(spec) => {
                    if comms::recv_dataset(&spec, &mut rx, &mut buf).await.is_err() {
                        return;
                    }
                }
                Command::Assign(spec) => {
                    let ack = Command::AssignAck {
                        worker_id: spec.worker_id,
                        hosted: spec.estimators.len(),
                    };
                    if tx.send(&Msg::Control(ack)).await.is_err() {
                        return;
                    }
                }
                Command::Fit => match fault {
                    Fault::DropOnFit => return,
                    Fault::SilentOnFit => std::future::pending::<()>().await,
                },
                _ => return,
            }
        }
    });

    let (rx, tx) = io::split(ours);
    Peer::new(id, rx, tx)
}

/// Spawns a real worker behind a relay that cuts the connection at its `nth` `Fit`.
pub fn peer_lost_at_fit(runtime: &Runtime, id: usize, nth: usize) -> Peer {
    let (ours, front) = io::duplex(PIPE_CAPACITY);
    let (back, theirs) = io::duplex(PIPE_CAPACITY);

    let (rx, tx) = io::split(theirs);
    let (rx, tx) = comms::channel(rx, tx);
    runtime.spawn(Worker::new(Arc::new(Catalog::new())).run(rx, tx));

    let (front_rx, front_tx) = io::split(front);
    let (back_rx, back_tx) = io::split(back);
    let (mut front_rx, mut front_tx) = comms::channel(front_rx, front_tx);
    let (mut back_rx, mut back_tx) = comms::channel(back_rx, back_tx);

    runtime.spawn(async move {
        let mut buf: Vec<u64> = Vec::new();
        let mut fits = 0;

        loop {
            let msg: Msg = match front_rx.recv_into(&mut buf).await {
                Ok(msg) => msg,
                Err(_) => return,
            };

            if let Msg::Control(Command::Fit) = msg {
                fits += 1;
                if fits == nth {
                    // The worker sees EOF and hangs up, which closes the other direction.
                    let _ = back_tx.shutdown().await;
                    return;
                }
            }

            if back_tx.send(&msg).await.is_err() {
                return;
            }
        }
    });

    runtime.spawn(async move {
        let mut buf: Vec<u64> = Vec::new();
        loop {
            let msg: Msg = match back_rx.recv_into(&mut buf).await {
                Ok(msg) => msg,
                Err(_) => return,
            };

            if front_tx.send(&msg).await.is_err() {
                return;
            }
        }
    });

    let (rx, tx) = io::split(ours);
    Peer::new(id, rx, tx)
}

/// Three workers, the middle one faulty.
pub fn pool_with_fault(runtime: &Runtime, fault: Fault) -> Vec<Peer> {
    let catalog = Arc::new(Catalog::new());
    vec![
        real_peer(runtime, 0, Arc::clone(&catalog)),
        faulty_peer(runtime, 1, fault),
        real_peer(runtime, 2, catalog),
    ]
}
