use std::{
    collections::{BTreeMap, HashMap},
    io,
    num::NonZeroUsize,
    sync::Arc,
    time::Duration,
};

use comms::{
    Peer, collective,
    msg::{Command, Msg, Payload},
    specs::{
        AssignmentSpec, DatasetSpec, EstimatorAssignment, EstimatorSpec, EstimatorState,
        FitReport, FitStatus, LocalFitFailure, Points, PredictSpec, RestoreSpec,
    },
};
use estimators::{Catalog, Regressor};
use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use tokio::{
    net::{TcpStream, ToSocketAddrs},
    runtime::Runtime,
};
use worker::Worker;

use crate::{
    LessConfig, LessError, Result, SubsetAssignment,
    config::FailurePolicy,
    matrix::PredictionMatrix,
    model::{Replication, StackedModel},
    placement::Placement,
    sampling, stacking,
};

/// Capacity of the in-memory pipes used by local workers.
const PIPE_CAPACITY: usize = 1 << 16;

/// Feature values per dataset chunk.
const CHUNK_VALUES: usize = 1 << 16;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a session stands in the training pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AssignmentComputed,
    Distributing,
    Collecting,
    GlobalFitting,
    Ready,
    Predicting,
}

/// A trained model and where its local estimators live.
struct Deployed {
    model: StackedModel,
    globals: Vec<Option<Box<dyn Regressor>>>,
    /// Estimator id to the position of its worker.
    owners: BTreeMap<usize, usize>,
}

/// One replication's subsets and their placement.
struct Round {
    assignment: SubsetAssignment,
    /// Estimator id to the position of its worker.
    owners: BTreeMap<usize, usize>,
    /// The rows local estimators predict on for the global fit.
    target_rows: Vec<usize>,
    seed: u64,
}

/// One replication once its local estimators answered.
struct Collected {
    round: Round,
    centers: HashMap<usize, Vec<f64>>,
    matrix: PredictionMatrix,
    failures: BTreeMap<usize, String>,
}

impl Collected {
    /// Estimators that predicted on the target rows and haven't failed since, ascending.
    fn survivors(&self) -> Vec<usize> {
        self.round
            .assignment
            .ids()
            .into_iter()
            .enumerate()
            .filter(|(col, id)| self.matrix.is_filled(*col) && !self.failures.contains_key(id))
            .map(|(_, id)| id)
            .collect()
    }

    fn excluded(&self) -> Vec<LocalFitFailure> {
        self.failures
            .iter()
            .map(|(&estimator_id, cause)| LocalFitFailure {
                estimator_id,
                cause: cause.clone(),
            })
            .collect()
    }

    /// Fails with the policy's error when too few estimators are left.
    fn admit(&self, policy: FailurePolicy) -> Result<()> {
        let excluded = self.excluded();
        let minimum = match policy {
            FailurePolicy::Abort if !excluded.is_empty() => {
                return Err(LessError::LocalFit(excluded));
            }
            FailurePolicy::Abort => 1,
            FailurePolicy::Exclude { min_survivors } => min_survivors.max(1),
        };

        let survivors = self.survivors().len();
        if survivors < minimum {
            return Err(LessError::InsufficientEstimators {
                survivors,
                minimum,
                failures: excluded,
            });
        }

        Ok(())
    }
}

fn comm_err(msg: impl Into<String>) -> LessError {
    LessError::DistributedCommunication(msg.into())
}

/// Builds the error for a reply that isn't the expected one.
fn refused(worker_id: usize, msg: &Msg<'_>, expected: &str) -> io::Error {
    match msg {
        Msg::Control(Command::Failure(failure)) => {
            io::Error::other(format!("worker {worker_id} refused: {failure}"))
        }
        msg => msg.unexpected(expected),
    }
}

fn assign_ack(worker_id: usize, msg: Msg<'_>) -> io::Result<usize> {
    match msg {
        Msg::Control(Command::AssignAck { hosted, .. }) => Ok(hosted),
        msg => Err(refused(worker_id, &msg, "control/assign_ack")),
    }
}

fn fit_ack(worker_id: usize, msg: Msg<'_>) -> io::Result<FitReport> {
    match msg {
        Msg::Control(Command::FitAck(report)) => Ok(report),
        msg => Err(refused(worker_id, &msg, "control/fit_ack")),
    }
}

fn predictions(worker_id: usize, msg: Msg<'_>) -> io::Result<Vec<f64>> {
    match msg {
        Msg::Data(Payload::Predictions(values)) => Ok(values.to_vec()),
        msg => Err(refused(worker_id, &msg, "data/predictions")),
    }
}

fn exported(worker_id: usize, msg: Msg<'_>) -> io::Result<Vec<EstimatorState>> {
    match msg {
        Msg::Control(Command::Exported(states)) => Ok(states),
        msg => Err(refused(worker_id, &msg, "control/exported")),
    }
}

/// Groups estimator ids by the position of their worker.
fn hosted_by(owners: &BTreeMap<usize, usize>, npeers: usize) -> Vec<Vec<usize>> {
    let mut hosted = vec![Vec::new(); npeers];
    for (&estimator_id, &pos) in owners {
        hosted[pos].push(estimator_id);
    }
    hosted
}

/// Drops the estimators that already failed.
fn pending(hosted: &[Vec<usize>], failures: &BTreeMap<usize, String>) -> Vec<Vec<usize>> {
    hosted
        .iter()
        .map(|ids| {
            ids.iter()
                .copied()
                .filter(|id| !failures.contains_key(id))
                .collect()
        })
        .collect()
}

/// One message per worker hosting any of `active`, none for the rest.
fn requests<'a>(
    active: &[Vec<usize>],
    mut request: impl FnMut(usize, &[usize]) -> Msg<'a>,
) -> Vec<Vec<Msg<'a>>> {
    active
        .iter()
        .enumerate()
        .map(|(pos, ids)| match ids.is_empty() {
            true => Vec::new(),
            false => vec![request(pos, ids)],
        })
        .collect()
}

/// The coordinator's handle on a pool of workers.
///
/// Owns the current run: the workers, the state machine and the deployed model.
/// Every exchange blocks on the session's own tokio runtime until each worker
/// answers or the timeout elapses.
pub struct Session {
    runtime: Runtime,
    peers: Vec<Peer>,
    catalog: Arc<Catalog>,
    state: SessionState,
    timeout: Duration,
    deployed: Option<Deployed>,
}

impl Session {
    /// Creates a new `Session` over already connected workers.
    ///
    /// # Arguments
    /// * `peers` - One handle per worker, ids must be distinct.
    /// * `catalog` - Builds the global estimator and restores saved models.
    ///
    /// # Errors
    /// `LessError::Configuration` on repeated worker ids, `LessError::Io` if
    /// the runtime cannot be started.
    pub fn with_peers(peers: Vec<Peer>, catalog: Arc<Catalog>) -> Result<Self> {
        let runtime = Runtime::new()?;
        Self::from_parts(runtime, peers, catalog)
    }

    /// Creates a new `Session` running `nworkers` workers in process.
    ///
    /// The workers run on the session's runtime and talk to it over in-memory
    /// pipes with the same protocol as remote ones.
    pub fn local(nworkers: usize, catalog: Arc<Catalog>) -> Result<Self> {
        if nworkers == 0 {
            return Err(LessError::Configuration("at least one worker is needed".into()));
        }

        let runtime = Runtime::new()?;
        let peers = (0..nworkers)
            .map(|worker_id| {
                let (ours, theirs) = tokio::io::duplex(PIPE_CAPACITY);

                let (rx, tx) = tokio::io::split(theirs);
                let (rx, tx) = comms::channel(rx, tx);
                let worker = Worker::new(Arc::clone(&catalog));
                runtime.spawn(async move {
                    if let Err(e) = worker.run(rx, tx).await {
                        warn!(worker_id = worker_id; "local worker stopped: {e}");
                    }
                });

                let (rx, tx) = tokio::io::split(ours);
                Peer::new(worker_id, rx, tx)
            })
            .collect();

        Self::from_parts(runtime, peers, catalog)
    }

    /// Creates a new `Session` connected to remote workers.
    ///
    /// # Arguments
    /// * `addrs` - The worker addresses, their order gives the worker ids.
    /// * `catalog` - Builds the global estimator and restores saved models.
    ///
    /// # Errors
    /// `LessError::DistributedCommunication` if any worker can't be reached.
    pub fn connect<I, A>(addrs: I, catalog: Arc<Catalog>) -> Result<Self>
    where
        I: IntoIterator<Item = A>,
        A: ToSocketAddrs,
    {
        let runtime = Runtime::new()?;
        let mut peers = Vec::new();

        for (worker_id, addr) in addrs.into_iter().enumerate() {
            let stream = runtime
                .block_on(TcpStream::connect(addr))
                .map_err(|e| comm_err(format!("cannot reach worker {worker_id}: {e}")))?;

            let (rx, tx) = stream.into_split();
            peers.push(Peer::new(worker_id, rx, tx));
        }

        if peers.is_empty() {
            return Err(LessError::Configuration("no worker address given".into()));
        }

        info!(workers = peers.len(); "connected to every worker");
        Self::from_parts(runtime, peers, catalog)
    }

    fn from_parts(runtime: Runtime, peers: Vec<Peer>, catalog: Arc<Catalog>) -> Result<Self> {
        for (i, peer) in peers.iter().enumerate() {
            if peers[..i].iter().any(|other| other.id() == peer.id()) {
                return Err(LessError::Configuration(format!(
                    "worker id {} is used twice",
                    peer.id()
                )));
            }
        }

        Ok(Self {
            runtime,
            peers,
            catalog,
            state: SessionState::Idle,
            timeout: DEFAULT_TIMEOUT,
            deployed: None,
        })
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The model currently served, if any.
    pub fn model(&self) -> Option<&StackedModel> {
        self.deployed.as_ref().map(|deployed| &deployed.model)
    }

    /// The amount of workers still taking part in exchanges.
    pub fn live_workers(&self) -> usize {
        self.live().len()
    }

    /// Sets the deadline for exchanges outside of `fit`, which uses the config's.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Trains a stacked model on the workers.
    ///
    /// Replaces whatever the session was serving. On error no model is kept
    /// and the session goes back to `Idle`.
    ///
    /// # Arguments
    /// * `features` - One row per sample.
    /// * `targets` - One label per row.
    /// * `config` - The training parameters.
    ///
    /// # Errors
    /// `Configuration` before anything is sent, `LocalFit` or
    /// `InsufficientEstimators` when local estimators fail, and
    /// `DistributedCommunication` when every worker is gone.
    pub fn fit(
        &mut self,
        features: ArrayView2<f64>,
        targets: ArrayView1<f64>,
        config: &LessConfig,
    ) -> Result<StackedModel> {
        self.deployed = None;
        self.state = SessionState::Idle;

        match self.train(features, targets, config) {
            Ok(deployed) => {
                let model = deployed.model.clone();
                self.deployed = Some(deployed);
                self.enter(SessionState::Ready);
                Ok(model)
            }
            Err(e) => {
                warn!("training failed: {e}");
                self.state = SessionState::Idle;
                Err(e)
            }
        }
    }

    /// Predicts one value per row of `points` with the served model.
    ///
    /// # Errors
    /// `NotFitted` before a model is trained or deployed, and
    /// `DistributedCommunication` if a worker owning a survivor fails to answer.
    pub fn predict(&mut self, points: ArrayView2<f64>) -> Result<Array1<f64>> {
        let groups = match (&self.deployed, self.state) {
            (Some(deployed), SessionState::Ready) => {
                deployed.model.check_points(points)?;
                hosted_by(&deployed.owners, self.peers.len())
            }
            _ => return Err(LessError::NotFitted),
        };

        if points.nrows() == 0 {
            return Ok(Array1::zeros(0));
        }

        for (pos, ids) in groups.iter().enumerate() {
            if !ids.is_empty() && !self.peers[pos].is_alive() {
                return Err(comm_err(format!(
                    "worker {} owning {} estimator(s) is gone",
                    self.peers[pos].id(),
                    ids.len()
                )));
            }
        }

        self.enter(SessionState::Predicting);
        let local = self.gather_predictions(points, &groups);
        self.enter(SessionState::Ready);

        let deployed = self.deployed.as_ref().ok_or(LessError::NotFitted)?;
        let predictions = deployed.model.assemble(points, &deployed.globals, &local?)?;
        debug!(nrows = predictions.len(); "predictions assembled");
        Ok(predictions)
    }

    /// Serves a previously trained model on this session's workers.
    ///
    /// The local estimators are spread over the live workers in blocks,
    /// replacing whatever they hosted.
    ///
    /// # Errors
    /// `Configuration` if the model is inconsistent or names an unknown
    /// estimator, `DistributedCommunication` if a worker fails to take its share.
    pub fn deploy(&mut self, model: StackedModel) -> Result<()> {
        self.deployed = None;
        self.state = SessionState::Idle;

        model.check()?;
        let globals = model
            .globals(&self.catalog)
            .map_err(|e| LessError::Configuration(format!("cannot restore the model: {e}")))?;

        let live = self.live();
        if live.is_empty() {
            return Err(comm_err("no live worker to deploy on"));
        }

        self.enter(SessionState::Distributing);
        let mut owners = BTreeMap::new();
        let mut parts: Vec<Vec<Msg>> = vec![Vec::new(); self.peers.len()];
        let placement = Placement::Block.place(model.locals.len(), live.len());
        for (positions, &pos) in placement.into_iter().zip(&live) {
            if positions.is_empty() {
                continue;
            }

            let estimators: Vec<EstimatorState> =
                positions.iter().map(|&i| model.locals[i].clone()).collect();
            owners.extend(estimators.iter().map(|state| (state.estimator_id, pos)));

            parts[pos].push(Msg::Control(Command::Restore(RestoreSpec {
                worker_id: self.peers[pos].id(),
                estimators,
            })));
        }

        let mut acks = self.exchange(&parts, assign_ack);
        for (pos, part) in parts.iter().enumerate() {
            if part.is_empty() {
                continue;
            }

            let worker_id = self.peers[pos].id();
            match acks.remove(&worker_id) {
                Some(Ok(hosted)) => debug!(worker_id = worker_id, hosted = hosted; "restored"),
                Some(Err(e)) => {
                    self.state = SessionState::Idle;
                    return Err(comm_err(format!("worker {worker_id} failed to restore: {e}")));
                }
                None => {
                    self.state = SessionState::Idle;
                    return Err(comm_err(format!("worker {worker_id} is unreachable")));
                }
            }
        }

        info!(
            locals = model.locals.len(),
            workers = live.len();
            "model deployed"
        );
        self.deployed = Some(Deployed {
            model,
            globals,
            owners,
        });
        self.enter(SessionState::Ready);
        Ok(())
    }

    /// Tells every live worker to disconnect and closes the connections.
    pub fn shutdown(mut self) {
        let deadline = self.timeout;
        let peers = self.peers.as_mut_slice();

        self.runtime.block_on(async move {
            let msgs = [Msg::Control(Command::Disconnect)];
            collective::broadcast(peers, &msgs, deadline).await;

            let expect = vec![true; peers.len()];
            collective::gather(peers, &expect, deadline, |_, msg| match msg {
                Msg::Control(Command::Disconnect) => Ok(()),
                msg => Err(msg.unexpected("control/disconnect")),
            })
            .await;

            for peer in peers.iter_mut().filter(|peer| peer.is_alive()) {
                if let Err(e) = peer.shutdown().await {
                    debug!(worker_id = peer.id(); "closing the connection failed: {e}");
                }
            }
        });

        info!("session closed");
    }

    fn enter(&mut self, state: SessionState) {
        info!("session {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Positions of the live peers.
    fn live(&self) -> Vec<usize> {
        (0..self.peers.len())
            .filter(|&pos| self.peers[pos].is_alive())
            .collect()
    }

    /// Sends each peer its part and gathers one answer from every peer that got one.
    ///
    /// # Returns
    /// The decoded answers by worker id; peers that failed to receive their
    /// part are reported with their error.
    fn exchange<T, F>(&mut self, parts: &[Vec<Msg<'_>>], decode: F) -> BTreeMap<usize, io::Result<T>>
    where
        F: Fn(usize, Msg<'_>) -> io::Result<T>,
    {
        let deadline = self.timeout;
        let peers = self.peers.as_mut_slice();

        self.runtime.block_on(async move {
            let expect: Vec<bool> = parts.iter().map(|part| !part.is_empty()).collect();
            let mut results = BTreeMap::new();

            for (worker_id, e) in collective::scatter(peers, parts, deadline).await {
                results.insert(worker_id, Err(e));
            }

            for (worker_id, res) in collective::gather(peers, &expect, deadline, decode).await {
                results.insert(worker_id, res);
            }

            results
        })
    }

    /// Keeps the answers of the peers hosting `active` estimators and fails
    /// the estimators of every peer that didn't answer.
    ///
    /// # Returns
    /// The answers by peer position.
    fn settle<T>(
        &self,
        active: &[Vec<usize>],
        mut results: BTreeMap<usize, io::Result<T>>,
        failures: &mut BTreeMap<usize, String>,
    ) -> BTreeMap<usize, T> {
        let mut answers = BTreeMap::new();

        for (pos, ids) in active.iter().enumerate() {
            if ids.is_empty() {
                continue;
            }

            let worker_id = self.peers[pos].id();
            let cause = match results.remove(&worker_id) {
                Some(Ok(answer)) => {
                    answers.insert(pos, answer);
                    continue;
                }
                Some(Err(e)) => format!("worker {worker_id} failed: {e}"),
                None => format!("worker {worker_id} is unreachable"),
            };

            for &estimator_id in ids {
                failures.entry(estimator_id).or_insert_with(|| cause.clone());
            }
        }

        answers
    }

    fn train(
        &mut self,
        features: ArrayView2<f64>,
        targets: ArrayView1<f64>,
        config: &LessConfig,
    ) -> Result<Deployed> {
        self.check_inputs(features, targets, config)?;
        self.timeout = config.timeout();
        self.share_dataset(features, targets)?;

        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut collected = Vec::with_capacity(config.replications);

        for replication in 0..config.replications {
            let round = self.compute_assignment(features, targets, config, replication, rng.random())?;
            let outcome = self.run_round(features.ncols(), config, round)?;
            outcome.admit(config.failure)?;
            collected.push(outcome);
        }

        let survivors: BTreeMap<usize, usize> = collected
            .iter()
            .flat_map(|outcome| {
                outcome
                    .survivors()
                    .into_iter()
                    .filter_map(move |id| outcome.round.owners.get(&id).map(|&pos| (id, pos)))
            })
            .collect();

        // A worker lost in a later replication takes its earlier estimators with it.
        let mut lost = BTreeMap::new();
        let locals = self.export(&survivors, &mut lost);
        if self.live().is_empty() {
            return Err(comm_err("every worker went away"));
        }

        self.enter(SessionState::GlobalFitting);
        let mut replications = Vec::with_capacity(collected.len());
        let mut globals = Vec::with_capacity(collected.len());
        for mut outcome in collected {
            for id in outcome.round.assignment.ids() {
                if let Some(cause) = lost.get(&id) {
                    outcome.failures.entry(id).or_insert_with(|| cause.clone());
                }
            }

            outcome.admit(config.failure)?;
            let (rep, global) = self.fit_global(features, targets, config, outcome)?;
            replications.push(rep);
            globals.push(global);
        }

        let owners = survivors
            .into_iter()
            .filter(|(id, _)| !lost.contains_key(id))
            .collect();

        let model = StackedModel {
            nfeatures: features.ncols(),
            weighting: config.weighting,
            global_spec: config.global.clone(),
            replications,
            locals,
        };

        Ok(Deployed {
            model,
            globals,
            owners,
        })
    }

    /// Rejects inputs that can't be trained on, before anything is sent.
    fn check_inputs(
        &self,
        features: ArrayView2<f64>,
        targets: ArrayView1<f64>,
        config: &LessConfig,
    ) -> Result<()> {
        if features.nrows() != targets.len() {
            return Err(LessError::Configuration(format!(
                "{} rows but {} labels",
                features.nrows(),
                targets.len()
            )));
        }

        config.validate(features.nrows())?;

        if features.ncols() == 0 {
            return Err(LessError::Configuration("rows have no features".into()));
        }

        if features.iter().chain(targets.iter()).any(|v| !v.is_finite()) {
            return Err(LessError::Configuration(
                "the dataset holds non-finite values".into(),
            ));
        }

        self.catalog
            .build(&config.global, config.seed)
            .map_err(|e| LessError::Configuration(format!("global estimator: {e}")))?;

        // Custom local estimators are resolved by the workers' catalogs.
        if !matches!(config.local, EstimatorSpec::Custom { .. }) {
            self.catalog
                .build(&config.local, config.seed)
                .map_err(|e| LessError::Configuration(format!("local estimator: {e}")))?;
        }

        if self.live().is_empty() {
            return Err(comm_err("no live worker"));
        }

        Ok(())
    }

    /// Replicates the dataset on every live worker.
    fn share_dataset(&mut self, features: ArrayView2<f64>, targets: ArrayView1<f64>) -> Result<()> {
        let (nrows, nfeatures) = features.dim();
        let spec = DatasetSpec {
            nrows,
            nfeatures,
            chunk_rows: NonZeroUsize::new(CHUNK_VALUES / nfeatures).unwrap_or(NonZeroUsize::MIN),
        };

        let flat: Vec<f64> = features.iter().copied().collect();
        let targets = targets.to_vec();
        let msgs = comms::dataset_msgs(spec, &flat, &targets);

        let deadline = self.timeout;
        let peers = self.peers.as_mut_slice();
        self.runtime
            .block_on(collective::broadcast(peers, &msgs, deadline));

        let workers = self.live_workers();
        if workers == 0 {
            return Err(comm_err("every worker failed to receive the dataset"));
        }

        info!(nrows = nrows, nfeatures = nfeatures, workers = workers; "dataset shared");
        Ok(())
    }

    /// Splits the rows into subsets and places them on the live workers.
    fn compute_assignment(
        &mut self,
        features: ArrayView2<f64>,
        targets: ArrayView1<f64>,
        config: &LessConfig,
        replication: usize,
        seed: u64,
    ) -> Result<Round> {
        let nrows = features.nrows();
        let mut rng = StdRng::seed_from_u64(seed);

        let (train_rows, target_rows) = match config.validation_rows(nrows) {
            0 => ((0..nrows).collect::<Vec<_>>(), (0..nrows).collect()),
            held_out => {
                let mut order: Vec<usize> = (0..nrows).collect();
                order.shuffle(&mut rng);

                let mut target_rows = order[..held_out].to_vec();
                let mut train_rows = order[held_out..].to_vec();
                target_rows.sort_unstable();
                train_rows.sort_unstable();
                (train_rows, target_rows)
            }
        };

        let subset_size = config.subset_size.resolve(train_rows.len());
        let assignment = sampling::sampler(config.sampler)
            .sample(
                features.select(Axis(0), &train_rows).view(),
                targets.select(Axis(0), &train_rows).view(),
                config.k,
                subset_size,
                rng.random(),
            )?
            .translate(&train_rows)
            .offset(replication * config.k);

        let live = self.live();
        if live.is_empty() {
            return Err(comm_err("every worker is gone"));
        }

        let ids = assignment.ids();
        let ids = &ids;
        let owners = config
            .placement
            .place(ids.len(), live.len())
            .into_iter()
            .zip(&live)
            .flat_map(|(positions, &pos)| positions.into_iter().map(move |i| (ids[i], pos)))
            .collect();

        info!(
            replication = replication,
            estimators = assignment.len(),
            subset_size = subset_size,
            target_rows = target_rows.len();
            "assignment computed"
        );
        self.enter(SessionState::AssignmentComputed);

        Ok(Round {
            assignment,
            owners,
            target_rows,
            seed,
        })
    }

    /// Distributes one replication and collects its local predictions.
    fn run_round(&mut self, nfeatures: usize, config: &LessConfig, round: Round) -> Result<Collected> {
        let hosted = hosted_by(&round.owners, self.peers.len());
        let mut failures: BTreeMap<usize, String> = BTreeMap::new();

        self.enter(SessionState::Distributing);
        let worker_ids: Vec<usize> = self.peers.iter().map(Peer::id).collect();
        let parts = requests(&hosted, |pos, ids| {
            let estimators = ids
                .iter()
                .map(|&estimator_id| EstimatorAssignment {
                    estimator_id,
                    rows: round.assignment.get(estimator_id).unwrap_or_default().to_vec(),
                    seed: round.seed.wrapping_add(estimator_id as u64),
                })
                .collect();

            Msg::Control(Command::Assign(AssignmentSpec {
                worker_id: worker_ids[pos],
                estimator: config.local.clone(),
                estimators,
            }))
        });
        let acks = self.exchange(&parts, assign_ack);
        self.settle(&hosted, acks, &mut failures);

        self.enter(SessionState::Collecting);
        let centers = self.collect_fits(&hosted, nfeatures, &mut failures);
        let matrix = self.collect_predictions(&round, &hosted, &mut failures);

        if self.live().is_empty() {
            return Err(comm_err("every worker went away"));
        }

        for (estimator_id, cause) in &failures {
            warn!(estimator_id = *estimator_id; "excluding local estimator: {cause}");
        }

        Ok(Collected {
            round,
            centers,
            matrix,
            failures,
        })
    }

    /// Fits one replication's global estimator on its surviving columns.
    fn fit_global(
        &self,
        features: ArrayView2<f64>,
        targets: ArrayView1<f64>,
        config: &LessConfig,
        outcome: Collected,
    ) -> Result<(Replication, Option<Box<dyn Regressor>>)> {
        let ids = outcome.round.assignment.ids();
        let survivors = outcome.survivors();
        let excluded = outcome.excluded();

        let mut survivor_centers = Array2::zeros((survivors.len(), features.ncols()));
        for (mut row, id) in survivor_centers.rows_mut().into_iter().zip(&survivors) {
            let center = outcome.centers.get(id).ok_or_else(|| {
                comm_err(format!("local estimator {id} survived without a center"))
            })?;
            row.assign(&ArrayView1::from(center.as_slice()));
        }

        let cols: Vec<usize> = survivors
            .iter()
            .filter_map(|id| ids.binary_search(id).ok())
            .collect();
        let round = &outcome.round;
        let nsubsets = round.assignment.len();
        let target_features = features.select(Axis(0), &round.target_rows);
        let target_labels = targets.select(Axis(0), &round.target_rows);
        let design = stacking::design(
            target_features.view(),
            outcome.matrix.columns(&cols).view(),
            survivor_centers.view(),
            config.weighting,
            nsubsets,
        );

        let global = match nsubsets {
            1 => None,
            _ => {
                let mut global = self.catalog.build(&config.global, round.seed)?;
                global.fit(design.view(), target_labels.view())?;
                Some(global)
            }
        };
        let state = global.as_ref().map(|global| global.save()).transpose()?;

        info!(
            survivors = survivors.len(),
            excluded = excluded.len();
            "global estimator fitted"
        );

        let rep = Replication {
            assignment: outcome.round.assignment,
            nsubsets,
            survivors,
            excluded,
            centers: survivor_centers,
            global: state,
        };

        Ok((rep, global))
    }

    /// Tells every worker to fit and collects the centers of the fitted estimators.
    fn collect_fits(
        &mut self,
        hosted: &[Vec<usize>],
        nfeatures: usize,
        failures: &mut BTreeMap<usize, String>,
    ) -> HashMap<usize, Vec<f64>> {
        let active = pending(hosted, failures);
        let parts = requests(&active, |_, _| Msg::Control(Command::Fit));
        let reports = self.exchange(&parts, fit_ack);
        let reports = self.settle(&active, reports, failures);

        let mut centers = HashMap::new();
        for (pos, report) in reports {
            let ids = &active[pos];

            // Estimators kept from earlier replications report again, skip them.
            for outcome in report.outcomes {
                if !ids.contains(&outcome.estimator_id) {
                    continue;
                }

                match outcome.status {
                    FitStatus::Fitted { center } if center.len() == nfeatures => {
                        centers.insert(outcome.estimator_id, center);
                    }
                    FitStatus::Fitted { center } => {
                        failures.insert(
                            outcome.estimator_id,
                            format!("center has {} values, expected {nfeatures}", center.len()),
                        );
                    }
                    FitStatus::Failed { cause } => {
                        failures.insert(outcome.estimator_id, cause);
                    }
                }
            }

            for &estimator_id in ids {
                if !centers.contains_key(&estimator_id) {
                    failures
                        .entry(estimator_id)
                        .or_insert_with(|| "missing from the fit report".into());
                }
            }
        }

        centers
    }

    /// Has every fitted estimator predict on the round's target rows.
    fn collect_predictions(
        &mut self,
        round: &Round,
        hosted: &[Vec<usize>],
        failures: &mut BTreeMap<usize, String>,
    ) -> PredictionMatrix {
        let ids = round.assignment.ids();
        let mut matrix = PredictionMatrix::new(round.target_rows.len(), ids.len());
        let nrows = matrix.nrows().max(1);

        let active = pending(hosted, failures);
        let parts = requests(&active, |_, estimators| {
            Msg::Control(Command::Predict(PredictSpec {
                estimators: estimators.to_vec(),
                points: Points::Dataset {
                    rows: round.target_rows.clone(),
                },
            }))
        });
        let blocks = self.exchange(&parts, predictions);
        let blocks = self.settle(&active, blocks, failures);

        for (pos, values) in blocks {
            let owned = &active[pos];
            if values.len() != owned.len() * matrix.nrows() {
                let cause = format!(
                    "worker {} sent {} predictions, expected {}",
                    self.peers[pos].id(),
                    values.len(),
                    owned.len() * matrix.nrows()
                );
                for &estimator_id in owned {
                    failures.insert(estimator_id, cause.clone());
                }
                continue;
            }

            for (&estimator_id, block) in owned.iter().zip(values.chunks(nrows)) {
                if block.iter().any(|v| !v.is_finite()) {
                    failures.insert(estimator_id, "predicted non-finite values".into());
                    continue;
                }

                if let Ok(col) = ids.binary_search(&estimator_id) {
                    matrix.fill_column(col, block);
                }
            }
        }

        debug!(
            filled = matrix.filled_columns().len(),
            columns = matrix.ncols();
            "prediction matrix assembled"
        );
        matrix
    }

    /// Fetches the fitted state of every surviving estimator.
    ///
    /// Estimators whose worker is gone or exports something else are recorded in `lost`.
    fn export(
        &mut self,
        owners: &BTreeMap<usize, usize>,
        lost: &mut BTreeMap<usize, String>,
    ) -> Vec<EstimatorState> {
        let wanted = hosted_by(owners, self.peers.len());
        let parts = requests(&wanted, |_, estimators| {
            Msg::Control(Command::Export {
                estimators: estimators.to_vec(),
            })
        });
        let results = self.exchange(&parts, exported);
        let answers = self.settle(&wanted, results, lost);

        let mut locals = Vec::with_capacity(owners.len());
        for (pos, states) in answers {
            let ids = &wanted[pos];
            if states.iter().map(|s| s.estimator_id).eq(ids.iter().copied()) {
                locals.extend(states);
                continue;
            }

            let cause = format!("worker {} exported the wrong estimators", self.peers[pos].id());
            for &estimator_id in ids {
                lost.insert(estimator_id, cause.clone());
            }
        }

        if !lost.is_empty() {
            warn!(lost = lost.len(); "local estimators lost before export");
        }

        locals.sort_by_key(|state| state.estimator_id);
        locals
    }

    /// Sends the points to every owner and collects the predictions by estimator id.
    fn gather_predictions(
        &mut self,
        points: ArrayView2<f64>,
        groups: &[Vec<usize>],
    ) -> Result<HashMap<usize, Vec<f64>>> {
        let (nrows, ncols) = points.dim();
        let flat: Vec<f64> = points.iter().copied().collect();

        let parts: Vec<Vec<Msg>> = groups
            .iter()
            .map(|ids| match ids.is_empty() {
                true => Vec::new(),
                false => vec![
                    Msg::Control(Command::Predict(PredictSpec {
                        estimators: ids.clone(),
                        points: Points::Inline { nrows, ncols },
                    })),
                    Msg::Data(Payload::Points(&flat)),
                ],
            })
            .collect();

        let mut results = self.exchange(&parts, predictions);

        let mut local = HashMap::new();
        for (pos, ids) in groups.iter().enumerate() {
            if ids.is_empty() {
                continue;
            }

            let worker_id = self.peers[pos].id();
            let values = match results.remove(&worker_id) {
                Some(Ok(values)) => values,
                Some(Err(e)) => {
                    return Err(comm_err(format!("worker {worker_id} failed to predict: {e}")));
                }
                None => return Err(comm_err(format!("worker {worker_id} did not answer"))),
            };

            if values.len() != ids.len() * nrows {
                return Err(comm_err(format!(
                    "worker {worker_id} sent {} predictions, expected {}",
                    values.len(),
                    ids.len() * nrows
                )));
            }

            for (&estimator_id, block) in ids.iter().zip(values.chunks(nrows)) {
                local.insert(estimator_id, block.to_vec());
            }
        }

        Ok(local)
    }
}
