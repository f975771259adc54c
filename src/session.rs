//! Per-session command protocol over the clustering engine.
//!
//! A [`Session`] owns one point set and at most one [`KMeans`] run; a
//! [`SessionRegistry`] keeps independent sessions apart by key. Commands and
//! responses are plain serde types, so any transport (stdin lines, HTTP bodies)
//! can carry them.

use std::collections::HashMap;

use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    generate_blobs, ErrorClass, FitOutcome, InitRequest, KMeans, KMeansError, Phase, PointSet,
    Result, Snapshot,
};

/// Points generated when a request leaves the size unspecified.
pub const DEFAULT_SAMPLES: usize = 300;
/// Dimensionality of generated points when unspecified.
pub const DEFAULT_DIM: usize = 2;
/// Key used when a request names no session.
pub const DEFAULT_SESSION: &str = "default";

fn default_samples() -> usize {
    DEFAULT_SAMPLES
}

fn default_dim() -> usize {
    DEFAULT_DIM
}

fn default_session() -> String {
    DEFAULT_SESSION.to_owned()
}

/// A request against one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// Replace the point set with synthetic blobs.
    GenerateData {
        n_clusters: usize,
        #[serde(default = "default_samples")]
        n_samples: usize,
        #[serde(default = "default_dim")]
        dim: usize,
    },
    /// Replace the point set with caller-supplied points.
    LoadPoints { points: PointSet },
    /// Seed a fresh run, discarding any previous one.
    Initialize(InitRequest),
    Step,
    /// Run to convergence, re-initializing first when settings are attached.
    Converge {
        #[serde(default)]
        init: Option<InitRequest>,
    },
    /// Drop the run and return to the uninitialized phase.
    Reset,
    Snapshot,
}

/// Outcome of a [`Command`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Response {
    Data {
        data: Vec<Vec<f64>>,
    },
    State {
        phase: Phase,
        #[serde(flatten)]
        snapshot: Snapshot,
    },
    Fit {
        #[serde(flatten)]
        snapshot: Snapshot,
        #[serde(flatten)]
        outcome: FitOutcome,
    },
    Reset,
    Error {
        class: ErrorClass,
        status: u16,
        message: String,
    },
}

impl From<KMeansError> for Response {
    fn from(err: KMeansError) -> Self {
        Response::Error {
            class: err.status_class(),
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

/// One logical client: a point set, an optional run and a private random source.
#[derive(Debug, Clone)]
pub struct Session {
    points: Option<PointSet>,
    model: Option<KMeans>,
    rng: ChaCha8Rng,
}

impl Session {
    pub fn new(rng: ChaCha8Rng) -> Self {
        Self {
            points: None,
            model: None,
            rng,
        }
    }

    pub fn points(&self) -> Option<&PointSet> {
        self.points.as_ref()
    }

    pub fn phase(&self) -> Phase {
        self.model
            .as_ref()
            .map_or(Phase::Uninitialized, KMeans::phase)
    }

    /// Install a new point set. Any run over the previous points is discarded.
    pub fn load_points(&mut self, points: PointSet) -> &PointSet {
        if self.model.take().is_some() {
            tracing::debug!("point set replaced; discarding run state");
        }
        self.points.insert(points)
    }

    /// Generate synthetic blobs and install them as the point set.
    pub fn generate_data(
        &mut self,
        n_clusters: usize,
        n_samples: usize,
        dim: usize,
    ) -> Result<&PointSet> {
        let points = generate_blobs(n_samples, dim, n_clusters, &mut self.rng)?;
        tracing::info!(n_samples, dim, n_clusters, "generated synthetic point set");
        Ok(self.load_points(points))
    }

    /// Start a fresh run. On failure the previous run, if any, is left untouched.
    pub fn initialize(&mut self, request: InitRequest) -> Result<Snapshot> {
        let (config, method) = request.into_parts()?;
        let points = self.points.as_ref().ok_or_else(|| {
            KMeansError::UninitializedState("no point set has been loaded".into())
        })?;
        let mut model = KMeans::new(config);
        model.initialize(points, &method, &mut self.rng)?;
        let snapshot = model.snapshot()?;
        self.model = Some(model);
        Ok(snapshot)
    }

    fn run_mut(&mut self) -> Result<(&PointSet, &mut KMeans)> {
        let model = self.model.as_mut().ok_or_else(|| {
            KMeansError::UninitializedState("no clustering run has been initialized".into())
        })?;
        let points = self.points.as_ref().ok_or_else(|| {
            KMeansError::UninitializedState("no point set has been loaded".into())
        })?;
        Ok((points, model))
    }

    pub fn step(&mut self) -> Result<Snapshot> {
        let (points, model) = self.run_mut()?;
        model.step(points)
    }

    pub fn converge(&mut self, init: Option<InitRequest>) -> Result<(Snapshot, FitOutcome)> {
        if let Some(request) = init {
            self.initialize(request)?;
        }
        let (points, model) = self.run_mut()?;
        let outcome = model.fit(points)?;
        Ok((model.snapshot()?, outcome))
    }

    pub fn reset(&mut self) {
        self.model = None;
    }

    pub fn snapshot(&self) -> Result<Snapshot> {
        self.model
            .as_ref()
            .ok_or_else(|| {
                KMeansError::UninitializedState("no clustering run has been initialized".into())
            })?
            .snapshot()
    }

    /// Apply a command, turning any error into [`Response::Error`].
    pub fn handle(&mut self, command: Command) -> Response {
        self.try_handle(command).unwrap_or_else(|err| {
            tracing::warn!(error = %err, status = err.status_code(), "command failed");
            Response::from(err)
        })
    }

    fn try_handle(&mut self, command: Command) -> Result<Response> {
        let response = match command {
            Command::GenerateData {
                n_clusters,
                n_samples,
                dim,
            } => Response::Data {
                data: self.generate_data(n_clusters, n_samples, dim)?.to_rows(),
            },
            Command::LoadPoints { points } => Response::Data {
                data: self.load_points(points).to_rows(),
            },
            Command::Initialize(request) => {
                let snapshot = self.initialize(request)?;
                self.state(snapshot)
            }
            Command::Step => {
                let snapshot = self.step()?;
                self.state(snapshot)
            }
            Command::Converge { init } => {
                let (snapshot, outcome) = self.converge(init)?;
                Response::Fit { snapshot, outcome }
            }
            Command::Reset => {
                self.reset();
                Response::Reset
            }
            Command::Snapshot => self.state(self.snapshot()?),
        };
        Ok(response)
    }

    fn state(&self, snapshot: Snapshot) -> Response {
        Response::State {
            phase: self.phase(),
            snapshot,
        }
    }
}

/// Wire envelope routing a [`Command`] to a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default = "default_session")]
    pub session: String,
    pub command: Command,
}

/// Sessions keyed by identifier, each with its own seeded random source.
#[derive(Debug)]
pub struct SessionRegistry {
    sessions: HashMap<String, Session>,
    seeder: ChaCha8Rng,
}

impl SessionRegistry {
    /// Create an empty registry; per-session seeds derive from `seed`.
    pub fn new(seed: u64) -> Self {
        Self {
            sessions: HashMap::new(),
            seeder: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Session for `id`, created on first use.
    pub fn session_mut(&mut self, id: &str) -> &mut Session {
        let seeder = &mut self.seeder;
        self.sessions.entry(id.to_owned()).or_insert_with(|| {
            tracing::debug!(session = id, "opening session");
            Session::new(ChaCha8Rng::seed_from_u64(seeder.next_u64()))
        })
    }

    pub fn get(&self, id: &str) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Forget a session entirely. Returns whether it existed.
    pub fn remove(&mut self, id: &str) -> bool {
        self.sessions.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn handle(&mut self, envelope: Envelope) -> Response {
        self.session_mut(&envelope.session).handle(envelope.command)
    }

    /// Decode one JSON envelope and apply it. Malformed input yields a client error.
    pub fn handle_line(&mut self, line: &str) -> Response {
        match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => self.handle(envelope),
            Err(err) => {
                let err = KMeansError::from(err);
                tracing::warn!(error = %err, "rejecting malformed command");
                Response::from(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InitStrategy;

    fn square_session() -> Session {
        let mut session = Session::new(ChaCha8Rng::seed_from_u64(7));
        session.load_points(
            PointSet::from_rows(vec![
                vec![0.0, 0.0],
                vec![0.0, 1.0],
                vec![10.0, 0.0],
                vec![10.0, 1.0],
            ])
            .unwrap(),
        );
        session
    }

    fn manual_request() -> InitRequest {
        InitRequest {
            n_clusters: 2,
            method: InitStrategy::Manual,
            max_iterations: None,
            centroids: Some(vec![vec![0.0, 0.5], vec![10.0, 0.5]]),
        }
    }

    #[test]
    fn step_before_initialize_is_server_error() {
        let mut session = square_session();
        match session.handle(Command::Step) {
            Response::Error { class, status, .. } => {
                assert_eq!(class, ErrorClass::Server);
                assert_eq!(status, 500);
            }
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn bad_cluster_count_is_client_error() {
        let mut session = square_session();
        let response = session.handle(Command::Initialize(InitRequest {
            n_clusters: 9,
            method: InitStrategy::Random,
            max_iterations: None,
            centroids: None,
        }));
        assert!(matches!(response, Response::Error { status: 400, .. }));
        assert_eq!(session.phase(), Phase::Uninitialized);
    }

    #[test]
    fn failed_reinitialize_keeps_previous_run() {
        let mut session = square_session();
        session.initialize(manual_request()).unwrap();
        session.step().unwrap();
        let err = session
            .initialize(InitRequest {
                n_clusters: 0,
                method: InitStrategy::Random,
                max_iterations: None,
                centroids: None,
            })
            .unwrap_err();
        assert!(matches!(err, KMeansError::InvalidConfiguration(_)));
        assert_eq!(session.phase(), Phase::Assigned);
    }

    #[test]
    fn initialize_step_converge_flow() {
        let mut session = square_session();
        let initial = session.initialize(manual_request()).unwrap();
        assert_eq!(initial.labels, None);
        assert_eq!(session.phase(), Phase::Initialized);

        let stepped = session.step().unwrap();
        assert_eq!(stepped.labels, Some(vec![0, 0, 1, 1]));

        let (snapshot, outcome) = session.converge(None).unwrap();
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 0);
        assert_eq!(snapshot, stepped);
    }

    #[test]
    fn converge_with_settings_reinitializes() {
        let mut session = square_session();
        let (snapshot, outcome) = session
            .converge(Some(InitRequest {
                n_clusters: 2,
                method: InitStrategy::FarthestFirst,
                max_iterations: Some(10),
                centroids: None,
            }))
            .unwrap();
        assert!(outcome.converged);
        let labels = snapshot.labels.unwrap();
        assert_eq!(labels[0], labels[1]);
        assert_eq!(labels[2], labels[3]);
        assert_ne!(labels[0], labels[2]);
    }

    #[test]
    fn loading_points_discards_run() {
        let mut session = square_session();
        session.initialize(manual_request()).unwrap();
        session.generate_data(3, 30, 2).unwrap();
        assert_eq!(session.phase(), Phase::Uninitialized);
        assert_eq!(session.points().unwrap().len(), 30);
    }

    #[test]
    fn reset_returns_to_uninitialized() {
        let mut session = square_session();
        session.initialize(manual_request()).unwrap();
        assert_eq!(session.handle(Command::Reset), Response::Reset);
        assert_eq!(session.phase(), Phase::Uninitialized);
        assert!(session.snapshot().is_err());
    }

    #[test]
    fn commands_decode_from_json() {
        let command: Command =
            serde_json::from_str(r#"{"op": "generate_data", "n_clusters": 4}"#).unwrap();
        assert_eq!(
            command,
            Command::GenerateData {
                n_clusters: 4,
                n_samples: DEFAULT_SAMPLES,
                dim: DEFAULT_DIM,
            }
        );
        let command: Command = serde_json::from_str(
            r#"{"op": "initialize", "n_clusters": 2, "method": "farthest_first"}"#,
        )
        .unwrap();
        assert!(matches!(command, Command::Initialize(_)));
        let command: Command = serde_json::from_str(r#"{"op": "converge"}"#).unwrap();
        assert_eq!(command, Command::Converge { init: None });
    }

    #[test]
    fn state_response_serializes_flat() {
        let mut session = square_session();
        let response = session.handle(Command::Initialize(manual_request()));
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["kind"], "state");
        assert_eq!(json["phase"], "initialized");
        assert!(json["labels"].is_null());
        assert_eq!(json["centroids"][1][0], 10.0);
    }

    #[test]
    fn registry_keeps_sessions_apart() {
        let mut registry = SessionRegistry::new(1);
        registry.handle_line(
            r#"{"session": "a", "command": {"op": "generate_data", "n_clusters": 2}}"#,
        );
        let response = registry.handle_line(r#"{"session": "b", "command": {"op": "step"}}"#);
        assert!(matches!(response, Response::Error { status: 500, .. }));
        assert_eq!(registry.len(), 2);
        assert!(registry.get("a").unwrap().points().is_some());
        assert!(registry.get("b").unwrap().points().is_none());
        assert!(registry.remove("b"));
        assert!(!registry.remove("b"));
    }

    #[test]
    fn oversized_generate_data_is_client_error() {
        let mut registry = SessionRegistry::new(1);
        let response = registry.handle_line(
            r#"{"command": {"op": "generate_data", "n_clusters": 1, "n_samples": 18446744073709551615}}"#,
        );
        assert!(matches!(response, Response::Error { status: 400, .. }));
        let response = registry
            .handle_line(r#"{"command": {"op": "generate_data", "n_clusters": 1, "dim": 0}}"#);
        assert!(matches!(response, Response::Error { status: 400, .. }));
        assert!(registry.get(DEFAULT_SESSION).unwrap().points().is_none());
    }

    #[test]
    fn malformed_line_is_client_error() {
        let mut registry = SessionRegistry::new(1);
        let response =
            registry.handle_line(r#"{"command": {"op": "initialize", "n_clusters": -1}}"#);
        assert!(matches!(response, Response::Error { status: 400, .. }));
    }
}
