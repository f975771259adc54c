//! Interactive k-means clustering engine.
//!
//! The crate seeds centroids with one of several strategies, then refines them
//! with Lloyd iterations that can be driven one step at a time (for
//! visualisation) or run to a fixed point. Run state is an explicit value owned
//! by the caller; [`session`] layers a per-session command protocol on top.

use csv::ReaderBuilder;
use ndarray::{Array2, ArrayView1, Axis};
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::distributions::{WeightedError, WeightedIndex};
use rand::prelude::*;
use rand::seq::index::sample;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

pub mod session;

/// Dense data representation used across the crate (rows = points, columns = dimensions).
pub type DataMatrix = Array2<f64>;

/// Iteration cap applied when a request does not name one.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Upper bound on `n_samples * dim` accepted by [`generate_blobs`].
pub const MAX_GENERATED_COORDINATES: usize = 10_000_000;

/// Error type used by operations in this crate.
#[derive(Debug, Error)]
pub enum KMeansError {
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("degenerate initialization: {0}")]
    DegenerateInitialization(String),
    #[error("uninitialized state: {0}")]
    UninitializedState(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    ParseFloat(#[from] std::num::ParseFloatError),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

/// Convenient alias for results produced by this crate.
pub type Result<T> = std::result::Result<T, KMeansError>;

/// Which side of a request/response boundary an error should be blamed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorClass {
    /// The caller sent bad configuration or malformed data.
    Client,
    /// The engine was driven out of order, or the environment failed.
    Server,
}

impl KMeansError {
    /// Classify the error for a transport layer.
    pub fn status_class(&self) -> ErrorClass {
        match self {
            KMeansError::InvalidConfiguration(_)
            | KMeansError::Csv(_)
            | KMeansError::ParseFloat(_)
            | KMeansError::SerdeJson(_) => ErrorClass::Client,
            KMeansError::DegenerateInitialization(_)
            | KMeansError::UninitializedState(_)
            | KMeansError::Io(_) => ErrorClass::Server,
        }
    }

    /// HTTP-style status code matching [`KMeansError::class`].
    pub fn status_code(&self) -> u16 {
        match self.status_class() {
            ErrorClass::Client => 400,
            ErrorClass::Server => 500,
        }
    }
}

fn invalid(message: impl Into<String>) -> KMeansError {
    KMeansError::InvalidConfiguration(message.into())
}

/// Immutable collection of `n` points sharing one dimensionality `d`.
///
/// Construction rejects empty input, ragged rows and non-finite coordinates, so
/// every other operation can rely on a well-formed rectangular matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct PointSet {
    data: DataMatrix,
}

impl PointSet {
    /// Wrap an existing matrix after validating it.
    pub fn from_matrix(data: DataMatrix) -> Result<Self> {
        if data.nrows() == 0 {
            return Err(invalid("point set is empty"));
        }
        if data.ncols() == 0 {
            return Err(invalid("points must have at least one dimension"));
        }
        if let Some((idx, _)) = data.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(invalid(format!(
                "point {} has a non-finite coordinate at dimension {}",
                idx.0, idx.1
            )));
        }
        Ok(Self { data })
    }

    /// Build a point set from row vectors.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        Self::from_matrix(rows_to_matrix(&rows, "point")?)
    }

    /// Number of points (`n`).
    pub fn len(&self) -> usize {
        self.data.nrows()
    }

    /// Always false: empty point sets cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.data.nrows() == 0
    }

    /// Dimensionality shared by every point (`d`).
    pub fn dim(&self) -> usize {
        self.data.ncols()
    }

    /// Borrow the underlying matrix.
    pub fn matrix(&self) -> &DataMatrix {
        &self.data
    }

    /// View of the point at `idx`.
    pub fn point(&self, idx: usize) -> ArrayView1<'_, f64> {
        self.data.row(idx)
    }

    /// Copy the points out as row vectors.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        matrix_to_rows(&self.data)
    }
}

impl TryFrom<Vec<Vec<f64>>> for PointSet {
    type Error = KMeansError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self> {
        Self::from_rows(rows)
    }
}

impl From<PointSet> for Vec<Vec<f64>> {
    fn from(points: PointSet) -> Self {
        points.to_rows()
    }
}

fn rows_to_matrix(rows: &[Vec<f64>], what: &str) -> Result<DataMatrix> {
    let Some(first) = rows.first() else {
        return Ok(Array2::zeros((0, 0)));
    };
    let dim = first.len();
    let mut flat = Vec::with_capacity(rows.len() * dim);
    for (i, row) in rows.iter().enumerate() {
        if row.len() != dim {
            return Err(invalid(format!(
                "{what} {i} has {} coordinates, expected {dim}",
                row.len()
            )));
        }
        flat.extend_from_slice(row);
    }
    Array2::from_shape_vec((rows.len(), dim), flat).map_err(|err| invalid(err.to_string()))
}

fn matrix_to_rows(matrix: &DataMatrix) -> Vec<Vec<f64>> {
    matrix.outer_iter().map(|row| row.to_vec()).collect()
}

/// Kind of centroid seeding, without any associated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InitStrategy {
    /// Choose `k` distinct points uniformly at random.
    Random,
    /// Greedy farthest-first traversal after a random first pick.
    FarthestFirst,
    /// K-Means++ seeding: sample proportional to squared distance.
    #[default]
    #[serde(rename = "kmeans++", alias = "k-means++")]
    KMeansPlusPlus,
    /// Caller supplies the centroids.
    Manual,
}

impl fmt::Display for InitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitStrategy::Random => write!(f, "random"),
            InitStrategy::FarthestFirst => write!(f, "farthest_first"),
            InitStrategy::KMeansPlusPlus => write!(f, "kmeans++"),
            InitStrategy::Manual => write!(f, "manual"),
        }
    }
}

impl std::str::FromStr for InitStrategy {
    type Err = KMeansError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "random" => Ok(Self::Random),
            "farthest_first" | "farthest-first" => Ok(Self::FarthestFirst),
            "kmeans++" | "k-means++" => Ok(Self::KMeansPlusPlus),
            "manual" => Ok(Self::Manual),
            other => Err(invalid(format!("unsupported init strategy '{other}'"))),
        }
    }
}

/// Centroid seeding method, carrying explicit centroids for the manual case.
#[derive(Debug, Clone, PartialEq)]
pub enum InitMethod {
    Random,
    FarthestFirst,
    KMeansPlusPlus,
    Manual(Vec<Vec<f64>>),
}

impl InitMethod {
    /// Combine a strategy with optional explicit centroids.
    ///
    /// Centroids are required for [`InitStrategy::Manual`] and ignored otherwise.
    pub fn from_strategy(
        strategy: InitStrategy,
        centroids: Option<Vec<Vec<f64>>>,
    ) -> Result<Self> {
        Ok(match strategy {
            InitStrategy::Random => Self::Random,
            InitStrategy::FarthestFirst => Self::FarthestFirst,
            InitStrategy::KMeansPlusPlus => Self::KMeansPlusPlus,
            InitStrategy::Manual => Self::Manual(
                centroids.ok_or_else(|| invalid("manual initialization requires centroids"))?,
            ),
        })
    }

    pub fn strategy(&self) -> InitStrategy {
        match self {
            InitMethod::Random => InitStrategy::Random,
            InitMethod::FarthestFirst => InitStrategy::FarthestFirst,
            InitMethod::KMeansPlusPlus => InitStrategy::KMeansPlusPlus,
            InitMethod::Manual(_) => InitStrategy::Manual,
        }
    }
}

/// Configurable knobs for a k-means run.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct KMeansConfig {
    /// Number of centroids to optimise.
    pub k: usize,
    /// Cap on Update-then-Assign cycles performed by [`KMeans::fit`].
    pub max_iterations: usize,
}

impl Default for KMeansConfig {
    fn default() -> Self {
        Self {
            k: 3,
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }
}

impl KMeansConfig {
    /// Validate configuration parameters for a specific point set.
    pub fn validate(&self, points: &PointSet) -> Result<()> {
        validate_k(self.k, points.len())?;
        if self.max_iterations == 0 {
            return Err(invalid("max_iterations must be greater than zero"));
        }
        Ok(())
    }
}

fn validate_k(k: usize, n: usize) -> Result<()> {
    if k == 0 {
        return Err(invalid("k must be greater than zero"));
    }
    if k > n {
        return Err(invalid(format!(
            "point set has {n} points but k = {k}; add more data or decrease k"
        )));
    }
    Ok(())
}

/// Initialization request as received from a collaborator (JSON body).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InitRequest {
    pub n_clusters: usize,
    pub method: InitStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iterations: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroids: Option<Vec<Vec<f64>>>,
}

impl InitRequest {
    /// Split the request into run configuration and seeding method.
    pub fn into_parts(self) -> Result<(KMeansConfig, InitMethod)> {
        let config = KMeansConfig {
            k: self.n_clusters,
            max_iterations: self.max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS),
        };
        let method = InitMethod::from_strategy(self.method, self.centroids)?;
        Ok((config, method))
    }
}

/// Squared Euclidean distance between two equally sized vectors.
pub fn squared_distance(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Index of the nearest centroid and its squared distance; ties go to the lowest index.
///
/// `centroids` must have at least one row.
pub(crate) fn nearest_centroid(
    point: &ArrayView1<f64>,
    centroids: &DataMatrix,
) -> (usize, f64) {
    let mut best = 0usize;
    let mut best_distance = squared_distance(point, &centroids.row(0));
    for cid in 1..centroids.nrows() {
        let distance = squared_distance(point, &centroids.row(cid));
        if distance < best_distance {
            best_distance = distance;
            best = cid;
        }
    }
    (best, best_distance)
}

/// Produce `k` starting centroids for `points`.
pub fn initialize<R: Rng + ?Sized>(
    points: &PointSet,
    k: usize,
    method: &InitMethod,
    rng: &mut R,
) -> Result<DataMatrix> {
    validate_k(k, points.len())?;
    match method {
        InitMethod::Random => Ok(random_init(points, k, rng)),
        InitMethod::FarthestFirst => Ok(farthest_first_init(points, k, rng)),
        InitMethod::KMeansPlusPlus => kmeans_pp_init(points, k, rng),
        InitMethod::Manual(rows) => manual_init(points, k, rows),
    }
}

fn random_init<R: Rng + ?Sized>(points: &PointSet, k: usize, rng: &mut R) -> DataMatrix {
    let idxs = sample(rng, points.len(), k).into_vec();
    points.matrix().select(Axis(0), &idxs)
}

/// Squared distance from every point to the first chosen centroid.
fn seed_distances(points: &PointSet, first: usize) -> Vec<f64> {
    let seed = points.point(first);
    points
        .matrix()
        .rows()
        .into_iter()
        .map(|row| squared_distance(&row, &seed))
        .collect()
}

fn tighten_distances(points: &PointSet, distances: &mut [f64], chosen: usize) {
    let centroid = points.point(chosen);
    distances
        .iter_mut()
        .zip(points.matrix().rows())
        .for_each(|(slot, row)| {
            let d = squared_distance(&row, &centroid);
            if d < *slot {
                *slot = d;
            }
        });
}

fn farthest_first_init<R: Rng + ?Sized>(points: &PointSet, k: usize, rng: &mut R) -> DataMatrix {
    let first = rng.gen_range(0..points.len());
    let mut chosen = Vec::with_capacity(k);
    chosen.push(first);
    let mut distances = seed_distances(points, first);

    while chosen.len() < k {
        let mut next = 0usize;
        for (idx, &d) in distances.iter().enumerate() {
            if d > distances[next] {
                next = idx;
            }
        }
        chosen.push(next);
        tighten_distances(points, &mut distances, next);
    }
    points.matrix().select(Axis(0), &chosen)
}

fn kmeans_pp_init<R: Rng + ?Sized>(points: &PointSet, k: usize, rng: &mut R) -> Result<DataMatrix> {
    let first = rng.gen_range(0..points.len());
    let mut chosen = Vec::with_capacity(k);
    chosen.push(first);
    let mut distances = seed_distances(points, first);

    while chosen.len() < k {
        if !distances.iter().sum::<f64>().is_finite() {
            return Err(KMeansError::DegenerateInitialization(
                "squared distances overflow f64; rescale the points before seeding".into(),
            ));
        }
        let weights = WeightedIndex::new(&distances).map_err(|err| match err {
            WeightedError::AllWeightsZero => KMeansError::DegenerateInitialization(format!(
                "every remaining point coincides with one of the {} chosen centroids",
                chosen.len()
            )),
            other => KMeansError::DegenerateInitialization(other.to_string()),
        })?;
        let next = weights.sample(rng);
        chosen.push(next);
        tighten_distances(points, &mut distances, next);
    }
    Ok(points.matrix().select(Axis(0), &chosen))
}

fn manual_init(points: &PointSet, k: usize, rows: &[Vec<f64>]) -> Result<DataMatrix> {
    if rows.len() != k {
        return Err(invalid(format!(
            "expected {k} explicit centroids, got {}",
            rows.len()
        )));
    }
    let centroids = rows_to_matrix(rows, "centroid")?;
    check_centroids(points, &centroids)?;
    if centroids.iter().any(|v| !v.is_finite()) {
        return Err(invalid("explicit centroids must have finite coordinates"));
    }
    Ok(centroids)
}

fn check_centroids(points: &PointSet, centroids: &DataMatrix) -> Result<()> {
    if centroids.nrows() == 0 {
        return Err(invalid("centroid set is empty"));
    }
    if centroids.ncols() != points.dim() {
        return Err(invalid(format!(
            "centroids have {} dimensions but points have {}",
            centroids.ncols(),
            points.dim()
        )));
    }
    Ok(())
}

/// Label every point with the index of its nearest centroid.
pub fn assign(points: &PointSet, centroids: &DataMatrix) -> Result<Vec<usize>> {
    check_centroids(points, centroids)?;
    Ok(points
        .matrix()
        .rows()
        .into_iter()
        .map(|row| nearest_centroid(&row, centroids).0)
        .collect())
}

/// Recompute each centroid as the mean of its points.
///
/// Clusters without points keep their previous centroid.
pub fn update(points: &PointSet, labels: &[usize], old_centroids: &DataMatrix) -> Result<DataMatrix> {
    check_centroids(points, old_centroids)?;
    if labels.len() != points.len() {
        return Err(invalid(format!(
            "{} labels supplied for {} points",
            labels.len(),
            points.len()
        )));
    }
    let k = old_centroids.nrows();
    check_labels(labels, k)?;
    let counts = cluster_sizes(labels, k);

    // Each coordinate is divided by the cluster size before accumulation so the
    // running mean stays within the range of the inputs.
    let mut means = Array2::<f64>::zeros(old_centroids.raw_dim());
    for (row, &cid) in points.matrix().rows().into_iter().zip(labels) {
        let count = counts[cid] as f64;
        means
            .row_mut(cid)
            .zip_mut_with(&row, |mean, &x| *mean += x / count);
    }

    let mut centroids = old_centroids.clone();
    for (cid, &count) in counts.iter().enumerate() {
        if count > 0 {
            centroids.row_mut(cid).assign(&means.row(cid));
        }
    }
    Ok(centroids)
}

fn check_labels(labels: &[usize], k: usize) -> Result<()> {
    match labels.iter().find(|&&cid| cid >= k) {
        Some(cid) => Err(invalid(format!("label {cid} out of range for k = {k}"))),
        None => Ok(()),
    }
}

/// Number of points carrying each label.
pub fn cluster_sizes(labels: &[usize], k: usize) -> Vec<usize> {
    let mut sizes = vec![0usize; k];
    for &cid in labels {
        if let Some(slot) = sizes.get_mut(cid) {
            *slot += 1;
        }
    }
    sizes
}

/// Inertia metric (sum of squared distances to assigned centroids).
pub fn inertia(points: &PointSet, centroids: &DataMatrix, labels: &[usize]) -> Result<f64> {
    check_centroids(points, centroids)?;
    if labels.len() != points.len() {
        return Err(invalid(format!(
            "{} labels supplied for {} points",
            labels.len(),
            points.len()
        )));
    }
    check_labels(labels, centroids.nrows())?;
    Ok(total_inertia(points, centroids, labels))
}

fn total_inertia(points: &PointSet, centroids: &DataMatrix, labels: &[usize]) -> f64 {
    labels
        .iter()
        .enumerate()
        .map(|(idx, &cid)| squared_distance(&points.point(idx), &centroids.row(cid)))
        .sum()
}

/// Bit-for-bit equality of two centroid sets, so `-0.0` and `+0.0` differ.
fn same_bits(a: &DataMatrix, b: &DataMatrix) -> bool {
    a.dim() == b.dim() && a.iter().zip(b.iter()).all(|(x, y)| x.to_bits() == y.to_bits())
}

/// Lifecycle of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Uninitialized,
    /// Centroids chosen, labels not computed yet.
    Initialized,
    /// Centroids and labels are consistent.
    Assigned,
}

/// Transport form of the run state: centroids plus labels (`null` before the first step).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub centroids: Vec<Vec<f64>>,
    pub labels: Option<Vec<usize>>,
}

/// Diagnostics from a run to convergence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FitOutcome {
    /// Update-then-Assign cycles that moved at least one centroid.
    pub iterations: usize,
    /// Whether a cycle left every centroid unchanged before the cap was hit.
    pub converged: bool,
    /// Sum of squared distances to each centroid.
    pub inertia: f64,
    /// Inertia after the initial Assign and after every cycle.
    pub inertia_history: Vec<f64>,
    /// Number of points assigned to each centroid.
    pub cluster_sizes: Vec<usize>,
}

/// Run state of one clustering session: configuration, centroids and labels.
///
/// The point set is not owned; callers pass the same [`PointSet`] to every call.
#[derive(Debug, Clone)]
pub struct KMeans {
    config: KMeansConfig,
    centroids: Option<DataMatrix>,
    labels: Option<Vec<usize>>,
}

impl KMeans {
    /// Create an uninitialized run.
    pub fn new(config: KMeansConfig) -> Self {
        Self {
            config,
            centroids: None,
            labels: None,
        }
    }

    pub fn config(&self) -> &KMeansConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        match (&self.centroids, &self.labels) {
            (None, _) => Phase::Uninitialized,
            (Some(_), None) => Phase::Initialized,
            (Some(_), Some(_)) => Phase::Assigned,
        }
    }

    pub fn centroids(&self) -> Option<&DataMatrix> {
        self.centroids.as_ref()
    }

    pub fn labels(&self) -> Option<&[usize]> {
        self.labels.as_deref()
    }

    /// Seed fresh centroids and clear labels, from any phase.
    pub fn initialize<R: Rng + ?Sized>(
        &mut self,
        points: &PointSet,
        method: &InitMethod,
        rng: &mut R,
    ) -> Result<&DataMatrix> {
        self.config.validate(points)?;
        let centroids = initialize(points, self.config.k, method, rng)?;
        tracing::info!(
            k = self.config.k,
            points = points.len(),
            dim = points.dim(),
            method = %method.strategy(),
            "initialised centroids"
        );
        self.labels = None;
        Ok(&*self.centroids.insert(centroids))
    }

    /// Drop centroids and labels, returning to [`Phase::Uninitialized`].
    pub fn reset(&mut self) {
        self.centroids = None;
        self.labels = None;
    }

    /// Advance one step: Assign on the first call, Update-then-Assign afterwards.
    pub fn step(&mut self, points: &PointSet) -> Result<Snapshot> {
        let (centroids, labels) = match (&self.centroids, &self.labels) {
            (None, _) => {
                return Err(KMeansError::UninitializedState(
                    "step requested before centroids were initialized".into(),
                ))
            }
            (Some(current), None) => (None, assign(points, current)?),
            (Some(current), Some(labels)) => {
                let next = update(points, labels, current)?;
                let labels = assign(points, &next)?;
                (Some(next), labels)
            }
        };
        if let Some(centroids) = centroids {
            self.centroids = Some(centroids);
        }
        self.commit_labels(points, labels);
        self.snapshot()
    }

    /// Run Assign once, then Update-then-Assign until centroids stop moving or
    /// `max_iterations` cycles have run.
    pub fn fit(&mut self, points: &PointSet) -> Result<FitOutcome> {
        let mut centroids = self.centroids.clone().ok_or_else(|| {
            KMeansError::UninitializedState("fit requested before centroids were initialized".into())
        })?;
        let mut labels = assign(points, &centroids)?;
        let mut inertia_history = vec![total_inertia(points, &centroids, &labels)];
        let mut iterations = 0usize;
        let mut converged = false;

        for _ in 0..self.config.max_iterations {
            let next = update(points, &labels, &centroids)?;
            labels = assign(points, &next)?;
            let unchanged = same_bits(&next, &centroids);
            centroids = next;
            let current = total_inertia(points, &centroids, &labels);
            inertia_history.push(current);
            if unchanged {
                converged = true;
                break;
            }
            iterations += 1;
            tracing::debug!(iteration = iterations, inertia = current, "lloyd iteration");
        }

        let sizes = cluster_sizes(&labels, self.config.k);
        let final_inertia = inertia_history.last().copied().unwrap_or_default();
        tracing::info!(
            iterations,
            converged,
            inertia = final_inertia,
            "kmeans fit finished"
        );
        self.centroids = Some(centroids);
        self.commit_labels(points, labels);
        Ok(FitOutcome {
            iterations,
            converged,
            inertia: final_inertia,
            inertia_history,
            cluster_sizes: sizes,
        })
    }

    fn commit_labels(&mut self, points: &PointSet, labels: Vec<usize>) {
        let sizes = cluster_sizes(&labels, self.config.k);
        if let Some(empty) = sizes.iter().position(|&size| size == 0) {
            tracing::warn!(cluster = empty, "cluster has no points; keeping its centroid");
        }
        if let Some(centroids) = self.centroids.as_ref() {
            tracing::debug!(
                inertia = total_inertia(points, centroids, &labels),
                ?sizes,
                "labels assigned"
            );
        }
        self.labels = Some(labels);
    }

    /// Current centroids and labels in transport form.
    pub fn snapshot(&self) -> Result<Snapshot> {
        let centroids = self.centroids.as_ref().ok_or_else(|| {
            KMeansError::UninitializedState("no centroids have been initialized".into())
        })?;
        Ok(Snapshot {
            centroids: matrix_to_rows(centroids),
            labels: self.labels.clone(),
        })
    }
}

/// Generate Gaussian blobs: N(0, 0.5) noise, with the points split into
/// `n_clusters` equal consecutive chunks each shifted by a centre drawn from N(0, 4).
///
/// Points past the last full chunk keep no shift.
pub fn generate_blobs<R: Rng + ?Sized>(
    n_samples: usize,
    dim: usize,
    n_clusters: usize,
    rng: &mut R,
) -> Result<PointSet> {
    if n_clusters == 0 {
        return Err(invalid("n_clusters must be greater than zero"));
    }
    if n_samples < n_clusters {
        return Err(invalid(format!(
            "cannot spread {n_samples} samples over {n_clusters} clusters"
        )));
    }
    if dim == 0 {
        return Err(invalid("dim must be greater than zero"));
    }
    match n_samples.checked_mul(dim) {
        Some(total) if total <= MAX_GENERATED_COORDINATES => {}
        _ => {
            return Err(invalid(format!(
                "{n_samples} x {dim} exceeds the limit of {MAX_GENERATED_COORDINATES} generated coordinates"
            )))
        }
    }
    let noise = Normal::new(0.0, 0.5).map_err(|err| invalid(err.to_string()))?;
    let spread = Normal::new(0.0, 4.0).map_err(|err| invalid(err.to_string()))?;
    let mut data: DataMatrix = Array2::random_using((n_samples, dim), noise, rng);

    let chunk = n_samples / n_clusters;
    for cluster in 0..n_clusters {
        let centre = ndarray::Array1::random_using(dim, spread, rng);
        for row_idx in cluster * chunk..(cluster + 1) * chunk {
            let mut row = data.row_mut(row_idx);
            row += &centre;
        }
    }
    PointSet::from_matrix(data)
}

/// Loader for point sets stored on disk.
pub struct DataLoader;

impl DataLoader {
    /// Load a headered CSV file of numeric columns.
    pub fn load_csv<P: AsRef<Path>>(path: P) -> Result<PointSet> {
        let mut rdr = ReaderBuilder::new().has_headers(true).from_path(path)?;
        let mut records: Vec<Vec<f64>> = Vec::new();
        for record in rdr.records() {
            let record = record?;
            let mut row = Vec::with_capacity(record.len());
            for field in record.iter() {
                row.push(field.trim().parse()?);
            }
            records.push(row);
        }
        PointSet::from_rows(records)
    }

    /// Load centroids from a JSON array of arrays.
    pub fn load_centroids_json<P: AsRef<Path>>(path: P) -> Result<Vec<Vec<f64>>> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
