//! Anomaly model scorer: offline isolation-forest training, online
//! inference, and the atomically-swappable artifact handle.
//!
//! The forest is trained over an engineered feature space derived from
//! the same historical aggregates the rule path uses, plus ratio and
//! circular-hour encodings. Scores follow the standard isolation-forest
//! form s = 2^(-E(h(x)) / c(n)): deep average isolation gives a low
//! score, shallow isolation a score near 1. Not-applicable entries are
//! imputed with the per-feature training median stored in the artifact.
//!
//! RULE: An artifact is immutable after training. Retraining installs a
//! whole new artifact under the handle's write lock; readers always see
//! a consistent snapshot.

use crate::{
    config::{ModelConfig, RiskConfig},
    error::{RiskError, RiskResult},
    features::FeatureVector,
    rng::{RngStream, ScopedRng},
    stats,
    store::HistoryRow,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Euler–Mascheroni constant, for the harmonic-number approximation.
const EULER_GAMMA: f64 = 0.577_215_664_9;

/// Ordered feature space the model is trained on.
pub const FEATURE_NAMES: [&str; 8] = [
    "amount",
    "amount_ratio_to_mean",
    "z_amount",
    "count_10m",
    "hour_sin",
    "hour_cos",
    "hour_delta_circ",
    "distance_from_home_km",
];

const N_FEATURES: usize = FEATURE_NAMES.len();

// ── Forest structure ───────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsoNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsoTree {
    nodes: Vec<IsoNode>,
}

impl IsoTree {
    /// Path length of `x` through this tree, with the usual c(size)
    /// adjustment at unsplit leaves.
    fn path_length(&self, x: &[f64]) -> f64 {
        let mut idx = 0usize;
        let mut depth = 0.0;
        loop {
            match &self.nodes[idx] {
                IsoNode::Leaf { size } => return depth + c_factor(*size),
                IsoNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] < *threshold { *left } else { *right };
                    depth += 1.0;
                }
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over n points.
fn c_factor(n: usize) -> f64 {
    if n <= 1 {
        return 0.0;
    }
    let nf = n as f64;
    let harmonic = (nf - 1.0).ln() + EULER_GAMMA;
    2.0 * harmonic - 2.0 * (nf - 1.0) / nf
}

// ── Artifact ───────────────────────────────────────────────────

/// A complete trained model: forest, feature ordering, imputation
/// fallbacks, and training metadata. Persisted as one JSON bundle and
/// always loaded in full before any inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub artifact_id: String,
    pub feature_names: Vec<String>,
    /// Per-feature median over the finite training values; used to
    /// impute not-applicable entries at inference time.
    pub imputation: Vec<f64>,
    pub trees: Vec<IsoTree>,
    /// Subsample size the trees were grown on; normalises path lengths.
    pub subsample: usize,
    /// Score at the contamination quantile of the training set.
    pub score_threshold: f64,
    pub contamination: f64,
    pub window_days: u32,
    pub sample_count: usize,
    pub trained_at: String,
}

impl ModelArtifact {
    /// Anomaly score in (0, 1) for a vector in the artifact's feature
    /// order. Non-finite entries are imputed first.
    pub fn score_vector(&self, x: &[f64]) -> f64 {
        let imputed: Vec<f64> = x
            .iter()
            .zip(&self.imputation)
            .map(|(v, fallback)| if v.is_finite() { *v } else { *fallback })
            .collect();
        let total: f64 = self.trees.iter().map(|t| t.path_length(&imputed)).sum();
        let avg_path = total / self.trees.len() as f64;
        let denom = c_factor(self.subsample);
        if denom <= 0.0 {
            return 0.5;
        }
        2.0_f64.powf(-avg_path / denom)
    }

    pub fn is_anomalous(&self, score: f64) -> bool {
        score >= self.score_threshold
    }

    pub fn save_to_file(&self, path: &str) -> RiskResult<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
            .map_err(|e| anyhow::anyhow!("Cannot write artifact {path}: {e}"))?;
        log::info!("model artifact {} saved to {path}", self.artifact_id);
        Ok(())
    }

    pub fn from_file(path: &str) -> RiskResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read artifact {path}: {e}"))?;
        let artifact: ModelArtifact = serde_json::from_str(&content)?;
        log::info!(
            "model artifact {} loaded from {path} ({} trees, {} samples)",
            artifact.artifact_id,
            artifact.trees.len(),
            artifact.sample_count
        );
        Ok(artifact)
    }
}

/// Result payload of a training run.
#[derive(Debug, Clone, Serialize)]
pub struct TrainReport {
    pub ok: bool,
    pub sample_count: usize,
    pub feature_names: Vec<String>,
}

// ── Shared handle ──────────────────────────────────────────────

/// Process-wide holder for the loaded artifact. Readers take an Arc
/// snapshot per request; retraining swaps the whole artifact at once.
#[derive(Default)]
pub struct ModelHandle {
    inner: RwLock<Option<Arc<ModelArtifact>>>,
}

impl ModelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, artifact: ModelArtifact) {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        log::info!(
            "installing model artifact {} ({} samples)",
            artifact.artifact_id,
            artifact.sample_count
        );
        *guard = Some(Arc::new(artifact));
    }

    pub fn snapshot(&self) -> Option<Arc<ModelArtifact>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

// ── Feature-space construction ─────────────────────────────────

/// Online input vector in FEATURE_NAMES order. Not-applicable entries
/// are NaN; the artifact imputes them at scoring time. Mean-derived
/// entries carry the same sample-minimum gate as the training matrix,
/// so the online and offline feature spaces agree.
pub fn model_input(f: &FeatureVector, config: &RiskConfig) -> Vec<f64> {
    let theta = f64::from(f.hour) * std::f64::consts::TAU / 24.0;
    let ratio = match f.mean_amount {
        Some(mean) if f.sample_count >= config.min_baseline_samples && mean > 0.0 => {
            f.amount / mean
        }
        _ => f64::NAN,
    };
    vec![
        f.amount,
        ratio,
        f.z_amount.unwrap_or(f64::NAN),
        f.count_10m as f64,
        theta.sin(),
        theta.cos(),
        f.hour_delta_from_avg.unwrap_or(f64::NAN),
        f.distance_from_home_km.unwrap_or(f64::NAN),
    ]
}

/// Expanding per-source state for training-matrix construction.
/// Only rows strictly before the current one contribute, mirroring the
/// online windows.
#[derive(Default)]
struct SourceState {
    n: i64,
    sum: f64,
    sumsq: f64,
    hours: Vec<f64>,
    recent_epochs: Vec<i64>,
    lat_sum: f64,
    lon_sum: f64,
    geo_n: i64,
}

/// Build the raw (pre-imputation) training matrix in FEATURE_NAMES
/// order: one row per ledger row, features derived from the rows that
/// precede it for the same source.
pub fn training_matrix(rows: &[HistoryRow], config: &RiskConfig) -> Vec<Vec<f64>> {
    let min = config.min_baseline_samples;
    let mut matrix = Vec::with_capacity(rows.len());
    let mut state = SourceState::default();
    let mut current_source: Option<&str> = None;

    for row in rows {
        if current_source != Some(row.source_id.as_str()) {
            state = SourceState::default();
            current_source = Some(row.source_id.as_str());
        }

        let hour = (row.epoch.rem_euclid(86_400) / 3_600) as f64;
        let theta = hour * std::f64::consts::TAU / 24.0;

        let mean = (state.n > 0).then(|| state.sum / state.n as f64);
        let std = stats::sample_std(state.n, state.sum, state.sumsq);
        let applicable = state.n >= min;

        let ratio = match mean {
            Some(m) if applicable && m > 0.0 => row.amount / m,
            _ => f64::NAN,
        };
        let z = match (mean, std) {
            (Some(m), Some(s)) if applicable && s > 0.0 => (row.amount - m) / s,
            _ => f64::NAN,
        };
        // Half-open window, matching the online burst query: epochs in
        // [epoch - 600, epoch). Same-epoch rows stay buffered for later
        // rows but do not count toward their own window.
        state.recent_epochs.retain(|e| row.epoch - e <= 600);
        let count_10m = state
            .recent_epochs
            .iter()
            .filter(|&&e| e < row.epoch)
            .count() as f64;
        let hour_delta = if applicable {
            stats::circular_mean_hour(&state.hours)
                .map_or(f64::NAN, |m| stats::circular_hour_diff(hour, m))
        } else {
            f64::NAN
        };
        let distance = match (row.latitude, row.longitude) {
            (Some(lat), Some(lon)) if applicable && state.geo_n >= min => {
                let home_lat = state.lat_sum / state.geo_n as f64;
                let home_lon = state.lon_sum / state.geo_n as f64;
                stats::haversine_km(lat, lon, home_lat, home_lon)
            }
            _ => f64::NAN,
        };

        matrix.push(vec![
            row.amount,
            ratio,
            z,
            count_10m,
            theta.sin(),
            theta.cos(),
            hour_delta,
            distance,
        ]);

        state.n += 1;
        state.sum += row.amount;
        state.sumsq += row.amount * row.amount;
        state.hours.push(hour);
        state.recent_epochs.push(row.epoch);
        if let (Some(lat), Some(lon)) = (row.latitude, row.longitude) {
            state.lat_sum += lat;
            state.lon_sum += lon;
            state.geo_n += 1;
        }
    }
    matrix
}

// ── Training ───────────────────────────────────────────────────

/// Fit an isolation forest over the window rows. Deterministic for a
/// given (rows, contamination, ModelConfig) triple.
pub fn train(
    rows: &[HistoryRow],
    window_days: u32,
    contamination: f64,
    config: &RiskConfig,
) -> RiskResult<ModelArtifact> {
    if rows.is_empty() {
        return Err(RiskError::EmptyTrainingWindow { window_days });
    }
    let contamination = contamination.clamp(0.0, 0.5);
    let model_cfg: &ModelConfig = &config.model;

    let raw = training_matrix(rows, config);

    // Median imputation fallbacks, one per feature column.
    let mut imputation = vec![0.0; N_FEATURES];
    for (col, fallback) in imputation.iter_mut().enumerate() {
        let column: Vec<f64> = raw.iter().map(|r| r[col]).collect();
        *fallback = stats::finite_median(&column).unwrap_or(0.0);
    }
    let data: Vec<Vec<f64>> = raw
        .iter()
        .map(|r| {
            r.iter()
                .zip(&imputation)
                .map(|(v, f)| if v.is_finite() { *v } else { *f })
                .collect()
        })
        .collect();

    let subsample = model_cfg.max_samples.min(data.len()).max(2);
    let max_depth = (subsample as f64).log2().ceil() as usize;
    let mut rng = ScopedRng::new(model_cfg.seed, RngStream::ModelTraining);

    let mut trees = Vec::with_capacity(model_cfg.n_estimators);
    for _ in 0..model_cfg.n_estimators {
        let sample = sample_without_replacement(data.len(), subsample, &mut rng);
        let mut nodes = Vec::new();
        build_node(&data, &sample, 0, max_depth, &mut rng, &mut nodes);
        trees.push(IsoTree { nodes });
    }

    let artifact = ModelArtifact {
        artifact_id: uuid::Uuid::new_v4().to_string(),
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        imputation,
        trees,
        subsample,
        score_threshold: 1.0, // placeholder until the quantile pass below
        contamination,
        window_days,
        sample_count: data.len(),
        trained_at: chrono::Utc::now().to_rfc3339(),
    };

    // Contamination quantile over the training scores.
    let mut scores: Vec<f64> = data.iter().map(|x| artifact.score_vector(x)).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    let k = ((scores.len() as f64) * contamination).ceil() as usize;
    let score_threshold = if k == 0 {
        1.0
    } else {
        scores[(k - 1).min(scores.len() - 1)]
    };

    log::info!(
        "trained isolation forest: {} trees, {} samples, subsample {}, threshold {:.4}",
        model_cfg.n_estimators,
        data.len(),
        subsample,
        score_threshold
    );

    Ok(ModelArtifact {
        score_threshold,
        ..artifact
    })
}

fn sample_without_replacement(n: usize, k: usize, rng: &mut ScopedRng) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..n).collect();
    // Partial Fisher–Yates: only the first k positions are needed.
    for i in 0..k.min(n) {
        let j = i + rng.next_u64_below((n - i) as u64) as usize;
        indices.swap(i, j);
    }
    indices.truncate(k.min(n));
    indices
}

/// Grow one subtree over `sample` rows; returns the node's arena index.
fn build_node(
    data: &[Vec<f64>],
    sample: &[usize],
    depth: usize,
    max_depth: usize,
    rng: &mut ScopedRng,
    nodes: &mut Vec<IsoNode>,
) -> usize {
    if depth >= max_depth || sample.len() <= 1 {
        nodes.push(IsoNode::Leaf { size: sample.len() });
        return nodes.len() - 1;
    }

    // Candidate features: those with spread in this sample.
    let mut candidates = Vec::with_capacity(N_FEATURES);
    for col in 0..N_FEATURES {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for &i in sample {
            lo = lo.min(data[i][col]);
            hi = hi.max(data[i][col]);
        }
        if hi > lo {
            candidates.push((col, lo, hi));
        }
    }
    if candidates.is_empty() {
        nodes.push(IsoNode::Leaf { size: sample.len() });
        return nodes.len() - 1;
    }

    let (feature, lo, hi) = candidates[rng.next_u64_below(candidates.len() as u64) as usize];
    let threshold = rng.uniform(lo, hi);

    let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = sample
        .iter()
        .copied()
        .partition(|&i| data[i][feature] < threshold);
    if left_rows.is_empty() || right_rows.is_empty() {
        nodes.push(IsoNode::Leaf { size: sample.len() });
        return nodes.len() - 1;
    }

    // Reserve this node's slot before recursing so child indices are stable.
    nodes.push(IsoNode::Leaf { size: 0 });
    let this = nodes.len() - 1;
    let left = build_node(data, &left_rows, depth + 1, max_depth, rng, nodes);
    let right = build_node(data, &right_rows, depth + 1, max_depth, rng, nodes);
    nodes[this] = IsoNode::Split {
        feature,
        threshold,
        left,
        right,
    };
    this
}
