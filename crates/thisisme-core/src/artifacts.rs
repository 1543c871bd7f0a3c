//! Pre-fitted model artifacts and the store that loads them.
//!
//! Artifacts are JSON files under a model directory:
//!
//! ```text
//! pca/<channel>_<n>.json         projection for one channel and dimensionality
//! svm/<policy>/<n>.json          linear classifier for one policy and dimensionality
//! means/mean_<channel>.json      per-channel centering vector
//! target_names.json              identity labels, indexed by class
//! ```

use crate::composer::CombinationPolicy;
use crate::filters::{FilterKind, UnknownFilter};
use crate::types::{LengthMismatch, FACE_LEN, TOP_K};
use ndarray::{Array1, Array2};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

/// A projection input: the raw face or one filter-bank output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    Original,
    Filtered(FilterKind),
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Original => "original",
            Channel::Filtered(kind) => kind.as_str(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "original" => Ok(Channel::Original),
            other => other.parse().map(Channel::Filtered),
        }
    }
}

/// Names one persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactId {
    Projection { channel: Channel, n_components: u32 },
    Classifier { policy: CombinationPolicy, n_components: u32 },
    Mean(Channel),
    Labels,
}

impl ArtifactId {
    /// Path relative to the model directory.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(format!("{self}.json"))
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactId::Projection { channel, n_components } => write!(f, "pca/{channel}_{n_components}"),
            ArtifactId::Classifier { policy, n_components } => write!(f, "svm/{policy}/{n_components}"),
            ArtifactId::Mean(channel) => write!(f, "means/mean_{channel}"),
            ArtifactId::Labels => f.write_str("target_names"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ArtifactError {
    #[error("artifact '{id}' not found at {path}")]
    NotFound { id: ArtifactId, path: PathBuf },
    #[error("artifact '{id}' failed to load: {reason}")]
    LoadFailed { id: ArtifactId, reason: String },
    #[error("artifact '{id}' is invalid: {reason}")]
    Invalid { id: ArtifactId, reason: String },
}

impl ArtifactError {
    pub fn id(&self) -> ArtifactId {
        match self {
            ArtifactError::NotFound { id, .. }
            | ArtifactError::LoadFailed { id, .. }
            | ArtifactError::Invalid { id, .. } => *id,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ArtifactError::NotFound { .. })
    }
}

/// Pre-fitted PCA-style projection: `components · (x − mean)`, optionally
/// whitened by the per-component explained variance.
#[derive(Debug, Clone)]
pub struct ProjectionModel {
    mean: Array1<f32>,
    components: Array2<f32>,
    scale: Option<Array1<f32>>,
}

#[derive(Deserialize)]
struct ProjectionFile {
    mean: Vec<f32>,
    components: Vec<Vec<f32>>,
    #[serde(default)]
    explained_variance: Option<Vec<f32>>,
    #[serde(default)]
    whiten: bool,
}

impl ProjectionModel {
    /// Build from row-major components. Every row and the mean must have the
    /// same length; whitening requires one positive variance per component.
    pub fn new(
        mean: Vec<f32>,
        components: Vec<Vec<f32>>,
        explained_variance: Option<Vec<f32>>,
        whiten: bool,
    ) -> Result<Self, String> {
        let dim = mean.len();
        let n = components.len();
        if n == 0 {
            return Err("no components".into());
        }
        if let Some(row) = components.iter().position(|r| r.len() != dim) {
            return Err(format!("component {row} has length {}, mean has {dim}", components[row].len()));
        }

        let scale = if whiten {
            let variance = explained_variance.ok_or("whiten requires explained_variance")?;
            if variance.len() != n {
                return Err(format!("{} variances for {n} components", variance.len()));
            }
            if variance.iter().any(|v| !v.is_finite() || *v <= 0.0) {
                return Err("explained_variance must be positive".into());
            }
            Some(variance.iter().map(|v| 1.0 / v.sqrt()).collect())
        } else {
            None
        };

        let flat: Vec<f32> = components.into_iter().flatten().collect();
        let components = Array2::from_shape_vec((n, dim), flat).map_err(|e| e.to_string())?;

        Ok(Self {
            mean: Array1::from(mean),
            components,
            scale,
        })
    }

    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    pub fn input_len(&self) -> usize {
        self.mean.len()
    }

    pub fn transform(&self, x: &[f32]) -> Result<Vec<f32>, LengthMismatch> {
        if x.len() != self.input_len() {
            return Err(LengthMismatch { expected: self.input_len(), actual: x.len() });
        }
        let centered = ndarray::ArrayView1::from(x).to_owned() - &self.mean;
        let mut projected = self.components.dot(&centered);
        if let Some(scale) = &self.scale {
            projected *= scale;
        }
        Ok(projected.to_vec())
    }
}

/// Pre-fitted linear multi-class decision function.
#[derive(Debug, Clone)]
pub struct ClassifierModel {
    coef: Array2<f64>,
    intercept: Array1<f64>,
}

#[derive(Deserialize)]
struct ClassifierFile {
    coef: Vec<Vec<f64>>,
    intercept: Vec<f64>,
}

impl ClassifierModel {
    pub fn new(coef: Vec<Vec<f64>>, intercept: Vec<f64>) -> Result<Self, String> {
        let classes = coef.len();
        if classes == 0 {
            return Err("no classes".into());
        }
        if intercept.len() != classes {
            return Err(format!("{} intercepts for {classes} classes", intercept.len()));
        }
        let features = coef[0].len();
        if let Some(row) = coef.iter().position(|r| r.len() != features) {
            return Err(format!("coef row {row} has length {}, expected {features}", coef[row].len()));
        }
        let flat: Vec<f64> = coef.into_iter().flatten().collect();
        let coef = Array2::from_shape_vec((classes, features), flat).map_err(|e| e.to_string())?;
        Ok(Self {
            coef,
            intercept: Array1::from(intercept),
        })
    }

    pub fn n_classes(&self) -> usize {
        self.coef.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.coef.ncols()
    }

    /// One score per class: `coef · x + intercept`, in f64.
    pub fn decision_scores(&self, x: &[f32]) -> Result<Vec<f64>, LengthMismatch> {
        if x.len() != self.n_features() {
            return Err(LengthMismatch { expected: self.n_features(), actual: x.len() });
        }
        let x: Array1<f64> = x.iter().map(|&v| v as f64).collect();
        Ok((self.coef.dot(&x) + &self.intercept).to_vec())
    }
}

/// Per-channel centering vector of canonical length.
#[derive(Debug, Clone, PartialEq)]
pub struct MeanVector {
    values: Vec<f32>,
}

impl MeanVector {
    pub fn new(values: Vec<f32>) -> Result<Self, LengthMismatch> {
        if values.len() != FACE_LEN {
            return Err(LengthMismatch { expected: FACE_LEN, actual: values.len() });
        }
        Ok(Self { values })
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// `x − mean`, element-wise.
    pub fn subtract_from(&self, x: &[f32]) -> Result<Vec<f32>, LengthMismatch> {
        if x.len() != self.values.len() {
            return Err(LengthMismatch { expected: self.values.len(), actual: x.len() });
        }
        Ok(x.iter().zip(&self.values).map(|(a, m)| a - m).collect())
    }
}

/// Ordered identity labels; index = classifier class index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    labels: Vec<String>,
}

impl LabelTable {
    /// At least [`TOP_K`] labels are required to produce a ranking.
    pub fn new(labels: Vec<String>) -> Result<Self, ArtifactError> {
        if labels.len() < TOP_K {
            return Err(ArtifactError::Invalid {
                id: ArtifactId::Labels,
                reason: format!("{} identity labels, at least {TOP_K} required", labels.len()),
            });
        }
        Ok(Self { labels })
    }

    /// Read a JSON array of strings.
    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let labels: Vec<String> = read_json(ArtifactId::Labels, path)?;
        let table = Self::new(labels)?;
        tracing::info!(path = %path.display(), classes = table.len(), "loaded identity labels");
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, class_index: usize) -> Option<&str> {
        self.labels.get(class_index).map(String::as_str)
    }
}

/// Typed access to persisted artifacts.
pub trait ArtifactStore: Send + Sync {
    fn projection(&self, channel: Channel, n_components: u32) -> Result<ProjectionModel, ArtifactError>;
    fn classifier(&self, policy: CombinationPolicy, n_components: u32) -> Result<ClassifierModel, ArtifactError>;
    fn mean(&self, channel: Channel) -> Result<MeanVector, ArtifactError>;
}

fn read_json<T: DeserializeOwned>(id: ArtifactId, path: &Path) -> Result<T, ArtifactError> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        ErrorKind::NotFound => ArtifactError::NotFound { id, path: path.to_path_buf() },
        _ => ArtifactError::LoadFailed { id, reason: format!("{}: {e}", path.display()) },
    })?;
    serde_json::from_slice(&bytes).map_err(|e| ArtifactError::LoadFailed {
        id,
        reason: format!("{}: {e}", path.display()),
    })
}

/// Artifact store backed by JSON files under a model directory.
#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, id: ArtifactId) -> PathBuf {
        self.root.join(id.relative_path())
    }

    fn load<T: DeserializeOwned>(&self, id: ArtifactId) -> Result<T, ArtifactError> {
        let path = self.path_for(id);
        let value = read_json(id, &path)?;
        tracing::debug!(artifact = %id, path = %path.display(), "read artifact");
        Ok(value)
    }
}

impl ArtifactStore for FsArtifactStore {
    fn projection(&self, channel: Channel, n_components: u32) -> Result<ProjectionModel, ArtifactError> {
        let id = ArtifactId::Projection { channel, n_components };
        let file: ProjectionFile = self.load(id)?;
        let model = ProjectionModel::new(file.mean, file.components, file.explained_variance, file.whiten)
            .map_err(|reason| ArtifactError::Invalid { id, reason })?;
        if model.n_components() != n_components as usize {
            return Err(ArtifactError::Invalid {
                id,
                reason: format!("holds {} components", model.n_components()),
            });
        }
        if model.input_len() != FACE_LEN {
            return Err(ArtifactError::Invalid {
                id,
                reason: format!("projects {}-element inputs, expected {FACE_LEN}", model.input_len()),
            });
        }
        Ok(model)
    }

    fn classifier(&self, policy: CombinationPolicy, n_components: u32) -> Result<ClassifierModel, ArtifactError> {
        let id = ArtifactId::Classifier { policy, n_components };
        let file: ClassifierFile = self.load(id)?;
        ClassifierModel::new(file.coef, file.intercept).map_err(|reason| ArtifactError::Invalid { id, reason })
    }

    fn mean(&self, channel: Channel) -> Result<MeanVector, ArtifactError> {
        let id = ArtifactId::Mean(channel);
        let values: Vec<f32> = self.load(id)?;
        MeanVector::new(values).map_err(|e| ArtifactError::Invalid { id, reason: e.to_string() })
    }
}
