//! End-to-end recognition: bytes → frame → face → features → ranking.

use crate::artifacts::{ArtifactError, ArtifactStore, LabelTable};
use crate::cache::{ArtifactCache, ArtifactKey};
use crate::composer::{compose, CombinationPolicy, ComposeError};
use crate::detector::{DetectorError, FaceDetector};
use crate::frame::{FrameError, GrayFrame};
use crate::locator::{FaceLocator, LocateError, LocatedFace};
use crate::normalizer::NormalizeError;
use crate::ranker::{rank, RankError};
use crate::types::{BoundingBox, RankedResult};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecognitionError {
    #[error("no face detected")]
    NoFaceDetected,
    #[error("model artifact missing for {key}: {source}")]
    ArtifactNotFound {
        key: ArtifactKey,
        #[source]
        source: ArtifactError,
    },
    #[error("model artifact failed to load for {key}: {source}")]
    ArtifactLoadFailed {
        key: ArtifactKey,
        #[source]
        source: ArtifactError,
    },
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("face detector failed: {0}")]
    Detector(#[from] DetectorError),
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl RecognitionError {
    fn artifact(key: ArtifactKey, source: ArtifactError) -> Self {
        if source.is_not_found() {
            RecognitionError::ArtifactNotFound { key, source }
        } else {
            RecognitionError::ArtifactLoadFailed { key, source }
        }
    }

    /// True for failures caused by the caller's input rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(self, RecognitionError::NoFaceDetected | RecognitionError::MalformedInput(_))
    }
}

impl From<FrameError> for RecognitionError {
    fn from(e: FrameError) -> Self {
        RecognitionError::MalformedInput(e.to_string())
    }
}

impl From<NormalizeError> for RecognitionError {
    fn from(e: NormalizeError) -> Self {
        RecognitionError::MalformedInput(e.to_string())
    }
}

impl From<LocateError> for RecognitionError {
    fn from(e: LocateError) -> Self {
        match e {
            LocateError::Detector(e) => RecognitionError::Detector(e),
            LocateError::Normalize(e) => e.into(),
        }
    }
}

impl From<ComposeError> for RecognitionError {
    fn from(e: ComposeError) -> Self {
        match e {
            ComposeError::Length { .. } => RecognitionError::MalformedInput(e.to_string()),
            ComposeError::MissingProjection(_) | ComposeError::MissingMean(_) => {
                RecognitionError::Configuration(e.to_string())
            }
        }
    }
}

impl From<RankError> for RecognitionError {
    fn from(e: RankError) -> Self {
        RecognitionError::Configuration(e.to_string())
    }
}

/// Outcome of one recognition request.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub ranking: RankedResult,
    pub bbox: BoundingBox,
    pub n_components: u32,
    pub policy: CombinationPolicy,
}

/// Shared recognition service. Cheap to share behind an `Arc`; all methods
/// take `&self`.
pub struct Recognizer {
    locator: FaceLocator,
    cache: ArtifactCache,
    labels: LabelTable,
    policy: CombinationPolicy,
}

impl Recognizer {
    pub fn new(
        detector: Arc<dyn FaceDetector>,
        store: Arc<dyn ArtifactStore>,
        labels: LabelTable,
        policy: CombinationPolicy,
    ) -> Self {
        Self {
            locator: FaceLocator::new(detector),
            cache: ArtifactCache::new(store),
            labels,
            policy,
        }
    }

    pub fn policy(&self) -> CombinationPolicy {
        self.policy
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn cached_keys(&self) -> Vec<ArtifactKey> {
        self.cache.cached_keys()
    }

    /// Decode an uploaded image and recognize the dominant face in it.
    pub fn recognize_bytes(&self, bytes: &[u8], n_components: u32) -> Result<Recognition, RecognitionError> {
        let frame = GrayFrame::decode(bytes)?;
        self.recognize(&frame, n_components)
    }

    /// Locate the dominant face without classifying it.
    pub fn locate(&self, frame: &GrayFrame) -> Result<Option<LocatedFace>, RecognitionError> {
        Ok(self.locator.locate(frame)?)
    }

    pub fn recognize(&self, frame: &GrayFrame, n_components: u32) -> Result<Recognition, RecognitionError> {
        if n_components == 0 {
            return Err(RecognitionError::MalformedInput("n_components must be positive".into()));
        }
        let start = Instant::now();

        // Detection runs first so that a frame without a face never loads artifacts.
        let located = self.locator.locate(frame)?.ok_or(RecognitionError::NoFaceDetected)?;

        let key = ArtifactKey::new(n_components, self.policy);
        let artifacts = self.load(key)?;

        let features = compose(&located.face, self.policy, &artifacts)?;
        let classifier = artifacts.classifier();
        if classifier.n_classes() != self.labels.len() {
            return Err(RecognitionError::Configuration(format!(
                "classifier for {key} has {} classes, label table has {}",
                classifier.n_classes(),
                self.labels.len()
            )));
        }
        let scores = classifier
            .decision_scores(&features)
            .map_err(|e| RecognitionError::Configuration(format!("classifier for {key}: {e}")))?;
        let ranking = rank(&scores, &self.labels)?;

        tracing::info!(
            %key,
            identity = %ranking.top().label,
            probability = ranking.top().probability,
            ms = start.elapsed().as_millis() as u64,
            "recognized face"
        );

        Ok(Recognition {
            ranking,
            bbox: located.bbox,
            n_components,
            policy: self.policy,
        })
    }

    /// Load the artifacts for `n_components` ahead of the first request.
    pub fn preload(&self, n_components: u32) -> Result<(), RecognitionError> {
        self.load(ArtifactKey::new(n_components, self.policy)).map(|_| ())
    }

    fn load(&self, key: ArtifactKey) -> Result<Arc<crate::cache::ArtifactSet>, RecognitionError> {
        self.cache
            .get_or_load(key)
            .map_err(|e| RecognitionError::artifact(key, e))
    }
}
