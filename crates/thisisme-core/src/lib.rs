//! thisisme-core: face identification engine.
//!
//! Locates the dominant face in a photo with an SCRFD detector, normalizes it
//! to the canonical 94×125 crop, extracts filter-bank channels, projects them
//! through pre-fitted subspaces and ranks identities with a linear classifier.

pub mod artifacts;
pub mod cache;
pub mod composer;
pub mod detector;
pub mod filters;
pub mod frame;
pub mod locator;
pub mod normalizer;
pub mod pipeline;
pub mod ranker;
pub mod types;

pub use artifacts::{ArtifactError, ArtifactId, ArtifactStore, Channel, FsArtifactStore, LabelTable};
pub use cache::{ArtifactCache, ArtifactKey, ArtifactSet};
pub use composer::CombinationPolicy;
pub use detector::{FaceDetector, ScrfdDetector};
pub use filters::{FilterKind, FilterOutput};
pub use frame::GrayFrame;
pub use locator::{FaceLocator, LocatedFace};
pub use pipeline::{Recognition, RecognitionError, Recognizer};
pub use types::{BoundingBox, NormalizedFace, RankedIdentity, RankedResult};

use std::path::PathBuf;

/// Model directory used when none is configured.
pub fn default_model_dir() -> PathBuf {
    PathBuf::from("/var/lib/thisisme/models")
}
