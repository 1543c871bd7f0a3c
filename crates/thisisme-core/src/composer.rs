//! Feature composition: filter channels, center, project, concatenate.

use crate::artifacts::Channel;
use crate::cache::ArtifactSet;
use crate::filters::FilterKind;
use crate::types::{LengthMismatch, NormalizedFace};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Which channels feed the classifier, and whether they are mean-centered
/// before projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum CombinationPolicy {
    #[serde(rename = "histograma")]
    Histogram,
    #[serde(rename = "sobel_canny_histograma_gabor_log")]
    SobelCannyHistogramGaborLog,
    #[default]
    #[serde(rename = "original_histograma_gabor")]
    OriginalHistogramGabor,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown combination policy '{0}'")]
pub struct UnknownPolicy(pub String);

impl CombinationPolicy {
    pub const ALL: [CombinationPolicy; 3] = [
        CombinationPolicy::Histogram,
        CombinationPolicy::SobelCannyHistogramGaborLog,
        CombinationPolicy::OriginalHistogramGabor,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CombinationPolicy::Histogram => "histograma",
            CombinationPolicy::SobelCannyHistogramGaborLog => "sobel_canny_histograma_gabor_log",
            CombinationPolicy::OriginalHistogramGabor => "original_histograma_gabor",
        }
    }

    /// Channels in concatenation order.
    pub fn channels(self) -> &'static [Channel] {
        use FilterKind::*;
        match self {
            CombinationPolicy::Histogram => &[Channel::Filtered(HistogramEqualized)],
            CombinationPolicy::SobelCannyHistogramGaborLog => &[
                Channel::Filtered(Sobel),
                Channel::Filtered(Canny),
                Channel::Filtered(HistogramEqualized),
                Channel::Filtered(Gabor),
                Channel::Filtered(Log),
            ],
            CombinationPolicy::OriginalHistogramGabor => &[
                Channel::Original,
                Channel::Filtered(HistogramEqualized),
                Channel::Filtered(Gabor),
            ],
        }
    }

    /// Whether each channel has its dataset mean removed before projection.
    /// The served policy was trained on uncentered channels.
    pub fn subtracts_means(self) -> bool {
        match self {
            CombinationPolicy::Histogram | CombinationPolicy::SobelCannyHistogramGaborLog => true,
            CombinationPolicy::OriginalHistogramGabor => false,
        }
    }
}

impl fmt::Display for CombinationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CombinationPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CombinationPolicy::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPolicy(s.to_string()))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ComposeError {
    #[error("no projection loaded for channel '{0}'")]
    MissingProjection(Channel),
    #[error("no mean vector loaded for channel '{0}'")]
    MissingMean(Channel),
    #[error("channel '{channel}': {source}")]
    Length {
        channel: Channel,
        #[source]
        source: LengthMismatch,
    },
}

fn channel_values(face: &NormalizedFace, channel: Channel) -> Vec<f32> {
    match channel {
        Channel::Original => face.values().to_vec(),
        Channel::Filtered(kind) => kind.apply(face).values,
    }
}

fn project_channel(
    face: &NormalizedFace,
    channel: Channel,
    policy: CombinationPolicy,
    artifacts: &ArtifactSet,
) -> Result<Vec<f32>, ComposeError> {
    let projection = artifacts
        .projection(channel)
        .ok_or(ComposeError::MissingProjection(channel))?;
    let length = |source| ComposeError::Length { channel, source };

    let mut values = channel_values(face, channel);
    if policy.subtracts_means() {
        let mean = artifacts.mean(channel).ok_or(ComposeError::MissingMean(channel))?;
        values = mean.subtract_from(&values).map_err(length)?;
    }
    projection.transform(&values).map_err(length)
}

/// Build the classifier input for `face` under `policy`.
///
/// Channel branches run in parallel; their projections are concatenated in
/// [`CombinationPolicy::channels`] order.
pub fn compose(
    face: &NormalizedFace,
    policy: CombinationPolicy,
    artifacts: &ArtifactSet,
) -> Result<Vec<f32>, ComposeError> {
    let parts: Vec<Vec<f32>> = policy
        .channels()
        .par_iter()
        .map(|&channel| project_channel(face, channel, policy, artifacts))
        .collect::<Result<_, _>>()?;

    let features = parts.concat();
    tracing::trace!(%policy, len = features.len(), "composed feature vector");
    Ok(features)
}
