//! Filter bank over canonical 94×125 faces.
//!
//! Each filter maps a [`NormalizedFace`] to another 11750-element vector.
//! Filters that work on 8-bit data first rescale the face with
//! [`NormalizedFace::to_u8`].

mod canny;
mod equalize;
mod gabor;
mod gaussian;
mod kernel;
mod lbp;
mod sobel;

use crate::types::{NormalizedFace, FACE_HEIGHT, FACE_WIDTH};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub use canny::canny_edges;
pub use equalize::equalize_hist;
pub use gabor::gabor_energy;
pub use gaussian::{difference_of_gaussians, laplacian_of_gaussian};
pub use lbp::lbp_texture;
pub use sobel::sobel_magnitude;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    #[serde(rename = "histograma")]
    HistogramEqualized,
    Sobel,
    Canny,
    Gabor,
    Log,
    Lbp,
    Dog,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown filter '{0}'")]
pub struct UnknownFilter(pub String);

impl FilterKind {
    pub const ALL: [FilterKind; 7] = [
        FilterKind::HistogramEqualized,
        FilterKind::Sobel,
        FilterKind::Canny,
        FilterKind::Gabor,
        FilterKind::Log,
        FilterKind::Lbp,
        FilterKind::Dog,
    ];

    /// Persisted identifier, as used in artifact file names.
    pub fn as_str(self) -> &'static str {
        match self {
            FilterKind::HistogramEqualized => "histograma",
            FilterKind::Sobel => "sobel",
            FilterKind::Canny => "canny",
            FilterKind::Gabor => "gabor",
            FilterKind::Log => "log",
            FilterKind::Lbp => "lbp",
            FilterKind::Dog => "dog",
        }
    }

    /// Closed range the filter's outputs fall in.
    pub fn domain(self) -> (f32, f32) {
        match self {
            FilterKind::Dog => (-1.0, 1.0),
            _ => (0.0, 1.0),
        }
    }

    pub fn apply(self, face: &NormalizedFace) -> FilterOutput {
        let (w, h) = (FACE_WIDTH, FACE_HEIGHT);
        let values = match self {
            FilterKind::HistogramEqualized => {
                equalize_hist(&face.to_u8()).into_iter().map(|p| p as f32 / 255.0).collect()
            }
            FilterKind::Sobel => sobel_magnitude(face.values(), w, h),
            FilterKind::Canny => canny_edges(&face.to_u8(), w, h),
            FilterKind::Gabor => gabor_energy(&face.to_u8(), w, h),
            FilterKind::Log => laplacian_of_gaussian(&face.to_u8(), w, h),
            FilterKind::Lbp => lbp_texture(&face.to_u8(), w, h),
            FilterKind::Dog => difference_of_gaussians(&face.to_u8(), w, h),
        };
        FilterOutput { kind: self, values }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = UnknownFilter;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownFilter(s.to_string()))
    }
}

/// One filter applied to one face.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutput {
    pub kind: FilterKind,
    pub values: Vec<f32>,
}
