use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Canonical face width in pixels.
pub const FACE_WIDTH: usize = 94;
/// Canonical face height in pixels.
pub const FACE_HEIGHT: usize = 125;
/// Length of a flattened canonical face (125 rows × 94 columns).
pub const FACE_LEN: usize = FACE_WIDTH * FACE_HEIGHT;
/// Number of identities returned by a ranking.
pub const TOP_K: usize = 5;

// Absorbs the f32 error of the /255 scaling so that k/255 maps back to k.
const RESCALE_EPSILON: f32 = 1e-3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("expected a {expected}-element vector, got {actual}")]
pub struct LengthMismatch {
    pub expected: usize,
    pub actual: usize,
}

/// Bounding box for a detected face, in integer frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height, confidence: 1.0 }
    }

    /// Box area in pixels; the locator ranks candidates by it.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A face cropped to the canonical 94×125 resolution, flattened row-major,
/// with intensities scaled to [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedFace {
    values: Vec<f32>,
}

impl NormalizedFace {
    /// Wrap an already-scaled vector. Fails loudly on any length other than
    /// [`FACE_LEN`] rather than reshaping.
    pub fn from_values(values: Vec<f32>) -> Result<Self, LengthMismatch> {
        if values.len() != FACE_LEN {
            return Err(LengthMismatch { expected: FACE_LEN, actual: values.len() });
        }
        Ok(Self { values })
    }

    /// Build from 8-bit canonical pixels, dividing by 255.
    pub fn from_pixels(pixels: &[u8]) -> Result<Self, LengthMismatch> {
        Self::from_values(pixels.iter().map(|&p| p as f32 / 255.0).collect())
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Rescale to 8-bit with the truncating cast used at training time.
    pub fn to_u8(&self) -> Vec<u8> {
        self.values
            .iter()
            .map(|&v| (v * 255.0 + RESCALE_EPSILON).floor().clamp(0.0, 255.0) as u8)
            .collect()
    }
}

/// One entry of a ranking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedIdentity {
    pub class_index: usize,
    pub label: String,
    /// Softmax probability over the full class set.
    pub probability: f64,
}

/// The five most likely identities, most likely first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    pub entries: [RankedIdentity; TOP_K],
}

impl RankedResult {
    pub fn top(&self) -> &RankedIdentity {
        &self.entries[0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedIdentity> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_face_length_is_canonical() {
        assert_eq!(FACE_LEN, 11750);
    }

    #[test]
    fn test_from_values_rejects_wrong_length() {
        let err = NormalizedFace::from_values(vec![0.0; FACE_LEN - 1]).unwrap_err();
        assert_eq!(err, LengthMismatch { expected: FACE_LEN, actual: FACE_LEN - 1 });
    }

    #[test]
    fn test_pixels_roundtrip_through_u8() {
        let pixels: Vec<u8> = (0..FACE_LEN).map(|i| (i % 256) as u8).collect();
        let face = NormalizedFace::from_pixels(&pixels).unwrap();
        assert!(face.values().iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(face.to_u8(), pixels);
    }

    #[test]
    fn test_to_u8_truncates() {
        let mut values = vec![0.0f32; FACE_LEN];
        values[0] = 0.5; // 127.5 -> 127
        values[1] = 1.0;
        let face = NormalizedFace::from_values(values).unwrap();
        let bytes = face.to_u8();
        assert_eq!(bytes[0], 127);
        assert_eq!(bytes[1], 255);
    }

    #[test]
    fn test_bounding_box_area() {
        assert_eq!(BoundingBox::new(10, 10, 80, 100).area(), 8000);
    }
}
