//! Face location: detection, largest-box selection and crop-rate normalization.

use crate::detector::{DetectorError, FaceDetector};
use crate::frame::GrayFrame;
use crate::normalizer::{normalize_face, NormalizeError};
use crate::types::{BoundingBox, NormalizedFace};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocateError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("normalize: {0}")]
    Normalize(#[from] NormalizeError),
}

/// The face chosen in a frame, with its canonical crop.
#[derive(Debug, Clone)]
pub struct LocatedFace {
    pub bbox: BoundingBox,
    pub face: NormalizedFace,
    /// Number of candidate boxes the detector returned.
    pub candidates: usize,
}

/// Pick the largest box by area; on equal areas the first one wins.
pub fn select_largest(boxes: &[BoundingBox]) -> Option<BoundingBox> {
    boxes
        .iter()
        .copied()
        .fold(None, |best: Option<BoundingBox>, b| match best {
            Some(cur) if cur.area() >= b.area() => Some(cur),
            _ => Some(b),
        })
}

pub struct FaceLocator {
    detector: Arc<dyn FaceDetector>,
}

impl FaceLocator {
    pub fn new(detector: Arc<dyn FaceDetector>) -> Self {
        Self { detector }
    }

    /// Locate the dominant face in `frame`. `Ok(None)` means no face.
    pub fn locate(&self, frame: &GrayFrame) -> Result<Option<LocatedFace>, LocateError> {
        let boxes = self.detector.detect(frame)?;
        let Some(bbox) = select_largest(&boxes) else {
            tracing::debug!(width = frame.width, height = frame.height, "no face in frame");
            return Ok(None);
        };

        tracing::debug!(
            candidates = boxes.len(),
            x = bbox.x,
            y = bbox.y,
            w = bbox.width,
            h = bbox.height,
            "selected largest face"
        );

        let pixels = normalize_face(frame, &bbox)?;
        let face = NormalizedFace::from_pixels(&pixels).map_err(NormalizeError::from)?;

        Ok(Some(LocatedFace {
            bbox,
            face,
            candidates: boxes.len(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FACE_LEN;

    struct FixedDetector(Vec<BoundingBox>);

    impl FaceDetector for FixedDetector {
        fn detect(&self, _frame: &GrayFrame) -> Result<Vec<BoundingBox>, DetectorError> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_select_largest_by_area() {
        let boxes = [
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(5, 5, 30, 20),
            BoundingBox::new(1, 1, 20, 20),
        ];
        assert_eq!(select_largest(&boxes), Some(boxes[1]));
    }

    #[test]
    fn test_select_largest_tie_keeps_first() {
        let boxes = [
            BoundingBox::new(0, 0, 20, 10),
            BoundingBox::new(50, 50, 10, 20),
        ];
        assert_eq!(select_largest(&boxes), Some(boxes[0]));
    }

    #[test]
    fn test_select_largest_empty() {
        assert_eq!(select_largest(&[]), None);
    }

    #[test]
    fn test_locate_no_face() {
        let locator = FaceLocator::new(Arc::new(FixedDetector(vec![])));
        let frame = GrayFrame::from_raw(vec![0u8; 64 * 64], 64, 64).unwrap();
        assert!(locator.locate(&frame).unwrap().is_none());
    }

    #[test]
    fn test_locate_reference_box() {
        let bbox = BoundingBox::new(10, 10, 80, 100);
        let locator = FaceLocator::new(Arc::new(FixedDetector(vec![BoundingBox::new(0, 0, 5, 5), bbox])));
        let data: Vec<u8> = (0..200u32 * 200).map(|i| (i % 200 + i / 200) as u8).collect();
        let frame = GrayFrame::from_raw(data, 200, 200).unwrap();

        let located = locator.locate(&frame).unwrap().unwrap();
        assert_eq!(located.bbox, bbox);
        assert_eq!(located.candidates, 2);
        let values = located.face.values();
        assert_eq!(values.len(), FACE_LEN);
        assert!(values.iter().all(|v| v.is_finite() && (0.0..=1.0).contains(v)));
    }
}
