//! Face detection backends.
//!
//! [`FaceDetector`] is the seam the locator runs against. [`ScrfdDetector`]
//! implements it with the SCRFD model (3-stride anchor-free decoding and NMS
//! post-processing) via ONNX Runtime.

use crate::frame::GrayFrame;
use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const SCRFD_INPUT_SIZE: usize = 640;
const SCRFD_MEAN: f32 = 127.5;
const SCRFD_STD: f32 = 128.0;
const SCRFD_CONFIDENCE_THRESHOLD: f32 = 0.5;
const SCRFD_NMS_THRESHOLD: f32 = 0.4;
const SCRFD_STRIDES: [usize; 3] = [8, 16, 32];
const SCRFD_ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {}", .0.display())]
    ModelNotFound(PathBuf),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Pluggable face detection backend.
///
/// Returned boxes must lie fully inside the frame and have non-zero size.
/// Order is backend-defined; the locator only relies on it for tie-breaks.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, frame: &GrayFrame) -> Result<Vec<BoundingBox>, DetectorError>;
}

/// Placement of the scaled frame inside the square network input.
#[derive(Debug)]
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
    content_w: usize,
    content_h: usize,
}

impl Letterbox {
    fn fit(width: usize, height: usize) -> Self {
        let side = SCRFD_INPUT_SIZE as f32;
        let scale = (side / width as f32).min(side / height as f32);
        let content_w = ((width as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        let content_h = ((height as f32 * scale).round() as usize).clamp(1, SCRFD_INPUT_SIZE);
        Self {
            scale,
            pad_x: (SCRFD_INPUT_SIZE - content_w) as f32 / 2.0,
            pad_y: (SCRFD_INPUT_SIZE - content_h) as f32 / 2.0,
            content_w,
            content_h,
        }
    }

    /// Map a point in network input space back to frame pixels.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// A raw detection in frame coordinates, before clipping to the frame.
#[derive(Debug)]
struct Detection {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    confidence: f32,
}

impl Detection {
    fn area(&self) -> f32 {
        (self.x2 - self.x1) * (self.y2 - self.y1)
    }

    fn iou(&self, other: &Detection) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Round to whole pixels inside a `width`×`height` frame.
    /// Returns `None` when nothing of the box remains.
    fn to_bbox(&self, width: u32, height: u32) -> Option<BoundingBox> {
        let clip = |v: f32, limit: u32| v.round().clamp(0.0, limit as f32) as u32;
        let (x1, x2) = (clip(self.x1, width), clip(self.x2, width));
        let (y1, y2) = (clip(self.y1, height), clip(self.y2, height));
        (x2 > x1 && y2 > y1).then(|| BoundingBox {
            x: x1,
            y: y1,
            width: x2 - x1,
            height: y2 - y1,
            confidence: self.confidence,
        })
    }
}

/// Output tensor positions of one stride level.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct StrideOutputs {
    score: usize,
    bbox: usize,
}

/// Export order used by the reference SCRFD models: three score tensors
/// followed by three box tensors.
const POSITIONAL_OUTPUTS: [StrideOutputs; 3] = [
    StrideOutputs { score: 0, bbox: 3 },
    StrideOutputs { score: 1, bbox: 4 },
    StrideOutputs { score: 2, bbox: 5 },
];

/// SCRFD-based face detector.
pub struct ScrfdDetector {
    session: Mutex<Session>,
    /// Indexed like `SCRFD_STRIDES`.
    outputs: [StrideOutputs; 3],
}

impl ScrfdDetector {
    /// Load the SCRFD ONNX model from `model_path`.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_path_buf()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session.outputs().iter().map(|o| o.name().to_string()).collect();
        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "loaded SCRFD model"
        );

        // Keypoint tensors, when exported, are never read.
        if output_names.len() < 6 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model needs score and bbox outputs for 3 strides, got {} outputs",
                output_names.len()
            )));
        }

        let outputs = discover_outputs(&output_names);
        tracing::debug!(?outputs, "SCRFD output tensor mapping");

        Ok(Self {
            session: Mutex::new(session),
            outputs,
        })
    }

    fn run(&self, frame: &GrayFrame) -> Result<Vec<Detection>, DetectorError> {
        let (input, letterbox) = preprocess(&frame.data, frame.width as usize, frame.height as usize);

        let mut session = self
            .session
            .lock()
            .map_err(|_| DetectorError::InferenceFailed("SCRFD session lock poisoned".into()))?;
        let outputs = session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut detections = Vec::new();
        for (&stride, slot) in SCRFD_STRIDES.iter().zip(self.outputs) {
            let (_, scores) = outputs[slot.score]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("score tensor for stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[slot.bbox]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bbox tensor for stride {stride}: {e}")))?;
            detections.extend(decode_stride(scores, bboxes, stride, &letterbox, SCRFD_CONFIDENCE_THRESHOLD));
        }

        Ok(nms(detections, SCRFD_NMS_THRESHOLD))
    }
}

impl FaceDetector for ScrfdDetector {
    /// Detect faces, returning boxes clipped to the frame, most confident first.
    fn detect(&self, frame: &GrayFrame) -> Result<Vec<BoundingBox>, DetectorError> {
        let detections = self.run(frame)?;
        let boxes: Vec<BoundingBox> = detections
            .iter()
            .filter_map(|d| d.to_bbox(frame.width, frame.height))
            .collect();
        tracing::debug!(raw = detections.len(), kept = boxes.len(), "SCRFD detections");
        Ok(boxes)
    }
}

/// Letterbox a grayscale frame into the normalized NCHW input tensor.
///
/// The gray level is replicated across the three colour planes; padding
/// normalizes to zero.
fn preprocess(frame: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::fit(width, height);
    let (cw, ch) = (letterbox.content_w, letterbox.content_h);
    let resized = resize_bilinear(frame, width, height, cw, ch);
    let left = letterbox.pad_x.floor() as usize;
    let top = letterbox.pad_y.floor() as usize;

    let tensor = Array4::from_shape_fn((1, 3, SCRFD_INPUT_SIZE, SCRFD_INPUT_SIZE), |(_, _, y, x)| {
        if (top..top + ch).contains(&y) && (left..left + cw).contains(&x) {
            (resized[(y - top) * cw + (x - left)] as f32 - SCRFD_MEAN) / SCRFD_STD
        } else {
            0.0
        }
    });

    (tensor, letterbox)
}

/// Source neighbours and interpolation weight for output index `i` along
/// an axis of `src_len` samples, half-pixel centred.
fn bilinear_taps(i: usize, inv_scale: f32, src_len: usize) -> (usize, usize, f32) {
    let pos = (i as f32 + 0.5) * inv_scale - 0.5;
    let lo = (pos.floor() as i32).clamp(0, src_len as i32 - 1) as usize;
    let hi = (lo + 1).min(src_len - 1);
    (lo, hi, (pos - pos.floor()).clamp(0.0, 1.0))
}

fn resize_bilinear(frame: &[u8], width: usize, height: usize, new_w: usize, new_h: usize) -> Vec<u8> {
    let inv_x = width as f32 / new_w as f32;
    let inv_y = height as f32 / new_h as f32;
    let columns: Vec<_> = (0..new_w).map(|x| bilinear_taps(x, inv_x, width)).collect();

    let mut resized = Vec::with_capacity(new_w * new_h);
    for y in 0..new_h {
        let (y0, y1, fy) = bilinear_taps(y, inv_y, height);
        let (upper, lower) = (&frame[y0 * width..][..width], &frame[y1 * width..][..width]);
        for &(x0, x1, fx) in &columns {
            let top = upper[x0] as f32 * (1.0 - fx) + upper[x1] as f32 * fx;
            let bottom = lower[x0] as f32 * (1.0 - fx) + lower[x1] as f32 * fx;
            resized.push((top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8);
        }
    }
    resized
}

/// Map SCRFD outputs to strides by their `score_<stride>` / `bbox_<stride>`
/// names, falling back to the positional export order.
fn discover_outputs(names: &[String]) -> [StrideOutputs; 3] {
    let position = |kind: &str, stride: usize| names.iter().position(|n| *n == format!("{kind}_{stride}"));

    let mut mapped = [StrideOutputs::default(); 3];
    for (slot, &stride) in mapped.iter_mut().zip(SCRFD_STRIDES.iter()) {
        match (position("score", stride), position("bbox", stride)) {
            (Some(score), Some(bbox)) => *slot = StrideOutputs { score, bbox },
            _ => {
                tracing::info!(?names, "SCRFD output names not recognized, using positional mapping");
                return POSITIONAL_OUTPUTS;
            }
        }
    }
    mapped
}

/// Decode the anchors of one stride level whose score exceeds `threshold`.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    threshold: f32,
) -> Vec<Detection> {
    let grid = SCRFD_INPUT_SIZE / stride;
    let anchors = grid * grid * SCRFD_ANCHORS_PER_CELL;
    let step = stride as f32;

    scores
        .iter()
        .take(anchors)
        .enumerate()
        .filter(|&(_, &score)| score > threshold)
        .filter_map(|(idx, &score)| {
            // Distances to the left, top, right and bottom edges in stride units.
            let d = bboxes.get(idx * 4..idx * 4 + 4)?;
            let cell = idx / SCRFD_ANCHORS_PER_CELL;
            let cx = (cell % grid) as f32 * step;
            let cy = (cell / grid) as f32 * step;
            let (x1, y1) = letterbox.to_frame(cx - d[0] * step, cy - d[1] * step);
            let (x2, y2) = letterbox.to_frame(cx + d[2] * step, cy + d[3] * step);
            Some(Detection { x1, y1, x2, y2, confidence: score })
        })
        .collect()
}

/// Greedy non-maximum suppression, most confident first.
fn nms(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut keep: Vec<Detection> = Vec::with_capacity(detections.len());
    for candidate in detections {
        if keep.iter().all(|kept| kept.iou(&candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}
