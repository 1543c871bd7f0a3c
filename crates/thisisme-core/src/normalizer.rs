//! Crop-rate geometric normalization.
//!
//! Turns a detected face box into a crop window with the canonical 94:125
//! aspect ratio and the same area, centred on the box, and resamples it to
//! exactly 94×125 pixels.

use crate::frame::GrayFrame;
use crate::types::{BoundingBox, LengthMismatch, FACE_HEIGHT, FACE_LEN, FACE_WIDTH};
use thiserror::Error;

/// Downward shift of the crop window, in pixels, matching the framing of the
/// reference dataset.
const VERTICAL_BIAS: f64 = 0.5;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("crop window {window:?} lies outside the {width}x{height} frame")]
    EmptyCrop {
        window: CropWindow,
        width: u32,
        height: u32,
    },
    #[error("resampled face: {0}")]
    Length(#[from] LengthMismatch),
}

/// Half-open crop bounds `[x_min, x_max) × [y_min, y_max)` in frame pixels.
///
/// Only the lower/left edges are clamped; `x_max`/`y_max` may exceed the
/// frame and are truncated when cropping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropWindow {
    pub x_min: u32,
    pub x_max: u32,
    pub y_min: u32,
    pub y_max: u32,
}

/// Compute the aspect-corrected, area-preserving crop window for `bbox`.
pub fn crop_window(bbox: &BoundingBox) -> CropWindow {
    let aspect = FACE_HEIGHT as f64 / FACE_WIDTH as f64;
    let width = bbox.width as f64;
    let height = bbox.height as f64;

    let center_x = bbox.x as f64 + width / 2.0;
    let center_y = bbox.y as f64 + height / 2.0;
    let area = width * height;

    let adj_width = (area / aspect).sqrt();
    let adj_height = aspect * adj_width;

    let mut x_min = (center_x - adj_width / 2.0).floor() as i64;
    let mut x_max = (center_x + adj_width / 2.0).ceil() as i64;
    let mut y_min = (center_y - adj_height / 2.0 + VERTICAL_BIAS).floor() as i64;
    let mut y_max = (center_y + adj_height / 2.0 + VERTICAL_BIAS).ceil() as i64;

    if y_min < 0 {
        y_max -= y_min;
        y_min = 0;
    }
    if x_min < 0 {
        x_max -= x_min;
        x_min = 0;
    }

    CropWindow {
        x_min: x_min as u32,
        x_max: x_max as u32,
        y_min: y_min as u32,
        y_max: y_max as u32,
    }
}

/// Crop `bbox` out of `frame` and resample it to the canonical resolution.
///
/// Returns 11750 row-major intensities in 0–255.
pub fn normalize_face(frame: &GrayFrame, bbox: &BoundingBox) -> Result<Vec<u8>, NormalizeError> {
    let window = crop_window(bbox);

    let x_end = window.x_max.min(frame.width);
    let y_end = window.y_max.min(frame.height);
    if x_end <= window.x_min || y_end <= window.y_min {
        return Err(NormalizeError::EmptyCrop {
            window,
            width: frame.width,
            height: frame.height,
        });
    }

    let crop_w = (x_end - window.x_min) as usize;
    let crop_h = (y_end - window.y_min) as usize;
    let mut crop = Vec::with_capacity(crop_w * crop_h);
    for y in window.y_min as usize..y_end as usize {
        let row = y * frame.width as usize;
        crop.extend_from_slice(&frame.data[row + window.x_min as usize..row + x_end as usize]);
    }

    tracing::trace!(?window, crop_w, crop_h, "normalizing face crop");

    let resized = resize_area(&crop, crop_w, crop_h, FACE_WIDTH, FACE_HEIGHT);
    debug_assert_eq!(resized.len(), FACE_LEN);
    Ok(resized)
}

/// Contributing source indices and their weights (summing to 1) for each
/// output index along one axis.
type AxisWeights = Vec<Vec<(usize, f64)>>;

/// Box-filter weights for shrinking `src` samples to `dst <= src`: each output
/// averages the source interval it covers.
fn area_weights(src: usize, dst: usize) -> AxisWeights {
    let scale = src as f64 / dst as f64;
    (0..dst)
        .map(|i| {
            let start = i as f64 * scale;
            let end = start + scale;
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src);
            (first..last)
                .filter_map(|j| {
                    let overlap = end.min(j as f64 + 1.0) - start.max(j as f64);
                    (overlap > 1e-9).then_some((j, overlap / scale))
                })
                .collect()
        })
        .collect()
}

/// Area-interpolation weights used when either axis is enlarged: each output
/// copies its source pixel and only blends with the next one across the
/// fraction of a source boundary it straddles.
fn enlarge_weights(src: usize, dst: usize) -> AxisWeights {
    let scale = src as f64 / dst as f64;
    let inv_scale = dst as f64 / src as f64;
    (0..dst)
        .map(|i| {
            let mut sx = (i as f64 * scale).floor() as usize;
            let f = (i + 1) as f64 - (sx + 1) as f64 * inv_scale;
            let mut fx = if f <= 0.0 { 0.0 } else { f - f.floor() };
            if sx >= src - 1 {
                sx = src - 1;
                fx = 0.0;
            }
            if fx == 0.0 {
                vec![(sx, 1.0)]
            } else {
                vec![(sx, 1.0 - fx), (sx + 1, fx)]
            }
        })
        .collect()
}

/// Area-interpolating resize of a row-major grayscale buffer.
///
/// Shrinking on both axes averages covered source areas. If either axis grows,
/// both axes use the copy-and-boundary-blend weights of [`enlarge_weights`].
pub(crate) fn resize_area(src: &[u8], src_w: usize, src_h: usize, dst_w: usize, dst_h: usize) -> Vec<u8> {
    let (x_weights, y_weights) = if src_w >= dst_w && src_h >= dst_h {
        (area_weights(src_w, dst_w), area_weights(src_h, dst_h))
    } else {
        (enlarge_weights(src_w, dst_w), enlarge_weights(src_h, dst_h))
    };

    let mut out = Vec::with_capacity(dst_w * dst_h);
    for wy in &y_weights {
        for wx in &x_weights {
            let mut acc = 0.0f64;
            for &(sy, ky) in wy {
                let row = sy * src_w;
                for &(sx, kx) in wx {
                    acc += src[row + sx] as f64 * ky * kx;
                }
            }
            out.push(acc.round().clamp(0.0, 255.0) as u8);
        }
    }
    out
}
