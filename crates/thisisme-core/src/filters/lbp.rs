//! Rotation-invariant uniform local binary patterns.
//!
//! Eight neighbours are sampled on a unit circle with bilinear interpolation;
//! samples falling outside the image read as zero. A pattern with at most two
//! 0/1 transitions (counted along the open sequence of samples) is coded by its
//! number of set bits, anything else by `POINTS + 1`.

use super::kernel::min_max_normalize;
use std::f64::consts::PI;

pub const POINTS: usize = 8;
pub const RADIUS: f64 = 1.0;

fn round5(v: f64) -> f64 {
    (v * 1e5).round() / 1e5
}

/// Neighbour offsets `(row, col)` in sampling order.
fn sample_offsets() -> [(f64, f64); POINTS] {
    let mut offsets = [(0.0, 0.0); POINTS];
    for (p, slot) in offsets.iter_mut().enumerate() {
        let angle = 2.0 * PI * p as f64 / POINTS as f64;
        *slot = (round5(-RADIUS * angle.sin()), round5(RADIUS * angle.cos()));
    }
    offsets
}

fn pixel_or_zero(image: &[f64], width: usize, height: usize, r: isize, c: isize) -> f64 {
    if r < 0 || c < 0 || r >= height as isize || c >= width as isize {
        0.0
    } else {
        image[r as usize * width + c as usize]
    }
}

fn bilinear(image: &[f64], width: usize, height: usize, r: f64, c: f64) -> f64 {
    let (min_r, max_r) = (r.floor(), r.ceil());
    let (min_c, max_c) = (c.floor(), c.ceil());
    let dr = r - min_r;
    let dc = c - min_c;
    let at = |rr: f64, cc: f64| pixel_or_zero(image, width, height, rr as isize, cc as isize);

    let top = (1.0 - dc) * at(min_r, min_c) + dc * at(min_r, max_c);
    let bottom = (1.0 - dc) * at(max_r, min_c) + dc * at(max_r, max_c);
    (1.0 - dr) * top + dr * bottom
}

/// Raw uniform codes in `0..=POINTS + 1`, one per pixel.
pub(crate) fn lbp_codes(src: &[u8], width: usize, height: usize) -> Vec<u8> {
    let image: Vec<f64> = src.iter().map(|&p| p as f64).collect();
    let offsets = sample_offsets();

    let mut codes = Vec::with_capacity(width * height);
    let mut bits = [false; POINTS];
    for r in 0..height {
        for c in 0..width {
            let centre = image[r * width + c];
            for (bit, &(dr, dc)) in bits.iter_mut().zip(&offsets) {
                let sample = bilinear(&image, width, height, r as f64 + dr, c as f64 + dc);
                *bit = sample - centre >= 0.0;
            }

            let transitions = bits.windows(2).filter(|w| w[0] != w[1]).count();
            let code = if transitions <= 2 {
                bits.iter().filter(|&&b| b).count()
            } else {
                POINTS + 1
            };
            codes.push(code as u8);
        }
    }
    codes
}

/// Uniform LBP codes stretched to [0, 1]; a single-code image maps to zeros.
pub fn lbp_texture(src: &[u8], width: usize, height: usize) -> Vec<f32> {
    let codes: Vec<f32> = lbp_codes(src, width, height).into_iter().map(f32::from).collect();
    min_max_normalize(&codes, 0.0, 1.0)
}
