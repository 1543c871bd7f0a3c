use super::kernel::{correlate, min_max_normalize, Border};

const SOBEL_X: [f32; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
const SOBEL_Y: [f32; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];

/// Gradient magnitude of a float image, stretched to 0..=255, truncated to
/// whole levels and scaled back to [0, 1].
pub fn sobel_magnitude(src: &[f32], width: usize, height: usize) -> Vec<f32> {
    let gx = correlate(src, width, height, &SOBEL_X, 3, 3, Border::Reflect101);
    let gy = correlate(src, width, height, &SOBEL_Y, 3, 3, Border::Reflect101);

    let magnitude: Vec<f32> = gx.iter().zip(&gy).map(|(x, y)| x.hypot(*y)).collect();

    min_max_normalize(&magnitude, 0.0, 255.0)
        .into_iter()
        .map(|v| v.trunc() / 255.0)
        .collect()
}
