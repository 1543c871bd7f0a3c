use super::kernel::{correlate, gaussian_blur, saturate_u8, Border};

const LAPLACIAN: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

/// Laplacian of a 3×3-smoothed image, as absolute 8-bit levels scaled to [0, 1].
pub fn laplacian_of_gaussian(src: &[u8], width: usize, height: usize) -> Vec<f32> {
    let blurred: Vec<f32> = gaussian_blur(src, width, height, 3).into_iter().map(f32::from).collect();
    correlate(&blurred, width, height, &LAPLACIAN, 3, 3, Border::Reflect101)
        .into_iter()
        .map(|v| saturate_u8(v.abs()) as f32 / 255.0)
        .collect()
}

/// Fine minus coarse Gaussian blur (3×3 minus 9×9), signed, scaled by 1/255.
pub fn difference_of_gaussians(src: &[u8], width: usize, height: usize) -> Vec<f32> {
    let fine = gaussian_blur(src, width, height, 3);
    let coarse = gaussian_blur(src, width, height, 9);
    fine.iter()
        .zip(&coarse)
        .map(|(&f, &c)| (f as i16 - c as i16) as f32 / 255.0)
        .collect()
}
