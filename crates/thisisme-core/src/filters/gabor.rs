use super::kernel::{correlate, min_max_normalize, Border};
use std::f64::consts::PI;

pub const KERNEL_SIZE: usize = 11;
pub const SIGMA: f64 = 4.0;
pub const THETA: f64 = PI / 4.0;
pub const LAMBDA: f64 = 10.0;
pub const GAMMA: f64 = 0.5;
pub const PSI: f64 = 0.0;

/// Real Gabor kernel, row-major `ksize × ksize`, unnormalized.
pub(crate) fn gabor_kernel(ksize: usize, sigma: f64, theta: f64, lambda: f64, gamma: f64, psi: f64) -> Vec<f32> {
    let sigma_x = sigma;
    let sigma_y = sigma / gamma;
    let half = (ksize / 2) as isize;
    let (s, c) = theta.sin_cos();
    let ex = -0.5 / (sigma_x * sigma_x);
    let ey = -0.5 / (sigma_y * sigma_y);
    let cscale = 2.0 * PI / lambda;

    let mut kernel = vec![0.0f32; ksize * ksize];
    for y in -half..=half {
        for x in -half..=half {
            let xr = x as f64 * c + y as f64 * s;
            let yr = -(x as f64) * s + y as f64 * c;
            let v = (ex * xr * xr + ey * yr * yr).exp() * (cscale * xr + psi).cos();
            let row = (half - y) as usize;
            let col = (half - x) as usize;
            kernel[row * ksize + col] = v as f32;
        }
    }
    kernel
}

/// Oriented texture energy: |image ⋆ gabor|, stretched to [0, 1].
pub fn gabor_energy(src: &[u8], width: usize, height: usize) -> Vec<f32> {
    let kernel = gabor_kernel(KERNEL_SIZE, SIGMA, THETA, LAMBDA, GAMMA, PSI);
    let as_f32: Vec<f32> = src.iter().map(|&p| p as f32).collect();
    let response = correlate(&as_f32, width, height, &kernel, KERNEL_SIZE, KERNEL_SIZE, Border::Reflect101);
    let magnitude: Vec<f32> = response.iter().map(|v| v.abs()).collect();
    min_max_normalize(&magnitude, 0.0, 1.0)
}
