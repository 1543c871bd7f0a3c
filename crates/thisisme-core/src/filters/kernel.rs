//! Shared convolution helpers for the filter bank.
//!
//! Border handling and Gaussian kernel derivation follow the conventions the
//! artifacts were trained with: reflect-101 borders unless stated otherwise,
//! and the fixed 3-tap kernel for the smallest Gaussian.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Border {
    /// `gfedcb|abcdefgh|gfedcba`
    Reflect101,
    /// `aaaaaa|abcdefgh|hhhhhhh`
    Replicate,
}

/// Map a possibly out-of-range index into `0..n`.
pub(crate) fn border_index(i: isize, n: usize, border: Border) -> usize {
    let n = n as isize;
    match border {
        Border::Replicate => i.clamp(0, n - 1) as usize,
        Border::Reflect101 => {
            if n == 1 {
                return 0;
            }
            let mut i = i;
            loop {
                if i < 0 {
                    i = -i;
                } else if i >= n {
                    i = 2 * n - 2 - i;
                } else {
                    return i as usize;
                }
            }
        }
    }
}

/// 2-D correlation (kernel not flipped) with the anchor at the kernel centre.
pub(crate) fn correlate(
    src: &[f32],
    width: usize,
    height: usize,
    kernel: &[f32],
    kernel_w: usize,
    kernel_h: usize,
    border: Border,
) -> Vec<f32> {
    debug_assert_eq!(kernel.len(), kernel_w * kernel_h);
    let ax = (kernel_w / 2) as isize;
    let ay = (kernel_h / 2) as isize;

    let mut out = Vec::with_capacity(width * height);
    for y in 0..height as isize {
        for x in 0..width as isize {
            let mut acc = 0.0f32;
            for ky in 0..kernel_h as isize {
                let sy = border_index(y + ky - ay, height, border);
                let row = sy * width;
                for kx in 0..kernel_w as isize {
                    let k = kernel[(ky * kernel_w as isize + kx) as usize];
                    if k != 0.0 {
                        let sx = border_index(x + kx - ax, width, border);
                        acc += k * src[row + sx];
                    }
                }
            }
            out.push(acc);
        }
    }
    out
}

/// 1-D Gaussian kernel with sigma derived from the size.
pub(crate) fn gaussian_kernel(ksize: usize) -> Vec<f32> {
    if ksize == 3 {
        return vec![0.25, 0.5, 0.25];
    }
    let sigma = ((ksize as f64 - 1.0) * 0.5 - 1.0) * 0.3 + 0.8;
    let scale = -0.5 / (sigma * sigma);
    let center = (ksize as f64 - 1.0) / 2.0;
    let weights: Vec<f64> = (0..ksize)
        .map(|i| {
            let d = i as f64 - center;
            (scale * d * d).exp()
        })
        .collect();
    let sum: f64 = weights.iter().sum();
    weights.iter().map(|w| (w / sum) as f32).collect()
}

/// Separable Gaussian blur of an 8-bit image, rounded back to 8 bits.
pub(crate) fn gaussian_blur(src: &[u8], width: usize, height: usize, ksize: usize) -> Vec<u8> {
    let k = gaussian_kernel(ksize);
    let as_f32: Vec<f32> = src.iter().map(|&p| p as f32).collect();
    let horizontal = correlate(&as_f32, width, height, &k, ksize, 1, Border::Reflect101);
    let both = correlate(&horizontal, width, height, &k, 1, ksize, Border::Reflect101);
    both.iter().map(|&v| saturate_u8(v)).collect()
}

/// Round half to even and saturate to 0..=255.
pub(crate) fn saturate_u8(v: f32) -> u8 {
    v.round_ties_even().clamp(0.0, 255.0) as u8
}

/// Linearly map `values` so that min → `lo` and max → `hi`.
/// A constant input maps entirely to `lo`.
pub(crate) fn min_max_normalize(values: &[f32], lo: f32, hi: f32) -> Vec<f32> {
    let (min, max) = values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(mn, mx), &v| (mn.min(v), mx.max(v)));
    let range = max - min;
    let scale = if range > f32::EPSILON { (hi - lo) / range } else { 0.0 };
    let shift = lo - min * scale;
    values.iter().map(|&v| (v * scale + shift).clamp(lo, hi)).collect()
}
