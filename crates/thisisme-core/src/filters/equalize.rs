/// Global histogram equalization of an 8-bit image.
///
/// The darkest occupied bin maps to 0 and the cumulative distribution of the
/// remaining bins is stretched to 255. A single-valued image is returned as is.
pub fn equalize_hist(src: &[u8]) -> Vec<u8> {
    let mut hist = [0usize; 256];
    for &p in src {
        hist[p as usize] += 1;
    }

    let total = src.len();
    let Some(first) = hist.iter().position(|&count| count > 0) else {
        return Vec::new();
    };
    if hist[first] == total {
        return src.to_vec();
    }

    let scale = 255.0f32 / (total - hist[first]) as f32;
    let mut lut = [0u8; 256];
    let mut sum = 0usize;
    for (bin, &count) in hist.iter().enumerate().skip(first + 1) {
        sum += count;
        lut[bin] = super::kernel::saturate_u8(sum as f32 * scale);
    }

    src.iter().map(|&p| lut[p as usize]).collect()
}
