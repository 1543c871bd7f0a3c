//! Canny edge detection on 8-bit images.
//!
//! Integer Sobel gradients with replicated borders, L1 magnitude, sector-based
//! non-maximum suppression in 15-bit fixed point, and hysteresis over the
//! 8-neighbourhood.

use super::kernel::{border_index, Border};

pub const LOW_THRESHOLD: i32 = 50;
pub const HIGH_THRESHOLD: i32 = 150;

const CANNY_SHIFT: i32 = 15;
// tan(22.5°) in Q15.
const TG22: i32 = (0.414_213_562_373_095_f64 * (1 << CANNY_SHIFT) as f64 + 0.5) as i32;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    None,
    Weak,
    Strong,
}

fn sobel_i32(src: &[u8], width: usize, height: usize) -> (Vec<i32>, Vec<i32>) {
    let at = |x: isize, y: isize| -> i32 {
        let sx = border_index(x, width, Border::Replicate);
        let sy = border_index(y, height, Border::Replicate);
        src[sy * width + sx] as i32
    };

    let mut dx = Vec::with_capacity(width * height);
    let mut dy = Vec::with_capacity(width * height);
    for y in 0..height as isize {
        for x in 0..width as isize {
            dx.push(
                (at(x + 1, y - 1) - at(x - 1, y - 1))
                    + 2 * (at(x + 1, y) - at(x - 1, y))
                    + (at(x + 1, y + 1) - at(x - 1, y + 1)),
            );
            dy.push(
                (at(x - 1, y + 1) - at(x - 1, y - 1))
                    + 2 * (at(x, y + 1) - at(x, y - 1))
                    + (at(x + 1, y + 1) - at(x + 1, y - 1)),
            );
        }
    }
    (dx, dy)
}

/// Binary edge map: 1.0 on edges, 0.0 elsewhere.
pub fn canny_edges(src: &[u8], width: usize, height: usize) -> Vec<f32> {
    let (dx, dy) = sobel_i32(src, width, height);
    let mag: Vec<i32> = dx.iter().zip(&dy).map(|(x, y)| x.abs() + y.abs()).collect();

    // Magnitude outside the image reads as zero.
    let mag_at = |x: isize, y: isize| -> i32 {
        if x < 0 || y < 0 || x >= width as isize || y >= height as isize {
            0
        } else {
            mag[y as usize * width + x as usize]
        }
    };

    let mut marks = vec![Mark::None; width * height];
    let mut stack = Vec::new();

    for y in 0..height as isize {
        for x in 0..width as isize {
            let i = y as usize * width + x as usize;
            let m = mag[i];
            if m <= LOW_THRESHOLD {
                continue;
            }

            let xs = dx[i];
            let ys = dy[i];
            let ax = xs.abs();
            let ay = ys.abs() << CANNY_SHIFT;
            let tg22x = ax * TG22;

            let is_max = if ay < tg22x {
                m > mag_at(x - 1, y) && m >= mag_at(x + 1, y)
            } else {
                let tg67x = tg22x + (ax << (CANNY_SHIFT + 1));
                if ay > tg67x {
                    m > mag_at(x, y - 1) && m >= mag_at(x, y + 1)
                } else {
                    let s: isize = if (xs ^ ys) < 0 { -1 } else { 1 };
                    m > mag_at(x - s, y - 1) && m > mag_at(x + s, y + 1)
                }
            };

            if is_max {
                if m > HIGH_THRESHOLD {
                    marks[i] = Mark::Strong;
                    stack.push(i);
                } else {
                    marks[i] = Mark::Weak;
                }
            }
        }
    }

    while let Some(i) = stack.pop() {
        let (x, y) = ((i % width) as isize, (i / width) as isize);
        for ny in y - 1..=y + 1 {
            for nx in x - 1..=x + 1 {
                if nx < 0 || ny < 0 || nx >= width as isize || ny >= height as isize {
                    continue;
                }
                let j = ny as usize * width + nx as usize;
                if marks[j] == Mark::Weak {
                    marks[j] = Mark::Strong;
                    stack.push(j);
                }
            }
        }
    }

    marks
        .into_iter()
        .map(|m| if m == Mark::Strong { 1.0 } else { 0.0 })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tg22_constant() {
        assert_eq!(TG22, 13573);
    }

    #[test]
    fn test_canny_flat_image_has_no_edges() {
        let out = canny_edges(&[128u8; 100], 10, 10);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_canny_vertical_step_single_column() {
        let (w, h) = (20, 10);
        let src: Vec<u8> = (0..w * h).map(|i| if i % w < 10 { 0 } else { 255 }).collect();
        let out = canny_edges(&src, w, h);
        for (y, row) in out.chunks(w).enumerate() {
            for (x, &v) in row.iter().enumerate() {
                let expected = if x == 9 { 1.0 } else { 0.0 };
                assert_eq!(v, expected, "pixel ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_canny_weak_step_is_suppressed() {
        // |dx| + |dy| = 4 * 10 = 40 stays below the low threshold.
        let (w, h) = (12, 6);
        let src: Vec<u8> = (0..w * h).map(|i| if i % w < 6 { 100 } else { 110 }).collect();
        assert!(canny_edges(&src, w, h).iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_canny_weak_edge_kept_when_connected() {
        // Column 5/6 step: strong (4*60=240) in the top rows, weak (4*30=120)
        // in the bottom rows. The weak part is reached through hysteresis.
        let (w, h) = (12, 8);
        let src: Vec<u8> = (0..w * h)
            .map(|i| {
                let (x, y) = (i % w, i / w);
                match (x < 6, y < 4) {
                    (true, _) => 100,
                    (false, true) => 160,
                    (false, false) => 130,
                }
            })
            .collect();
        let out = canny_edges(&src, w, h);
        assert_eq!(out[7 * w + 5], 1.0, "bottom row of the weak segment");
        assert_eq!(out[5], 1.0, "top row of the strong segment");
    }
}
