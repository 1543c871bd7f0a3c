//! Grayscale frame type and decoding of uploaded images.

use image::DynamicImage;
use thiserror::Error;

// ITU-R BT.601 luma weights, as used when the reference dataset was built.
const LUMA_R: f32 = 0.299;
const LUMA_G: f32 = 0.587;
const LUMA_B: f32 = 0.114;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image dimensions are zero")]
    ZeroDimensions,
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// A decoded 8-bit grayscale image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrayFrame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl GrayFrame {
    /// Wrap a raw row-major buffer.
    pub fn from_raw(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::ZeroDimensions);
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { data, width, height })
    }

    /// Decode encoded image bytes (any format `image` can sniff) to grayscale.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        let image = image::load_from_memory(bytes)?;
        Self::from_image(&image)
    }

    /// Convert a decoded image to grayscale with BT.601 weights.
    pub fn from_image(image: &DynamicImage) -> Result<Self, FrameError> {
        let rgb = image.to_rgb8();
        let (width, height) = rgb.dimensions();
        let data = rgb
            .pixels()
            .map(|p| rgb_to_luma(p[0], p[1], p[2]))
            .collect();
        Self::from_raw(data, width, height)
    }
}

fn rgb_to_luma(r: u8, g: u8, b: u8) -> u8 {
    let y = LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    #[test]
    fn test_from_raw_valid() {
        let frame = GrayFrame::from_raw(vec![1, 2, 3, 4, 5, 6], 3, 2).unwrap();
        assert_eq!((frame.width, frame.height), (3, 2));
        assert_eq!(frame.data[3..], [4, 5, 6]);
    }

    #[test]
    fn test_from_raw_invalid_length() {
        let result = GrayFrame::from_raw(vec![0; 5], 3, 2);
        assert!(matches!(
            result,
            Err(FrameError::InvalidLength { expected: 6, actual: 5 })
        ));
    }

    #[test]
    fn test_from_raw_zero_dimensions() {
        assert!(matches!(
            GrayFrame::from_raw(vec![], 0, 4),
            Err(FrameError::ZeroDimensions)
        ));
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(rgb_to_luma(255, 255, 255), 255);
        assert_eq!(rgb_to_luma(0, 0, 0), 0);
        // 0.299 * 255 = 76.245
        assert_eq!(rgb_to_luma(255, 0, 0), 76);
        // 0.587 * 255 = 149.685
        assert_eq!(rgb_to_luma(0, 255, 0), 150);
        // 0.114 * 255 = 29.07
        assert_eq!(rgb_to_luma(0, 0, 255), 29);
    }

    #[test]
    fn test_decode_png() {
        let img = RgbImage::from_pixel(4, 3, Rgb([255, 0, 0]));
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let frame = GrayFrame::decode(&bytes).unwrap();
        assert_eq!((frame.width, frame.height), (4, 3));
        assert!(frame.data.iter().all(|&p| p == 76));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = GrayFrame::decode(b"definitely not an image");
        assert!(matches!(result, Err(FrameError::Decode(_))));
    }
}
