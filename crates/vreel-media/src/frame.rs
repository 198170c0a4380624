//! Decoded frames handed from the sampler to the metrics.

use image::{GrayImage, RgbImage};

use crate::error::{MediaError, MediaResult};

/// One sampled frame of a source.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Position in the sampled sequence (0-based)
    pub index: usize,
    /// Offset within the source (seconds)
    pub time: f64,
    pub image: RgbImage,
}

impl Frame {
    pub fn new(index: usize, time: f64, image: RgbImage) -> Self {
        Self { index, time, image }
    }

    /// Build a frame from a packed rgb24 buffer.
    pub fn from_rgb24(index: usize, time: f64, width: u32, height: u32, data: Vec<u8>) -> MediaResult<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(MediaError::decode_failed(format!(
                "frame {} has {} bytes, expected {}",
                index,
                data.len(),
                expected
            )));
        }
        let image = RgbImage::from_raw(width, height, data)
            .ok_or_else(|| MediaError::decode_failed(format!("frame {} buffer rejected", index)))?;
        Ok(Self::new(index, time, image))
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Luminance plane.
    pub fn luma(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }
}

#[cfg(test)]
pub(crate) mod test_frames {
    use super::*;
    use image::Rgb;

    /// Frame filled with one colour.
    pub fn solid(index: usize, width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        Frame::new(index, index as f64, RgbImage::from_pixel(width, height, Rgb(rgb)))
    }

    /// Frame with vertical stripes of `stripe` pixels alternating black and white.
    pub fn stripes(index: usize, width: u32, height: u32, stripe: u32) -> Frame {
        let image = RgbImage::from_fn(width, height, |x, _| {
            if (x / stripe) % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        Frame::new(index, index as f64, image)
    }

    /// Frame whose pixels cycle through a wide range of colours.
    pub fn noise(index: usize, width: u32, height: u32, seed: u32) -> Frame {
        let image = RgbImage::from_fn(width, height, |x, y| {
            let v = x
                .wrapping_mul(73)
                .wrapping_add(y.wrapping_mul(151))
                .wrapping_add(seed.wrapping_mul(977));
            Rgb([(v % 251) as u8, ((v / 7) % 241) as u8, ((v / 13) % 239) as u8])
        });
        Frame::new(index, index as f64, image)
    }
}
