//! Frame adapter
//!
//! Turns caller-owned pixel bytes into an owned engine image frame: validates
//! the buffer size, applies the requested flip and converts to the color
//! layout the graph runs on (RGB for CPU graphs, RGBA for GPU graphs).

use image::{DynamicImage, RgbImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::GraphError;
use crate::types::{Flip, InputType};

/// Color layout of frames handed to the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameFormat {
    #[default]
    Srgb,
    Srgba,
}

impl FrameFormat {
    pub fn channels(&self) -> usize {
        match self {
            FrameFormat::Srgb => 3,
            FrameFormat::Srgba => 4,
        }
    }
}

/// Borrowed view of a caller frame
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub input_type: InputType,
    pub flip: Flip,
}

impl<'a> FrameInput<'a> {
    pub fn new(data: &'a [u8], width: u32, height: u32, input_type: InputType) -> Self {
        Self {
            data,
            width,
            height,
            input_type,
            flip: Flip::None,
        }
    }

    pub fn with_flip(mut self, flip: Flip) -> Self {
        self.flip = flip;
        self
    }

    /// Bytes required for a frame of this size and layout
    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * self.input_type.channels()
    }
}

/// Owned frame in the engine's color layout
#[derive(Debug, Clone, PartialEq)]
pub enum ImageFrame {
    Rgb(RgbImage),
    Rgba(RgbaImage),
}

impl ImageFrame {
    /// Copy, flip and color-convert a caller frame.
    pub fn from_input(input: &FrameInput<'_>, target: FrameFormat) -> Result<Self, GraphError> {
        if input.width == 0 || input.height == 0 {
            return Err(GraphError::InvalidFrame(format!(
                "empty frame {}x{}",
                input.width, input.height
            )));
        }

        let expected = input.expected_len();
        if input.data.len() < expected {
            return Err(GraphError::InvalidFrame(format!(
                "{} frame {}x{} needs {} bytes, got {}",
                input.input_type.as_str(),
                input.width,
                input.height,
                expected,
                input.data.len()
            )));
        }

        let mut pixels = input.data[..expected].to_vec();
        let size_error =
            || GraphError::InvalidFrame("pixel buffer does not match frame size".to_string());

        let image = match input.input_type {
            InputType::Rgb => DynamicImage::ImageRgb8(
                RgbImage::from_raw(input.width, input.height, pixels).ok_or_else(size_error)?,
            ),
            InputType::Bgr => {
                for px in pixels.chunks_exact_mut(3) {
                    px.swap(0, 2);
                }
                DynamicImage::ImageRgb8(
                    RgbImage::from_raw(input.width, input.height, pixels).ok_or_else(size_error)?,
                )
            }
            InputType::Rgba => DynamicImage::ImageRgba8(
                RgbaImage::from_raw(input.width, input.height, pixels).ok_or_else(size_error)?,
            ),
        };

        let image = apply_flip(image, input.flip);

        Ok(match target {
            FrameFormat::Srgb => ImageFrame::Rgb(image.into_rgb8()),
            FrameFormat::Srgba => ImageFrame::Rgba(image.into_rgba8()),
        })
    }

    pub fn width(&self) -> u32 {
        match self {
            ImageFrame::Rgb(img) => img.width(),
            ImageFrame::Rgba(img) => img.width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            ImageFrame::Rgb(img) => img.height(),
            ImageFrame::Rgba(img) => img.height(),
        }
    }

    pub fn format(&self) -> FrameFormat {
        match self {
            ImageFrame::Rgb(_) => FrameFormat::Srgb,
            ImageFrame::Rgba(_) => FrameFormat::Srgba,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ImageFrame::Rgb(img) => img.as_raw(),
            ImageFrame::Rgba(img) => img.as_raw(),
        }
    }
}

fn apply_flip(image: DynamicImage, flip: Flip) -> DynamicImage {
    match flip {
        Flip::None => image,
        Flip::Horizontal => image.fliph(),
        Flip::Vertical => image.flipv(),
        Flip::Both => image.fliph().flipv(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // 2x2 RGB frame: each pixel's red channel is its index
    fn rgb_2x2() -> Vec<u8> {
        vec![0, 10, 20, 1, 11, 21, 2, 12, 22, 3, 13, 23]
    }

    #[test]
    fn test_rgb_passthrough() {
        let data = rgb_2x2();
        let frame = ImageFrame::from_input(&FrameInput::new(&data, 2, 2, InputType::Rgb), FrameFormat::Srgb)
            .unwrap();
        assert_eq!(frame.as_bytes(), data.as_slice());
        assert_eq!(frame.format(), FrameFormat::Srgb);
    }

    #[test]
    fn test_bgr_is_swapped_to_rgb() {
        let data = vec![30, 20, 10];
        let frame = ImageFrame::from_input(&FrameInput::new(&data, 1, 1, InputType::Bgr), FrameFormat::Srgb)
            .unwrap();
        assert_eq!(frame.as_bytes(), &[10, 20, 30]);
    }

    #[test]
    fn test_rgba_to_rgb_drops_alpha() {
        let data = vec![1, 2, 3, 99];
        let frame = ImageFrame::from_input(&FrameInput::new(&data, 1, 1, InputType::Rgba), FrameFormat::Srgb)
            .unwrap();
        assert_eq!(frame.as_bytes(), &[1, 2, 3]);
    }

    #[test]
    fn test_rgb_to_rgba_adds_opaque_alpha() {
        let data = vec![1, 2, 3];
        let frame = ImageFrame::from_input(&FrameInput::new(&data, 1, 1, InputType::Rgb), FrameFormat::Srgba)
            .unwrap();
        assert_eq!(frame.as_bytes(), &[1, 2, 3, 255]);
    }

    #[test]
    fn test_flips() {
        let data = rgb_2x2();
        let reds = |flip: Flip| -> Vec<u8> {
            let input = FrameInput::new(&data, 2, 2, InputType::Rgb).with_flip(flip);
            let frame = ImageFrame::from_input(&input, FrameFormat::Srgb).unwrap();
            frame.as_bytes().chunks(3).map(|px| px[0]).collect()
        };

        assert_eq!(reds(Flip::None), vec![0, 1, 2, 3]);
        assert_eq!(reds(Flip::Horizontal), vec![1, 0, 3, 2]);
        assert_eq!(reds(Flip::Vertical), vec![2, 3, 0, 1]);
        assert_eq!(reds(Flip::Both), vec![3, 2, 1, 0]);
    }

    #[test]
    fn test_short_buffer_rejected() {
        let data = vec![0u8; 5];
        let result =
            ImageFrame::from_input(&FrameInput::new(&data, 2, 2, InputType::Rgb), FrameFormat::Srgb);
        assert!(matches!(result, Err(GraphError::InvalidFrame(_))));
    }

    #[test]
    fn test_zero_size_rejected() {
        let result = ImageFrame::from_input(&FrameInput::new(&[], 0, 4, InputType::Rgb), FrameFormat::Srgb);
        assert!(result.is_err());
    }
}
