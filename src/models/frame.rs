// Data structures for camera frames and crop windows

use crate::models::pose::{PoseError, PoseResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A frame handed to the estimator, usually straight from a camera
#[derive(Debug, Clone)]
pub struct Frame {
    pub timestamp: i64,
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
    pub format: PixelFormat,
}

/// Pixel layout of frame data (interleaved, 8 bits per channel)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    BGR8,
    RGB8,
    BGRA8,
    RGBA8,
}

impl PixelFormat {
    pub fn channels(&self) -> usize {
        match self {
            PixelFormat::BGR8 | PixelFormat::RGB8 => 3,
            PixelFormat::BGRA8 | PixelFormat::RGBA8 => 4,
        }
    }

    /// Source channel offsets of the red, green and blue components
    pub fn rgb_offsets(&self) -> [usize; 3] {
        match self {
            PixelFormat::BGR8 | PixelFormat::BGRA8 => [2, 1, 0],
            PixelFormat::RGB8 | PixelFormat::RGBA8 => [0, 1, 2],
        }
    }
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>, format: PixelFormat) -> PoseResult<Self> {
        let expected = width as usize * height as usize * format.channels();
        if data.len() != expected {
            return Err(PoseError::InvalidFrame(format!(
                "Expected {} bytes for {}x{} {:?}, got {}",
                expected,
                width,
                height,
                format,
                data.len()
            )));
        }

        Ok(Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            width,
            height,
            data,
            format,
        })
    }

    /// Camera-native BGR frame
    pub fn from_bgr(width: u32, height: u32, data: Vec<u8>) -> PoseResult<Self> {
        Self::new(width, height, data, PixelFormat::BGR8)
    }

    pub fn from_rgb_image(image: &image::RgbImage) -> Self {
        Self {
            timestamp: chrono::Utc::now().timestamp_millis(),
            width: image.width(),
            height: image.height(),
            data: image.as_raw().clone(),
            format: PixelFormat::RGB8,
        }
    }

    /// Decode an image file from disk
    pub fn open(path: impl AsRef<Path>) -> PoseResult<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| PoseError::InvalidFrame(format!("Failed to decode {:?}: {}", path, e)))?;
        Ok(Self::from_rgb_image(&image.to_rgb8()))
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// RGB components of the pixel at column `x`, row `y`
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let channels = self.format.channels();
        let base = (y as usize * self.width as usize + x as usize) * channels;
        let [r, g, b] = self.format.rgb_offsets();
        [self.data[base + r], self.data[base + g], self.data[base + b]]
    }
}

/// Crop bounds in pixels: columns `x1..x2`, rows `y1..y2`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropWindow {
    pub x1: u32,
    pub x2: u32,
    pub y1: u32,
    pub y2: u32,
}

impl CropWindow {
    pub fn new(x1: u32, x2: u32, y1: u32, y2: u32) -> Self {
        Self { x1, x2, y1, y2 }
    }

    pub fn validate(&self) -> PoseResult<()> {
        if self.x1 >= self.x2 || self.y1 >= self.y2 {
            return Err(PoseError::InvalidConfig(format!(
                "Invalid cropping window: x1={}, x2={}, y1={}, y2={}. Bounds must be increasing",
                self.x1, self.x2, self.y1, self.y2
            )));
        }
        Ok(())
    }

    /// Clamp to a `width` x `height` frame the way slicing does.
    /// Returns `None` when nothing of the window remains.
    pub fn clamp(&self, width: u32, height: u32) -> Option<CropWindow> {
        let x1 = self.x1.min(width);
        let x2 = self.x2.min(width);
        let y1 = self.y1.min(height);
        let y2 = self.y2.min(height);

        if x1 >= x2 || y1 >= y2 {
            return None;
        }
        Some(CropWindow { x1, x2, y1, y2 })
    }

    pub fn width(&self) -> u32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> u32 {
        self.y2.saturating_sub(self.y1)
    }
}
