// Frame preprocessing
// Channel reordering and cropping into the network's input layout

use crate::models::frame::{CropWindow, Frame};
use crate::models::pose::{PoseError, PoseResult};
use ndarray::Array4;

/// Network input built from one frame
#[derive(Debug, Clone)]
pub struct PreparedInput {
    /// `(1, H, W, 3)` RGB values in `0.0..=255.0`
    pub tensor: Array4<f32>,
    /// Crop actually applied, clamped to the frame
    pub window: Option<CropWindow>,
}

/// Convert `frame` to RGB, crop it to `crop` and lay it out as a batch of one.
pub fn prepare(frame: &Frame, crop: Option<CropWindow>) -> PoseResult<PreparedInput> {
    if frame.is_empty() {
        return Err(PoseError::InvalidFrame("Frame is empty".to_string()));
    }

    let channels = frame.format.channels();
    let expected = frame.width as usize * frame.height as usize * channels;
    if frame.data.len() < expected {
        return Err(PoseError::InvalidFrame(format!(
            "Frame holds {} bytes, {}x{} {:?} needs {}",
            frame.data.len(),
            frame.width,
            frame.height,
            frame.format,
            expected
        )));
    }

    let window = match crop {
        Some(requested) => Some(requested.clamp(frame.width, frame.height).ok_or_else(|| {
            PoseError::InvalidFrame(format!(
                "Crop {:?} lies outside the {}x{} frame",
                requested, frame.width, frame.height
            ))
        })?),
        None => None,
    };

    let (x0, y0, width, height) = match window {
        Some(w) => (w.x1 as usize, w.y1 as usize, w.width() as usize, w.height() as usize),
        None => (0, 0, frame.width as usize, frame.height as usize),
    };

    let offsets = frame.format.rgb_offsets();
    let stride = frame.width as usize * channels;

    let mut data = Vec::with_capacity(width * height * 3);
    for y in y0..y0 + height {
        let start = y * stride + x0 * channels;
        let row = &frame.data[start..start + width * channels];
        for pixel in row.chunks_exact(channels) {
            for offset in offsets {
                data.push(pixel[offset] as f32);
            }
        }
    }

    let tensor = Array4::from_shape_vec((1, height, width, 3), data)
        .map_err(|e| PoseError::InvalidFrame(e.to_string()))?;

    Ok(PreparedInput { tensor, window })
}
