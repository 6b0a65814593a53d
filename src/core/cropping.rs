// Dynamic cropping
// Follows the animal by cropping each frame around the previous detection

use crate::models::frame::CropWindow;
use crate::models::pose::{DynamicCropping, Pose};

#[derive(Debug, Clone)]
pub struct DynamicCropper {
    params: DynamicCropping,
    window: Option<CropWindow>,
}

impl DynamicCropper {
    pub fn new(params: DynamicCropping) -> Self {
        Self {
            params,
            window: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.params.enabled
    }

    /// Window to analyze the next frame in; `None` means the full frame
    pub fn window(&self) -> Option<CropWindow> {
        self.window
    }

    pub fn reset(&mut self) {
        self.window = None;
    }

    /// Track the detected body parts of `pose` (full-frame coordinates)
    pub fn update(&mut self, pose: &Pose, frame_width: u32, frame_height: u32) {
        if !self.params.enabled {
            return;
        }

        let mut bounds: Option<(f32, f32, f32, f32)> = None;
        for kp in pose.detected(self.params.threshold) {
            bounds = Some(match bounds {
                None => (kp.x, kp.x, kp.y, kp.y),
                Some((min_x, max_x, min_y, max_y)) => (
                    min_x.min(kp.x),
                    max_x.max(kp.x),
                    min_y.min(kp.y),
                    max_y.max(kp.y),
                ),
            });
        }

        let previous = self.window;
        self.window = bounds.and_then(|(min_x, max_x, min_y, max_y)| {
            // Window ends are exclusive; keep the pixel holding the outermost part
            let margin = self.params.margin as i64;
            let x1 = (min_x.floor() as i64 - margin).max(0);
            let x2 = (max_x.floor() as i64 + 1 + margin).min(frame_width as i64);
            let y1 = (min_y.floor() as i64 - margin).max(0);
            let y2 = (max_y.floor() as i64 + 1 + margin).min(frame_height as i64);

            (x1 < x2 && y1 < y2)
                .then(|| CropWindow::new(x1 as u32, x2 as u32, y1 as u32, y2 as u32))
        });

        match (previous, self.window) {
            (Some(_), None) => tracing::debug!("Object lost, analyzing full frame"),
            (None, Some(window)) => tracing::debug!(?window, "Object detected, cropping"),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pose::Keypoint;

    fn enabled(threshold: f32, margin: u32) -> DynamicCropping {
        DynamicCropping {
            enabled: true,
            threshold,
            margin,
        }
    }

    #[test]
    fn test_window_surrounds_detected_parts() {
        let mut cropper = DynamicCropper::new(enabled(0.5, 10));
        let pose = Pose::new(
            vec![
                Keypoint::new(100.0, 50.0, 0.9),
                Keypoint::new(150.5, 80.2, 0.8),
                Keypoint::new(400.0, 400.0, 0.1), // below threshold
            ],
            1,
        );

        cropper.update(&pose, 640, 480);
        assert_eq!(cropper.window(), Some(CropWindow::new(90, 161, 40, 91)));
    }

    #[test]
    fn test_window_keeps_outermost_pixel_without_margin() {
        let mut cropper = DynamicCropper::new(enabled(0.5, 0));
        let pose = Pose::new(
            vec![Keypoint::new(100.2, 50.0, 0.9), Keypoint::new(150.5, 80.7, 0.9)],
            1,
        );

        cropper.update(&pose, 640, 480);
        let window = cropper.window().unwrap();
        assert_eq!(window, CropWindow::new(100, 151, 50, 81));
        assert!(window.x2 > 150 && window.y2 > 80);
    }

    #[test]
    fn test_window_is_clamped_to_frame() {
        let mut cropper = DynamicCropper::new(enabled(0.5, 20));
        let pose = Pose::new(
            vec![Keypoint::new(5.0, 5.0, 0.9), Keypoint::new(630.0, 470.0, 0.9)],
            1,
        );

        cropper.update(&pose, 640, 480);
        assert_eq!(cropper.window(), Some(CropWindow::new(0, 640, 0, 480)));
    }

    #[test]
    fn test_object_lost_clears_window() {
        let mut cropper = DynamicCropper::new(enabled(0.5, 10));
        cropper.update(&Pose::new(vec![Keypoint::new(50.0, 50.0, 0.9)], 1), 640, 480);
        assert!(cropper.window().is_some());

        cropper.update(&Pose::new(vec![Keypoint::new(50.0, 50.0, 0.2)], 1), 640, 480);
        assert_eq!(cropper.window(), None);
    }

    #[test]
    fn test_disabled_cropper_never_crops() {
        let mut cropper = DynamicCropper::new(DynamicCropping::default());
        cropper.update(&Pose::new(vec![Keypoint::new(50.0, 50.0, 0.9)], 1), 640, 480);
        assert!(!cropper.is_enabled());
        assert_eq!(cropper.window(), None);
    }
}
