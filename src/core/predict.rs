// Pose extraction from network outputs

use crate::core::config::PoseCfg;
use crate::models::pose::{Keypoint, Pose, PoseError, PoseResult};
use crate::platform::inference::{BackendKind, RawOutput};
use ndarray::{ArrayView3, ArrayView4};

/// Turn a backend's raw output into a pose
pub fn decode(raw: RawOutput, kind: BackendKind, cfg: &PoseCfg) -> PoseResult<Pose> {
    match raw {
        RawOutput::Pose(array) => {
            let mut pose = Pose::from_array(array.view(), cfg.num_outputs)?;
            if kind == BackendKind::GpuNative {
                pose.swap_xy();
            }
            Ok(pose)
        }
        RawOutput::ScoreMaps { scmap, locref } => {
            let locref = locref.as_ref().map(|l| l.view());
            if cfg.num_outputs > 1 {
                multi_pose(scmap.view(), locref, cfg, cfg.num_outputs)
            } else {
                argmax_pose(scmap.view(), locref, cfg)
            }
        }
    }
}

/// Best location per joint: `(H, W, J)` score maps, `(H, W, J, 2)` offsets
pub fn argmax_pose(
    scmap: ArrayView3<'_, f32>,
    locref: Option<ArrayView4<'_, f32>>,
    cfg: &PoseCfg,
) -> PoseResult<Pose> {
    multi_pose(scmap, locref, cfg, 1)
}

/// The `num_outputs` highest-scoring locations per joint, best first
pub fn multi_pose(
    scmap: ArrayView3<'_, f32>,
    locref: Option<ArrayView4<'_, f32>>,
    cfg: &PoseCfg,
    num_outputs: usize,
) -> PoseResult<Pose> {
    let (height, width, joints) = scmap.dim();
    if height == 0 || width == 0 {
        return Err(PoseError::InferenceFailed("Score map is empty".to_string()));
    }
    if let Some(locref) = &locref {
        if locref.dim() != (height, width, joints, 2) {
            return Err(PoseError::InferenceFailed(format!(
                "Location refinement shape {:?} does not match score map {:?}",
                locref.shape(),
                scmap.shape()
            )));
        }
    }

    let num_outputs = num_outputs.max(1);
    if num_outputs > height * width {
        return Err(PoseError::InferenceFailed(format!(
            "Cannot take {} locations per joint from a {}x{} score map",
            num_outputs, height, width
        )));
    }
    let half_stride = 0.5 * cfg.stride;
    let mut keypoints = Vec::with_capacity(joints * num_outputs);

    for joint in 0..joints {
        let plane = scmap.index_axis(ndarray::Axis(2), joint);
        for (y, x) in top_locations(plane, num_outputs) {
            let (dx, dy) = match &locref {
                Some(locref) => (
                    locref[[y, x, joint, 0]] * cfg.locref_stdev,
                    locref[[y, x, joint, 1]] * cfg.locref_stdev,
                ),
                None => (0.0, 0.0),
            };
            keypoints.push(Keypoint::new(
                x as f32 * cfg.stride + half_stride + dx,
                y as f32 * cfg.stride + half_stride + dy,
                plane[[y, x]],
            ));
        }
    }

    Ok(Pose::new(keypoints, num_outputs))
}

// Row-major cell order breaks ties, so the first maximum wins
fn top_locations(plane: ndarray::ArrayView2<'_, f32>, count: usize) -> Vec<(usize, usize)> {
    let width = plane.ncols();

    if count == 1 {
        let mut best = (0, 0);
        let mut best_score = f32::NEG_INFINITY;
        for ((y, x), &score) in plane.indexed_iter() {
            if score > best_score {
                best_score = score;
                best = (y, x);
            }
        }
        return vec![best];
    }

    let mut cells: Vec<(usize, f32)> = plane
        .iter()
        .copied()
        .enumerate()
        .collect();
    cells.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.0.cmp(&b.0))
    });
    cells
        .into_iter()
        .take(count)
        .map(|(index, _)| (index / width, index % width))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array3, Array4};

    fn test_cfg() -> PoseCfg {
        serde_yaml::from_str("stride: 8.0\nlocref_stdev: 2.0\nnum_joints: 2\n").unwrap()
    }

    // 3x4 map, joint 0 peaks at (y=1, x=2), joint 1 at (y=2, x=0)
    fn test_scmap() -> Array3<f32> {
        let mut scmap = Array3::<f32>::zeros((3, 4, 2));
        scmap[[1, 2, 0]] = 0.9;
        scmap[[0, 3, 0]] = 0.6;
        scmap[[2, 0, 1]] = 0.7;
        scmap[[1, 1, 1]] = 0.2;
        scmap
    }

    #[test]
    fn test_argmax_without_refinement() {
        let pose = argmax_pose(test_scmap().view(), None, &test_cfg()).unwrap();
        assert_eq!(pose.num_joints(), 2);
        assert_eq!(pose.keypoints[0], Keypoint::new(2.0 * 8.0 + 4.0, 1.0 * 8.0 + 4.0, 0.9));
        assert_eq!(pose.keypoints[1], Keypoint::new(4.0, 2.0 * 8.0 + 4.0, 0.7));
    }

    #[test]
    fn test_argmax_with_refinement() {
        let mut locref = Array4::<f32>::zeros((3, 4, 2, 2));
        locref[[1, 2, 0, 0]] = 0.5; // x offset
        locref[[1, 2, 0, 1]] = -1.0; // y offset

        let pose = argmax_pose(test_scmap().view(), Some(locref.view()), &test_cfg()).unwrap();
        assert_eq!(pose.keypoints[0].x, 20.0 + 0.5 * 2.0);
        assert_eq!(pose.keypoints[0].y, 12.0 - 1.0 * 2.0);
        assert_eq!(pose.keypoints[1].x, 4.0);
    }

    #[test]
    fn test_argmax_first_maximum_wins() {
        let scmap = Array3::<f32>::from_elem((2, 2, 1), 0.5);
        let pose = argmax_pose(scmap.view(), None, &test_cfg()).unwrap();
        assert_eq!((pose.keypoints[0].x, pose.keypoints[0].y), (4.0, 4.0));
    }

    #[test]
    fn test_multi_pose_orders_instances() {
        let pose = multi_pose(test_scmap().view(), None, &test_cfg(), 2).unwrap();
        assert_eq!(pose.num_outputs, 2);
        assert_eq!(pose.keypoints.len(), 4);

        let joint0 = pose.joint(0);
        assert_eq!(joint0[0].likelihood, 0.9);
        assert_eq!(joint0[1].likelihood, 0.6);
        assert_eq!((joint0[1].x, joint0[1].y), (3.0 * 8.0 + 4.0, 4.0));

        let joint1 = pose.joint(1);
        assert_eq!(joint1[0].likelihood, 0.7);
        assert_eq!(joint1[1].likelihood, 0.2);
    }

    #[test]
    fn test_multi_pose_more_outputs_than_cells() {
        let scmap = Array3::<f32>::from_elem((1, 2, 3), 0.5);
        assert!(matches!(
            multi_pose(scmap.view(), None, &test_cfg(), 3),
            Err(PoseError::InferenceFailed(_))
        ));

        let pose = multi_pose(scmap.view(), None, &test_cfg(), 2).unwrap();
        assert_eq!(pose.keypoints.len(), 6);
        assert_eq!(pose.num_joints(), 3);
    }

    #[test]
    fn test_locref_shape_mismatch() {
        let locref = Array4::<f32>::zeros((3, 4, 1, 2));
        assert!(matches!(
            argmax_pose(test_scmap().view(), Some(locref.view()), &test_cfg()),
            Err(PoseError::InferenceFailed(_))
        ));
    }

    #[test]
    fn test_decode_swaps_gpu_columns() {
        let raw = RawOutput::Pose(array![[10.0f32, 20.0, 0.9], [30.0, 40.0, 0.1]]);
        let pose = decode(raw.clone(), BackendKind::GpuNative, &test_cfg()).unwrap();
        assert_eq!(pose.keypoints[0], Keypoint::new(20.0, 10.0, 0.9));
        assert_eq!(pose.keypoints[1], Keypoint::new(40.0, 30.0, 0.1));

        let pose = decode(raw, BackendKind::Frozen, &test_cfg()).unwrap();
        assert_eq!(pose.keypoints[0], Keypoint::new(10.0, 20.0, 0.9));
    }

    #[test]
    fn test_decode_score_maps() {
        let raw = RawOutput::ScoreMaps {
            scmap: test_scmap(),
            locref: None,
        };
        let pose = decode(raw, BackendKind::Standard, &test_cfg()).unwrap();
        assert_eq!(pose.keypoints.len(), 2);
        assert_eq!(pose.keypoints[0].likelihood, 0.9);
    }
}
