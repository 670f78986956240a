use glam::{DMat3, DVec3};

use pano_algebra::linalg::symmetric_eigen3;

use crate::camera::CameraParams;
use crate::config::WaveCorrection;

/// Rotate the whole rig so the panorama does not wave.
///
/// For a horizontal sweep the camera x axes lie close to a common plane; its normal becomes
/// the panorama vertical axis. A vertical sweep uses the dominant x direction instead. The
/// forward axis follows the mean viewing direction. Leaves the cameras untouched when the
/// sweep is degenerate.
pub fn wave_correct(cameras: &mut [CameraParams], kind: WaveCorrection) {
    if kind == WaveCorrection::None || cameras.is_empty() {
        return;
    }

    let mut moment = DMat3::ZERO;
    for cam in cameras.iter() {
        let x = cam.rotation.x_axis;
        moment += DMat3::from_cols(x * x.x, x * x.y, x * x.z);
    }
    // eigenvalues ascending, eigenvectors as columns
    let (_, vectors) = symmetric_eigen3(&moment);
    let mut vertical = match kind {
        WaveCorrection::Vertical => vectors.z_axis,
        _ => vectors.x_axis,
    };

    let forward_sum = cameras
        .iter()
        .fold(DVec3::ZERO, |acc, cam| acc + cam.rotation.z_axis);
    let mut right = vertical.cross(forward_sum);
    let norm = right.length();
    if !norm.is_finite() || norm <= f64::MIN_POSITIVE {
        log::debug!("Wave correction skipped, degenerate camera layout");
        return;
    }
    right /= norm;

    let alignment: f64 = match kind {
        WaveCorrection::Vertical => -cameras
            .iter()
            .map(|c| vertical.dot(c.rotation.x_axis))
            .sum::<f64>(),
        _ => cameras.iter().map(|c| right.dot(c.rotation.x_axis)).sum(),
    };
    if alignment < 0.0 {
        right = -right;
        vertical = -vertical;
    }
    let forward = right.cross(vertical);

    // rows are the new panorama axes expressed in the old frame
    let correction = DMat3::from_cols(right, vertical, forward).transpose();
    for cam in cameras.iter_mut() {
        cam.rotation = correction * cam.rotation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pano_algebra::SO3F64;

    #[test]
    fn test_tilted_sweep_is_straightened() {
        let tilt = SO3F64::exp(DVec3::new(0.15, 0.0, 0.1)).matrix();
        let mut cameras: Vec<CameraParams> = (0..4)
            .map(|i| {
                let yaw = SO3F64::exp(DVec3::new(0.0, 0.3 * i as f64 - 0.45, 0.0)).matrix();
                CameraParams::new(400.0, 320, 240, tilt * yaw)
            })
            .collect();

        wave_correct(&mut cameras, WaveCorrection::Horizontal);

        for cam in &cameras {
            // every camera x axis is horizontal again
            assert_relative_eq!(cam.rotation.x_axis.y, 0.0, epsilon = 1e-9);
            let det = cam.rotation.determinant();
            assert_relative_eq!(det, 1.0, epsilon = 1e-9);
        }
        // relative rotations are preserved
        let rel = cameras[0].rotation.transpose() * cameras[3].rotation;
        let expected = SO3F64::exp(DVec3::new(0.0, 0.9, 0.0)).matrix();
        for (a, b) in rel.to_cols_array().iter().zip(expected.to_cols_array().iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
        // the sweep keeps its left to right order
        let first = cameras[0].rotation.z_axis;
        let last = cameras[3].rotation.z_axis;
        assert!(first.x.atan2(first.z) < last.x.atan2(last.z));
    }

    #[test]
    fn test_none_is_noop() {
        let r = SO3F64::exp(DVec3::new(0.3, 0.1, 0.0)).matrix();
        let mut cameras = vec![CameraParams::new(400.0, 320, 240, r)];
        wave_correct(&mut cameras, WaveCorrection::None);
        assert_eq!(cameras[0].rotation, r);
    }
}
