//! Camera parameters recovered from inter-image homographies.
//!
//! For a camera rotating about its optical center, the homography between two views with
//! principal points at the origin is `H = K_dst R K_src⁻¹`. The orthogonality constraints on
//! the columns and rows of `R` yield closed form focal estimates for both views.

use glam::{DMat3, DVec3};

/// Pick the focal from the two candidate squared focals of one view.
///
/// `v1` and `v2` come with the denominators `d1` and `d2` they were divided by; the candidate
/// with the better conditioned denominator wins when both are usable.
fn choose_focal(v1: f64, d1: f64, v2: f64, d2: f64) -> Option<f64> {
    let usable = |v: f64| v.is_finite() && v > 0.0;
    let f_sq = match (usable(v1), usable(v2)) {
        (true, true) => {
            if d1.abs() > d2.abs() {
                v1
            } else {
                v2
            }
        }
        (true, false) => v1,
        (false, true) => v2,
        (false, false) => return None,
    };
    Some(f_sq.sqrt())
}

/// Estimate the focal lengths of both views from a homography between them.
///
/// The homography must map centered source coordinates (principal point at the origin) onto
/// centered destination coordinates. Degenerate configurations such as pure panning yield
/// vanishing denominators; those candidates are discarded instead of producing NaN.
///
/// # Returns
///
/// `(f_src, f_dst)`, each `None` when it cannot be recovered.
pub fn focals_from_homography(h: &DMat3) -> (Option<f64>, Option<f64>) {
    // row-major entries
    let r = h.transpose().to_cols_array();

    // destination focal from the orthogonality of the rotation columns
    let d1 = r[6] * r[7];
    let d2 = (r[7] - r[6]) * (r[7] + r[6]);
    let v1 = -(r[0] * r[1] + r[3] * r[4]) / d1;
    let v2 = (r[0] * r[0] + r[3] * r[3] - r[1] * r[1] - r[4] * r[4]) / d2;
    let f_dst = choose_focal(v1, d1, v2, d2);

    // source focal from the orthogonality of the rotation rows
    let d1 = r[0] * r[3] + r[1] * r[4];
    let d2 = r[0] * r[0] + r[1] * r[1] - r[3] * r[3] - r[4] * r[4];
    let v1 = -r[2] * r[5] / d1;
    let v2 = (r[5] * r[5] - r[2] * r[2]) / d2;
    let f_src = choose_focal(v1, d1, v2, d2);

    (f_src, f_dst)
}

/// Intrinsic matrix with the given focal and principal point.
#[inline]
pub fn intrinsic_matrix(focal: f64, ppx: f64, ppy: f64) -> DMat3 {
    DMat3::from_cols(
        DVec3::new(focal, 0.0, 0.0),
        DVec3::new(0.0, focal, 0.0),
        DVec3::new(ppx, ppy, 1.0),
    )
}

/// Relative rotation `R_srcᵀ R_dst` between two camera-to-world rotations.
///
/// Uses `H = K_dst R_dstᵀ R_src K_src⁻¹`, so `K_src⁻¹ H⁻¹ K_dst = R_srcᵀ R_dst` up to scale.
/// The estimate is projected back onto the rotation group.
///
/// Returns `None` when the homography is singular or not finite.
pub fn relative_rotation_from_homography(
    h: &DMat3,
    k_src: &DMat3,
    k_dst: &DMat3,
) -> Option<DMat3> {
    let det = h.determinant();
    if !det.is_finite() || det.abs() < 1e-15 {
        return None;
    }
    // a valid rotational homography has a positive determinant
    let h = if det < 0.0 { -*h } else { *h };
    let m = k_src.inverse() * h.inverse() * *k_dst;
    pano_algebra::linalg::orthonormalize(&m)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pano_algebra::SO3F64;

    fn rotational_homography(f_src: f64, f_dst: f64, r_src: &DMat3, r_dst: &DMat3) -> DMat3 {
        let k_src = intrinsic_matrix(f_src, 0.0, 0.0);
        let k_dst = intrinsic_matrix(f_dst, 0.0, 0.0);
        k_dst * r_dst.transpose() * *r_src * k_src.inverse()
    }

    #[test]
    fn test_focals_from_general_rotation() {
        let r_src = SO3F64::IDENTITY.matrix();
        let r_dst = SO3F64::exp(DVec3::new(0.1, 0.35, 0.05)).matrix();
        let h = rotational_homography(500.0, 540.0, &r_src, &r_dst);

        let (f_src, f_dst) = focals_from_homography(&(h * 3.0));
        assert_relative_eq!(f_src.unwrap_or_default(), 500.0, epsilon = 1e-6);
        assert_relative_eq!(f_dst.unwrap_or_default(), 540.0, epsilon = 1e-6);
    }

    #[test]
    fn test_focals_from_pure_pan_do_not_produce_nan() {
        // a rotation about the vertical axis zeroes one of the denominators
        let r_dst = SO3F64::exp(DVec3::new(0.0, 0.4, 0.0)).matrix();
        let h = rotational_homography(400.0, 400.0, &DMat3::IDENTITY, &r_dst);

        let (f_src, f_dst) = focals_from_homography(&h);
        for f in [f_src, f_dst].into_iter().flatten() {
            assert!(f.is_finite());
            assert_relative_eq!(f, 400.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_focals_from_identity() {
        assert_eq!(focals_from_homography(&DMat3::IDENTITY), (None, None));
    }

    #[test]
    fn test_relative_rotation_from_homography() -> Result<(), &'static str> {
        let r_src = SO3F64::exp(DVec3::new(0.0, -0.2, 0.0)).matrix();
        let r_dst = SO3F64::exp(DVec3::new(0.05, 0.3, 0.0)).matrix();
        let h = rotational_homography(450.0, 470.0, &r_src, &r_dst);
        let k_src = intrinsic_matrix(450.0, 0.0, 0.0);
        let k_dst = intrinsic_matrix(470.0, 0.0, 0.0);

        // an arbitrary negative scale must not flip the result
        let rel = relative_rotation_from_homography(&(h * -2.0), &k_src, &k_dst)
            .ok_or("singular homography")?;
        let expected = r_src.transpose() * r_dst;
        for (a, b) in rel.to_cols_array().iter().zip(expected.to_cols_array().iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
        Ok(())
    }
}
