use glam::{DMat3, DVec3};
use nalgebra::Matrix3;

/// Convert a glam matrix into its nalgebra counterpart.
pub fn to_na(m: &DMat3) -> Matrix3<f64> {
    // both libraries store columns contiguously
    Matrix3::from_column_slice(&m.to_cols_array())
}

/// Convert a nalgebra matrix into its glam counterpart.
pub fn from_na(m: &Matrix3<f64>) -> DMat3 {
    let mut cols = [0.0f64; 9];
    cols.copy_from_slice(m.as_slice());
    DMat3::from_cols_array(&cols)
}

/// Project a 3x3 matrix onto the closest rotation matrix in the Frobenius sense.
///
/// Computes `U Vᵀ` from the singular value decomposition `M = U S Vᵀ`, flipping the sign
/// of the weakest singular direction when needed so that the result has determinant +1.
/// Returns `None` when the decomposition fails or the input is not finite.
pub fn orthonormalize(m: &DMat3) -> Option<DMat3> {
    if !m.is_finite() {
        return None;
    }
    let svd = to_na(m).svd(true, true);
    let (Some(u), Some(v_t)) = (svd.u, svd.v_t) else {
        return None;
    };

    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let weakest = svd.singular_values.imin();
        let mut u_fixed = u;
        for i in 0..3 {
            u_fixed[(i, weakest)] = -u_fixed[(i, weakest)];
        }
        r = u_fixed * v_t;
    }
    Some(from_na(&r))
}

/// Eigen decomposition of a symmetric 3x3 matrix.
///
/// Returns the eigenvalues in ascending order and the matching unit eigenvectors as the
/// columns of the second element.
pub fn symmetric_eigen3(m: &DMat3) -> (DVec3, DMat3) {
    let eig = nalgebra::SymmetricEigen::new(to_na(m));
    let mut order = [0usize, 1, 2];
    order.sort_by(|&a, &b| eig.eigenvalues[a].total_cmp(&eig.eigenvalues[b]));

    let values = DVec3::new(
        eig.eigenvalues[order[0]],
        eig.eigenvalues[order[1]],
        eig.eigenvalues[order[2]],
    );
    let col = |i: usize| {
        let c = eig.eigenvectors.column(order[i]);
        DVec3::new(c[0], c[1], c[2])
    };
    (values, DMat3::from_cols(col(0), col(1), col(2)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SO3F64;
    use approx::assert_relative_eq;

    #[test]
    fn test_to_from_na() {
        let m = DMat3::from_cols_array(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0]);
        let n = to_na(&m);
        // row 0, column 1
        assert_eq!(n[(0, 1)], 4.0);
        assert_eq!(from_na(&n), m);
    }

    #[test]
    fn test_orthonormalize_rotation_is_fixed_point() -> Result<(), &'static str> {
        let r = SO3F64::exp(DVec3::new(0.2, -0.4, 0.1)).matrix();
        let o = orthonormalize(&r).ok_or("svd failed")?;
        for (a, b) in o.to_cols_array().iter().zip(r.to_cols_array().iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-10);
        }
        Ok(())
    }

    #[test]
    fn test_orthonormalize_scaled_and_reflected() -> Result<(), &'static str> {
        let r = SO3F64::exp(DVec3::new(0.0, 0.3, 0.0)).matrix();
        let o = orthonormalize(&(r * 2.5)).ok_or("svd failed")?;
        assert_relative_eq!(o.determinant(), 1.0, epsilon = 1e-10);

        let reflected = r * DMat3::from_diagonal(DVec3::new(1.0, 1.0, -1.0));
        let o = orthonormalize(&reflected).ok_or("svd failed")?;
        assert_relative_eq!(o.determinant(), 1.0, epsilon = 1e-10);
        let should_be_identity = o.transpose() * o;
        assert_relative_eq!(should_be_identity.x_axis.x, 1.0, epsilon = 1e-10);
        assert_relative_eq!(should_be_identity.y_axis.x, 0.0, epsilon = 1e-10);
        Ok(())
    }

    #[test]
    fn test_orthonormalize_nan() {
        let m = DMat3::from_diagonal(DVec3::new(f64::NAN, 1.0, 1.0));
        assert!(orthonormalize(&m).is_none());
    }

    #[test]
    fn test_symmetric_eigen3() {
        let m = DMat3::from_diagonal(DVec3::new(3.0, 1.0, 2.0));
        let (values, vectors) = symmetric_eigen3(&m);
        assert_relative_eq!(values.x, 1.0, epsilon = 1e-12);
        assert_relative_eq!(values.y, 2.0, epsilon = 1e-12);
        assert_relative_eq!(values.z, 3.0, epsilon = 1e-12);
        assert_relative_eq!(vectors.x_axis.y.abs(), 1.0, epsilon = 1e-12);
    }
}
