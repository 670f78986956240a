//! # SO(3) in double precision
//!
//! [`SO3F64`] stores a 3D rotation as a unit quaternion. `q` and `-q` describe the same
//! rotation; [`SO3F64::log`] always picks the representative with a non-negative scalar
//! part so that the returned angle lies in `[0, pi]`.
//!
//! The Lie algebra so(3) is identified with R³ through [`SO3F64::hat`] and
//! [`SO3F64::vee`]: a vector is an axis scaled by the rotation angle in radians.
//! Perturbations in the optimizer are applied on the right, `R ⊕ tau = R · exp(tau)`.

use glam::{DMat3, DQuat, DVec3};

const SMALL_ANGLE_EPSILON: f64 = 1.0e-10;

/// A 3D rotation, stored as a unit quaternion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SO3F64 {
    /// The unit quaternion.
    pub q: DQuat,
}

impl Default for SO3F64 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl SO3F64 {
    /// The identity rotation.
    pub const IDENTITY: Self = Self {
        q: DQuat::IDENTITY,
    };

    /// Create a rotation from a quaternion.
    /// NOTE: quaternion should be normalized
    #[inline]
    pub fn new(quat: DQuat) -> Self {
        Self { q: quat }
    }

    /// Create a rotation from quaternion coefficients in `[x, y, z, w]` order.
    pub fn from_array(arr: [f64; 4]) -> Self {
        Self {
            q: DQuat::from_array(arr).normalize(),
        }
    }

    /// The quaternion coefficients in `[x, y, z, w]` order.
    pub fn to_array(&self) -> [f64; 4] {
        self.q.to_array()
    }

    /// Create a rotation from an orthonormal matrix with determinant +1.
    pub fn from_matrix(mat: &DMat3) -> Self {
        Self {
            q: DQuat::from_mat3(mat).normalize(),
        }
    }

    /// The rotation matrix.
    pub fn matrix(&self) -> DMat3 {
        DMat3::from_quat(self.q)
    }

    /// The inverse rotation.
    pub fn inverse(&self) -> Self {
        Self {
            q: self.q.conjugate(),
        }
    }

    /// Right perturbation `self · exp(tau)`.
    #[inline]
    pub fn rplus(&self, tau: DVec3) -> Self {
        *self * SO3F64::exp(tau)
    }

    /// Right difference `log(self⁻¹ · other)`.
    #[inline]
    pub fn rminus(&self, other: &Self) -> DVec3 {
        (self.inverse() * *other).log()
    }

    /// Left perturbation `exp(tau) · x`.
    #[inline]
    pub fn lplus(tau: DVec3, x: &Self) -> Self {
        SO3F64::exp(tau) * *x
    }

    /// Lie algebra -> Lie group
    pub fn exp(v: DVec3) -> Self {
        let theta_sq = v.dot(v);
        let theta = theta_sq.sqrt();

        let (w, b) = if theta < SMALL_ANGLE_EPSILON {
            // taylor series of cos(x/2) and sin(x/2)/x around 0
            (1.0 - theta_sq / 8.0, 0.5 - theta_sq / 48.0)
        } else {
            let half = 0.5 * theta;
            (half.cos(), half.sin() / theta)
        };

        let xyz = b * v;
        Self {
            q: DQuat::from_xyzw(xyz.x, xyz.y, xyz.z, w).normalize(),
        }
    }

    /// Lie group -> Lie algebra
    pub fn log(&self) -> DVec3 {
        let mut w = self.q.w;
        let mut vec = DVec3::new(self.q.x, self.q.y, self.q.z);

        if w < 0.0 {
            w = -w;
            vec = -vec;
        }

        let sin_half = vec.length();
        if sin_half > SMALL_ANGLE_EPSILON {
            let half_theta = sin_half.atan2(w);
            vec * (2.0 * half_theta / sin_half)
        } else {
            vec * (2.0 / w)
        }
    }

    /// The rotation angle in radians, in `[0, pi]`.
    pub fn angle(&self) -> f64 {
        self.log().length()
    }

    /// Vector space -> Lie algebra
    pub fn hat(v: DVec3) -> DMat3 {
        let (a, b, c) = (v.x, v.y, v.z);
        DMat3::from_cols_array(&[0.0, c, -b, -c, 0.0, a, b, -a, 0.0])
    }

    /// Lie algebra -> vector space
    pub fn vee(omega: DMat3) -> DVec3 {
        DVec3::new(omega.y_axis.z, omega.z_axis.x, omega.x_axis.y)
    }
}

impl std::ops::Mul<SO3F64> for SO3F64 {
    type Output = SO3F64;

    fn mul(self, rhs: Self) -> Self::Output {
        Self {
            q: (self.q * rhs.q).normalize(),
        }
    }
}

impl std::ops::MulAssign<SO3F64> for SO3F64 {
    #[inline]
    fn mul_assign(&mut self, rhs: SO3F64) {
        *self = *self * rhs;
    }
}

impl std::ops::Mul<DVec3> for SO3F64 {
    type Output = DVec3;

    fn mul(self, rhs: DVec3) -> Self::Output {
        self.q.mul_vec3(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn assert_mat_eq(a: &DMat3, b: &DMat3, eps: f64) {
        for (x, y) in a.to_cols_array().iter().zip(b.to_cols_array().iter()) {
            assert_relative_eq!(x, y, epsilon = eps);
        }
    }

    #[test]
    fn test_identity() {
        let r = SO3F64::IDENTITY;
        assert_mat_eq(&r.matrix(), &DMat3::IDENTITY, 1e-12);
        assert_relative_eq!(r.log().length(), 0.0);
    }

    #[test]
    fn test_exp_log() {
        let vs = [
            DVec3::new(0.1, -0.2, 0.3),
            DVec3::new(1e-12, 0.0, -1e-12),
            DVec3::new(0.0, 3.0, 0.0),
        ];
        for v in vs {
            let r = SO3F64::exp(v);
            let back = r.log();
            assert_relative_eq!(back.x, v.x, epsilon = 1e-9);
            assert_relative_eq!(back.y, v.y, epsilon = 1e-9);
            assert_relative_eq!(back.z, v.z, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_exp_matches_axis_angle() {
        let v = DVec3::new(0.0, 0.0, std::f64::consts::FRAC_PI_2);
        let r = SO3F64::exp(v);
        let p = r * DVec3::X;
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-12);
        assert_relative_eq!(r.angle(), std::f64::consts::FRAC_PI_2, epsilon = 1e-12);
    }

    #[test]
    fn test_hat_vee() {
        let v = DVec3::new(1.0, 2.0, 3.0);
        let omega = SO3F64::hat(v);
        assert_eq!(SO3F64::vee(omega), v);
        // hat(v) * u == v x u
        let u = DVec3::new(-0.5, 0.25, 2.0);
        let a = omega * u;
        let b = v.cross(u);
        assert_relative_eq!(a.x, b.x, epsilon = 1e-12);
        assert_relative_eq!(a.y, b.y, epsilon = 1e-12);
        assert_relative_eq!(a.z, b.z, epsilon = 1e-12);
    }

    #[test]
    fn test_matrix_roundtrip() {
        let r = SO3F64::exp(DVec3::new(0.4, -0.1, 0.7));
        let m = r.matrix();
        let r2 = SO3F64::from_matrix(&m);
        assert_mat_eq(&r2.matrix(), &m, 1e-12);
        assert_relative_eq!(m.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_rplus_rminus_roundtrip() {
        let x = SO3F64::exp(DVec3::new(0.3, 0.2, -0.1));
        let tau = DVec3::new(0.01, -0.02, 0.03);
        let y = x.rplus(tau);
        let back = x.rminus(&y);
        assert_relative_eq!(back.x, tau.x, epsilon = 1e-12);
        assert_relative_eq!(back.y, tau.y, epsilon = 1e-12);
        assert_relative_eq!(back.z, tau.z, epsilon = 1e-12);
    }

    #[test]
    fn test_inverse() {
        let r = SO3F64::exp(DVec3::new(0.3, 0.2, -0.1));
        let i = r * r.inverse();
        assert_mat_eq(&i.matrix(), &DMat3::IDENTITY, 1e-12);
        let lp = SO3F64::lplus(DVec3::new(0.1, 0.0, 0.0), &r);
        assert_mat_eq(
            &lp.matrix(),
            &(SO3F64::exp(DVec3::new(0.1, 0.0, 0.0)).matrix() * r.matrix()),
            1e-12,
        );
    }
}
