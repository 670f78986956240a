use glam::{DQuat, DVec3};
use thiserror::Error;

use crate::SO3F64;

/// Errors raised when a parameter block does not match its variable type.
#[derive(Debug, Error, PartialEq)]
pub enum ParamError {
    /// The global parameter block is too short.
    #[error("wrong global size: expected {expected}, got {got}")]
    WrongGlobalSize {
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },

    /// The local update is too short.
    #[error("wrong local size: expected {expected}, got {got}")]
    WrongLocalSize {
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },

    /// The output block is too short.
    #[error("wrong output size: expected {expected}, got {got}")]
    WrongOutSize {
        /// Expected length.
        expected: usize,
        /// Actual length.
        got: usize,
    },
}

/// Type of variable in the optimization problem.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VariableType {
    /// Euclidean space variable of the given dimension.
    Euclidean(usize),
    /// SO(3) - 3D rotation (4 params quaternion `[x, y, z, w]`, 3-dim tangent)
    SO3,
}

impl VariableType {
    /// Global storage dimension (length of the parameter block).
    pub fn global_dim(&self) -> usize {
        match self {
            VariableType::Euclidean(n) => *n,
            VariableType::SO3 => 4,
        }
    }

    /// Local update (tangent space) dimension used by the optimizer.
    pub fn local_dim(&self) -> usize {
        match self {
            VariableType::Euclidean(n) => *n,
            VariableType::SO3 => 3,
        }
    }

    /// Apply a local update to a global parameter block.
    ///
    /// Rotations are updated on the right, `out = x · exp(delta)`.
    pub fn plus(&self, x: &[f64], delta: &[f64], out: &mut [f64]) -> Result<(), ParamError> {
        let (global, local) = (self.global_dim(), self.local_dim());
        if x.len() < global {
            return Err(ParamError::WrongGlobalSize {
                expected: global,
                got: x.len(),
            });
        }
        if delta.len() < local {
            return Err(ParamError::WrongLocalSize {
                expected: local,
                got: delta.len(),
            });
        }
        if out.len() < global {
            return Err(ParamError::WrongOutSize {
                expected: global,
                got: out.len(),
            });
        }

        match self {
            VariableType::Euclidean(n) => {
                for i in 0..*n {
                    out[i] = x[i] + delta[i];
                }
            }
            VariableType::SO3 => {
                let q = DQuat::from_xyzw(x[0], x[1], x[2], x[3]).normalize();
                let tau = DVec3::new(delta[0], delta[1], delta[2]);
                let updated = SO3F64::new(q).rplus(tau);
                out[..4].copy_from_slice(&updated.to_array());
            }
        }
        Ok(())
    }

    /// Apply a local update in-place.
    pub fn apply_plus(&self, values: &mut [f64], delta: &[f64]) -> Result<(), ParamError> {
        let mut out = vec![0.0f64; self.global_dim()];
        self.plus(values, delta, &mut out)?;
        values[..out.len()].copy_from_slice(&out);
        Ok(())
    }
}

/// A variable in an optimization problem.
#[derive(Debug, Clone)]
pub struct Variable {
    /// Name of the variable (used for referencing in factors)
    pub name: String,
    /// Type of the variable
    pub var_type: VariableType,
    /// Current parameter values
    pub values: Vec<f64>,
    /// Fixed variables take part in the residuals but are never updated.
    pub fixed: bool,
}

impl Variable {
    /// Create a new variable.
    #[inline]
    pub fn new(name: impl Into<String>, var_type: VariableType, values: Vec<f64>) -> Self {
        Self {
            name: name.into(),
            var_type,
            values,
            fixed: false,
        }
    }

    /// Create a new Euclidean variable with the given values.
    pub fn euclidean(name: impl Into<String>, values: Vec<f64>) -> Self {
        let dim = values.len();
        Self::new(name, VariableType::Euclidean(dim), values)
    }

    /// Create a new rotation variable.
    #[inline]
    pub fn so3(name: impl Into<String>, rotation: &SO3F64) -> Self {
        Self::new(name, VariableType::SO3, rotation.to_array().to_vec())
    }

    /// Mark the variable as constant during optimization.
    pub fn with_fixed(mut self, fixed: bool) -> Self {
        self.fixed = fixed;
        self
    }

    /// Global storage dimension.
    #[inline]
    pub fn global_dim(&self) -> usize {
        self.var_type.global_dim()
    }

    /// Tangent space dimension.
    #[inline]
    pub fn local_dim(&self) -> usize {
        self.var_type.local_dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_variable_type_dims() {
        assert_eq!(VariableType::Euclidean(3).global_dim(), 3);
        assert_eq!(VariableType::Euclidean(3).local_dim(), 3);
        assert_eq!(VariableType::SO3.global_dim(), 4);
        assert_eq!(VariableType::SO3.local_dim(), 3);
    }

    #[test]
    fn test_euclidean_plus() -> Result<(), ParamError> {
        let var_type = VariableType::Euclidean(3);
        let x = [1.0, -2.0, 3.0];
        let delta = [0.5, 1.5, -0.5];
        let mut out = [0.0; 3];

        var_type.plus(&x, &delta, &mut out)?;
        assert_eq!(out, [1.5, -0.5, 2.5]);
        Ok(())
    }

    #[test]
    fn test_plus_size_errors() {
        let var_type = VariableType::SO3;
        let mut out = [0.0; 4];
        assert_eq!(
            var_type.plus(&[0.0; 3], &[0.0; 3], &mut out),
            Err(ParamError::WrongGlobalSize {
                expected: 4,
                got: 3
            })
        );
        assert_eq!(
            var_type.plus(&[0.0, 0.0, 0.0, 1.0], &[0.0; 2], &mut out),
            Err(ParamError::WrongLocalSize {
                expected: 3,
                got: 2
            })
        );
        let mut short = [0.0; 2];
        assert_eq!(
            var_type.plus(&[0.0, 0.0, 0.0, 1.0], &[0.0; 3], &mut short),
            Err(ParamError::WrongOutSize {
                expected: 4,
                got: 2
            })
        );
    }

    #[test]
    fn test_so3_apply_plus_matches_rplus() -> Result<(), ParamError> {
        let r = SO3F64::exp(DVec3::new(0.1, 0.2, -0.3));
        let delta = [0.01, -0.02, 0.005];
        let mut var = Variable::so3("r", &r);
        var.var_type.apply_plus(&mut var.values, &delta)?;

        let expected = r.rplus(DVec3::new(delta[0], delta[1], delta[2])).to_array();
        for (a, b) in var.values.iter().zip(expected.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
        Ok(())
    }

    #[test]
    fn test_variable_helpers() {
        let var = Variable::euclidean("focal", vec![500.0]).with_fixed(true);
        assert_eq!(var.name, "focal");
        assert_eq!(var.global_dim(), 1);
        assert_eq!(var.local_dim(), 1);
        assert!(var.fixed);
    }
}
