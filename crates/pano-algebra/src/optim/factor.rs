//! Factor trait for factor graph optimization
//!
//! Factors represent constraints or measurements in a factor graph. Each factor
//! computes a residual (error) and optionally a Jacobian with respect to the
//! connected variables.

use thiserror::Error;

use super::variable::{ParamError, VariableType};

/// Errors raised while evaluating a factor.
#[derive(Debug, Error)]
pub enum FactorError {
    /// Invalid dimension mismatch
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// A parameter block could not be perturbed.
    #[error(transparent)]
    Param(#[from] ParamError),

    /// Numerical instability detected
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),
}

/// Result type for factor operations
pub type FactorResult<T> = Result<T, FactorError>;

/// Output of factor linearization
#[derive(Debug, Clone)]
pub struct LinearizationResult {
    /// Residual vector (error)
    pub residual: Vec<f64>,
    /// Jacobian matrix (row-major, flattened)
    /// Shape: (residual_dim, total_local_dim)
    pub jacobian: Option<Vec<f64>>,
    /// Total local dimension (number of Jacobian columns)
    pub total_local_dim: usize,
}

impl LinearizationResult {
    /// Create a new linearization result
    pub fn new(residual: Vec<f64>, jacobian: Option<Vec<f64>>, total_local_dim: usize) -> Self {
        Self {
            residual,
            jacobian,
            total_local_dim,
        }
    }

    /// Get the residual dimension
    pub fn residual_dim(&self) -> usize {
        self.residual.len()
    }

    /// Get a specific Jacobian element (row-major order)
    pub fn jacobian_element(&self, row: usize, col: usize) -> Option<f64> {
        self.jacobian
            .as_ref()
            .map(|j| j[row * self.total_local_dim + col])
    }
}

/// Trait for factor (constraint) implementations in factor graph optimization.
///
/// A factor computes the residual and Jacobian for the current variable values,
/// which are used by the optimizer to minimize the total cost.
///
/// Factors must be `Send + Sync` so that they can be linearized in parallel.
pub trait Factor: Send + Sync {
    /// Compute the residual and optionally the Jacobian at the given parameter values.
    ///
    /// # Arguments
    ///
    /// * `params` - Slice of variable values (one slice per connected variable, global storage)
    /// * `compute_jacobian` - Whether to compute the Jacobian matrix
    ///
    /// # Returns
    ///
    /// `LinearizationResult` with an N-dimensional residual and, if requested, the
    /// N × M row-major Jacobian where M is the total local DOF of all variables.
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult>;

    /// Get the dimension of the residual vector.
    fn residual_dim(&self) -> usize;

    /// Get the number of variables this factor connects.
    fn num_variables(&self) -> usize;

    /// Get the local (tangent) dimension of a specific connected variable.
    fn variable_local_dim(&self, idx: usize) -> usize;

    /// Get the total local (tangent) dimension of all connected variables.
    fn total_local_dim(&self) -> usize {
        (0..self.num_variables())
            .map(|i| self.variable_local_dim(i))
            .sum()
    }
}

/// Central difference Jacobian of a residual function over manifold variables.
///
/// Each local coordinate of each variable is perturbed by `±step` through
/// [`VariableType::plus`], so rotations are differentiated in their tangent space.
///
/// # Returns
///
/// The row-major Jacobian with `residual_dim` rows and the summed local dimensions as columns.
pub fn numeric_jacobian<F>(
    var_types: &[VariableType],
    params: &[&[f64]],
    residual_dim: usize,
    step: f64,
    residual: F,
) -> FactorResult<Vec<f64>>
where
    F: Fn(&[&[f64]]) -> FactorResult<Vec<f64>>,
{
    if var_types.len() != params.len() {
        return Err(FactorError::DimensionMismatch {
            expected: var_types.len(),
            actual: params.len(),
        });
    }

    let total_local: usize = var_types.iter().map(|t| t.local_dim()).sum();
    let mut jac = vec![0.0f64; residual_dim * total_local];
    let mut perturbed: Vec<Vec<f64>> = params.iter().map(|p| p.to_vec()).collect();

    let mut col = 0;
    for (v, var_type) in var_types.iter().enumerate() {
        let local = var_type.local_dim();
        for k in 0..local {
            let mut delta = vec![0.0f64; local];

            delta[k] = step;
            var_type.plus(params[v], &delta, &mut perturbed[v])?;
            let plus = {
                let views: Vec<&[f64]> = perturbed.iter().map(|p| p.as_slice()).collect();
                residual(&views)?
            };

            delta[k] = -step;
            var_type.plus(params[v], &delta, &mut perturbed[v])?;
            let minus = {
                let views: Vec<&[f64]> = perturbed.iter().map(|p| p.as_slice()).collect();
                residual(&views)?
            };

            perturbed[v].copy_from_slice(params[v]);

            if plus.len() != residual_dim || minus.len() != residual_dim {
                return Err(FactorError::DimensionMismatch {
                    expected: residual_dim,
                    actual: plus.len(),
                });
            }
            for r in 0..residual_dim {
                jac[r * total_local + col] = (plus[r] - minus[r]) / (2.0 * step);
            }
            col += 1;
        }
    }

    Ok(jac)
}

/// A simple prior factor that penalizes deviation from a target value.
///
/// Residual: r = x - target
#[derive(Debug, Clone)]
pub struct PriorFactor {
    /// Target value
    pub target: Vec<f64>,
}

impl PriorFactor {
    /// Create a new prior factor
    pub fn new(target: Vec<f64>) -> Self {
        Self { target }
    }
}

impl Factor for PriorFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        if params.len() != 1 {
            return Err(FactorError::DimensionMismatch {
                expected: 1,
                actual: params.len(),
            });
        }

        let x = params[0];
        if x.len() != self.target.len() {
            return Err(FactorError::DimensionMismatch {
                expected: self.target.len(),
                actual: x.len(),
            });
        }

        let residual: Vec<f64> = x.iter().zip(&self.target).map(|(xi, ti)| xi - ti).collect();

        // identity jacobian
        let jacobian = compute_jacobian.then(|| {
            let n = x.len();
            let mut jac = vec![0.0f64; n * n];
            for i in 0..n {
                jac[i * n + i] = 1.0;
            }
            jac
        });

        Ok(LinearizationResult::new(residual, jacobian, x.len()))
    }

    fn residual_dim(&self) -> usize {
        self.target.len()
    }

    fn num_variables(&self) -> usize {
        1
    }

    fn variable_local_dim(&self, _idx: usize) -> usize {
        self.target.len()
    }
}
