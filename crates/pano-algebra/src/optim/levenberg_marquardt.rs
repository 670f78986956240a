//! Levenberg-Marquardt optimizer for non-linear least squares optimization
//!
//! The Levenberg-Marquardt algorithm is a trust-region method that combines
//! the advantages of gradient descent and Gauss-Newton methods. It solves
//! the damped normal equations `(JᵀJ + λ diag(JᵀJ)) δ = -Jᵀr`.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

use super::factor::FactorError;
use super::linear_system::{LinearSystemBuilder, VariableLayout};
use super::problem::{Problem, ProblemError};
use super::variable::ParamError;

/// Errors that can occur during optimization.
#[derive(Debug, Error)]
pub enum OptimizerError {
    /// Problem-related error
    #[error("Problem error: {0}")]
    Problem(#[from] ProblemError),

    /// Factor evaluation failed
    #[error("Factor evaluation failed: {0}")]
    Factor(#[from] FactorError),

    /// Linear system solve failed (singular matrix)
    #[error("Linear system solve failed: {0}")]
    SolveFailed(String),

    /// Numerical instability detected
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// Parameter update failed
    #[error("Parameter update failed: {0}")]
    Param(#[from] ParamError),
}

/// Result of an optimization run.
#[derive(Debug, Clone)]
pub struct OptimizerResult {
    /// Cost before the first iteration (sum of squared residuals)
    pub initial_cost: f64,
    /// Final cost (sum of squared residuals)
    pub final_cost: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Reason for termination
    pub termination_reason: TerminationReason,
}

/// Reason why the optimizer terminated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TerminationReason {
    /// Converged: cost change below tolerance
    CostConverged,
    /// Converged: gradient norm below tolerance
    GradientConverged,
    /// Maximum iterations reached
    MaxIterations,
    /// Lambda exceeded maximum (likely numerical issues)
    LambdaMaxExceeded,
    /// Optimization stopped early by user callback
    Interrupted,
    /// Every variable is fixed, nothing to optimize
    NothingToOptimize,
}

/// Levenberg-Marquardt optimizer configuration.
#[derive(Debug, Clone)]
pub struct LevenbergMarquardt {
    /// Initial damping parameter
    pub lambda_init: f64,
    /// Maximum damping parameter
    pub lambda_max: f64,
    /// Factor for lambda adaptation
    pub lambda_factor: f64,
    /// Maximum number of iterations
    pub max_iterations: usize,
    /// Convergence threshold for the relative cost change of an accepted step
    pub cost_tolerance: f64,
    /// Convergence threshold for gradient norm
    pub gradient_tolerance: f64,
}

impl Default for LevenbergMarquardt {
    fn default() -> Self {
        Self {
            lambda_init: 1e-3,
            lambda_max: 1e10,
            lambda_factor: 10.0,
            max_iterations: 50,
            cost_tolerance: 1e-6,
            gradient_tolerance: 1e-10,
        }
    }
}

/// Snapshot of the optimizer state for callbacks.
#[derive(Debug, Clone, Copy)]
pub struct OptimizerState {
    /// Iterations performed so far.
    pub iteration: usize,
    /// Cost of the current estimate.
    pub cost: f64,
    /// Current damping.
    pub lambda: f64,
    /// Whether the last trial step was kept, `None` before the first step.
    pub last_step_accepted: Option<bool>,
}

impl LevenbergMarquardt {
    /// Minimum step norm threshold. Steps smaller than this are considered zero.
    const STEP_SIZE_TOLERANCE: f64 = 1e-14;
    /// Floor for the diagonal entries used to scale the damping.
    const MIN_DIAGONAL: f64 = 1e-9;

    /// Minimize the problem in place.
    pub fn optimize(&self, problem: &mut Problem) -> Result<OptimizerResult, OptimizerError> {
        self.optimize_with_callback(problem, |_problem, _state| true)
    }

    /// Minimize the problem in place, calling `callback` after every iteration.
    ///
    /// Returning `false` from the callback stops the optimizer; the current estimate is kept.
    pub fn optimize_with_callback<F>(
        &self,
        problem: &mut Problem,
        mut callback: F,
    ) -> Result<OptimizerResult, OptimizerError>
    where
        F: FnMut(&Problem, &OptimizerState) -> bool,
    {
        if problem.get_variables().is_empty() {
            return Err(OptimizerError::NumericalInstability(
                "No variables in problem".to_string(),
            ));
        }

        if problem.get_factors().is_empty() {
            return Err(OptimizerError::NumericalInstability(
                "No factors in problem".to_string(),
            ));
        }

        let layout = VariableLayout::from_problem(problem);
        let initial_cost = problem.compute_total_cost()?;
        if !initial_cost.is_finite() {
            return Err(OptimizerError::NumericalInstability(format!(
                "initial cost is not finite: {initial_cost}"
            )));
        }

        let mut result = OptimizerResult {
            initial_cost,
            final_cost: initial_cost,
            iterations: 0,
            termination_reason: TerminationReason::NothingToOptimize,
        };

        if layout.total_local_dim == 0 {
            return Ok(result);
        }

        let mut current_cost = initial_cost;
        let mut lambda = self.lambda_init;

        let init_state = OptimizerState {
            iteration: 0,
            cost: current_cost,
            lambda,
            last_step_accepted: None,
        };
        if !callback(problem, &init_state) {
            result.termination_reason = TerminationReason::Interrupted;
            return Ok(result);
        }

        // the linearization only changes when a step is accepted
        let mut system: Option<(DMatrix<f64>, DVector<f64>)> = None;

        loop {
            if result.iterations >= self.max_iterations {
                result.termination_reason = TerminationReason::MaxIterations;
                break;
            }

            let (jtj, jtr) = match system.take() {
                Some(s) => s,
                None => {
                    let (jtj, jtr, _) = LinearSystemBuilder::build(problem, &layout)?;
                    if jtj.iter().any(|v| !v.is_finite()) || jtr.iter().any(|v| !v.is_finite()) {
                        return Err(OptimizerError::NumericalInstability(
                            "normal equations are not finite".to_string(),
                        ));
                    }
                    (jtj, jtr)
                }
            };

            if jtr.norm() < self.gradient_tolerance {
                result.termination_reason = TerminationReason::GradientConverged;
                break;
            }

            let delta = self.solve_damped_system(&jtj, &jtr, lambda)?;
            if delta.iter().any(|v| !v.is_finite()) {
                return Err(OptimizerError::NumericalInstability(
                    "update step is not finite".to_string(),
                ));
            }

            if delta.norm() < Self::STEP_SIZE_TOLERANCE {
                result.termination_reason = TerminationReason::CostConverged;
                break;
            }

            let snapshot = self.apply_step(problem, &layout, &delta)?;
            let new_cost = problem.compute_total_cost()?;
            result.iterations += 1;

            let accepted = new_cost.is_finite() && new_cost < current_cost;
            if accepted {
                let relative_change = (current_cost - new_cost) / current_cost.max(f64::MIN_POSITIVE);
                current_cost = new_cost;
                lambda = (lambda / self.lambda_factor).max(1e-12);
                log::trace!(
                    "lm iteration {}: cost {:.6e}, lambda {:.1e}",
                    result.iterations,
                    current_cost,
                    lambda
                );

                if relative_change < self.cost_tolerance {
                    result.termination_reason = TerminationReason::CostConverged;
                    break;
                }
            } else {
                self.revert_step(problem, &layout, snapshot)?;
                lambda *= self.lambda_factor;
                system = Some((jtj, jtr));

                if lambda > self.lambda_max {
                    result.termination_reason = TerminationReason::LambdaMaxExceeded;
                    break;
                }
            }

            let state = OptimizerState {
                iteration: result.iterations,
                cost: current_cost,
                lambda,
                last_step_accepted: Some(accepted),
            };
            if !callback(problem, &state) {
                result.termination_reason = TerminationReason::Interrupted;
                break;
            }
        }

        result.final_cost = current_cost;
        Ok(result)
    }

    /// Solve the damped system `(JᵀJ + λ diag(JᵀJ)) δ = -Jᵀr`.
    fn solve_damped_system(
        &self,
        jtj: &DMatrix<f64>,
        jtr: &DVector<f64>,
        lambda: f64,
    ) -> Result<DVector<f64>, OptimizerError> {
        let mut h = jtj.clone();
        for i in 0..h.nrows() {
            h[(i, i)] += lambda * h[(i, i)].max(Self::MIN_DIAGONAL);
        }

        let rhs = -jtr;
        if let Some(chol) = h.clone().cholesky() {
            return Ok(chol.solve(&rhs));
        }

        h.lu()
            .solve(&rhs)
            .ok_or_else(|| OptimizerError::SolveFailed("LU solve failed".to_string()))
    }

    /// Apply the step to every free variable, returning their previous values.
    fn apply_step(
        &self,
        problem: &mut Problem,
        layout: &VariableLayout,
        delta: &DVector<f64>,
    ) -> Result<Vec<Vec<f64>>, OptimizerError> {
        let variables = problem.get_variables_mut();
        let mut snapshot: Vec<Vec<f64>> = Vec::with_capacity(layout.var_names.len());

        for (i, var_name) in layout.var_names.iter().enumerate() {
            let var = variables
                .get_mut(var_name)
                .ok_or_else(|| ProblemError::VariableNotFound {
                    name: var_name.clone(),
                })?;

            snapshot.push(var.values.clone());

            let start = layout.global_starts[i];
            let delta_block = &delta.as_slice()[start..start + layout.local_dims[i]];
            var.var_type.apply_plus(&mut var.values, delta_block)?;
        }

        Ok(snapshot)
    }

    /// Revert the step to the previous values.
    fn revert_step(
        &self,
        problem: &mut Problem,
        layout: &VariableLayout,
        snapshot: Vec<Vec<f64>>,
    ) -> Result<(), OptimizerError> {
        let variables = problem.get_variables_mut();

        for (var_name, old_vals) in layout.var_names.iter().zip(snapshot) {
            let var = variables
                .get_mut(var_name)
                .ok_or_else(|| ProblemError::VariableNotFound {
                    name: var_name.clone(),
                })?;
            var.values = old_vals;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::{numeric_jacobian, Factor, FactorResult, LinearizationResult};
    use crate::optim::{PriorFactor, Variable, VariableType};
    use crate::SO3F64;
    use approx::assert_relative_eq;
    use glam::DVec3;

    #[test]
    fn test_simple_1d_optimization() -> Result<(), OptimizerError> {
        // minimize (x - 5)^2
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("x", vec![0.0]))?;
        problem.add_factor(Box::new(PriorFactor::new(vec![5.0])), vec!["x".to_string()])?;

        let result = LevenbergMarquardt::default().optimize(&mut problem)?;

        assert!(result.iterations > 0);
        assert_relative_eq!(result.initial_cost, 25.0);
        assert!(result.final_cost < 1e-6);

        let x = &problem.get_variables()["x"];
        assert_relative_eq!(x.values[0], 5.0, epsilon = 1e-3);
        Ok(())
    }

    #[test]
    fn test_fixed_variable_is_untouched() -> Result<(), OptimizerError> {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("x", vec![0.0]))?;
        problem.add_variable(Variable::euclidean("y", vec![0.0]).with_fixed(true))?;
        problem.add_factor(Box::new(PriorFactor::new(vec![1.0])), vec!["x".to_string()])?;
        problem.add_factor(Box::new(PriorFactor::new(vec![2.0])), vec!["y".to_string()])?;

        let result = LevenbergMarquardt::default().optimize(&mut problem)?;
        let vars = problem.get_variables();
        assert_relative_eq!(vars["x"].values[0], 1.0, epsilon = 1e-3);
        assert_eq!(vars["y"].values[0], 0.0);
        assert_relative_eq!(result.final_cost, 4.0, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_all_fixed_is_a_noop() -> Result<(), OptimizerError> {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("x", vec![0.0]).with_fixed(true))?;
        problem.add_factor(Box::new(PriorFactor::new(vec![1.0])), vec!["x".to_string()])?;

        let result = LevenbergMarquardt::default().optimize(&mut problem)?;
        assert_eq!(result.iterations, 0);
        assert_eq!(
            result.termination_reason,
            TerminationReason::NothingToOptimize
        );
        Ok(())
    }

    /// Residual `R * a - b` over a rotation variable.
    struct AlignFactor {
        a: DVec3,
        b: DVec3,
    }

    impl AlignFactor {
        fn residual(&self, params: &[&[f64]]) -> FactorResult<Vec<f64>> {
            let p = params[0];
            let r = SO3F64::from_array([p[0], p[1], p[2], p[3]]);
            let e = r * self.a - self.b;
            Ok(vec![e.x, e.y, e.z])
        }
    }

    impl Factor for AlignFactor {
        fn linearize(
            &self,
            params: &[&[f64]],
            compute_jacobian: bool,
        ) -> FactorResult<LinearizationResult> {
            let residual = self.residual(params)?;
            let jacobian = if compute_jacobian {
                Some(numeric_jacobian(
                    &[VariableType::SO3],
                    params,
                    3,
                    1e-7,
                    |p| self.residual(p),
                )?)
            } else {
                None
            };
            Ok(LinearizationResult::new(residual, jacobian, 3))
        }

        fn residual_dim(&self) -> usize {
            3
        }

        fn num_variables(&self) -> usize {
            1
        }

        fn variable_local_dim(&self, _idx: usize) -> usize {
            3
        }
    }

    #[test]
    fn test_rotation_alignment() -> Result<(), OptimizerError> {
        let truth = SO3F64::exp(DVec3::new(0.2, -0.3, 0.4));
        let points = [DVec3::X, DVec3::Y, DVec3::new(0.3, 0.4, 1.0)];

        let mut problem = Problem::new();
        problem.add_variable(Variable::so3("r", &SO3F64::IDENTITY))?;
        for a in points {
            problem.add_factor(
                Box::new(AlignFactor { a, b: truth * a }),
                vec!["r".to_string()],
            )?;
        }

        let result = LevenbergMarquardt::default().optimize(&mut problem)?;
        assert!(result.final_cost < result.initial_cost);
        assert!(result.final_cost < 1e-10);

        let v = &problem.get_variables()["r"].values;
        let estimate = SO3F64::from_array([v[0], v[1], v[2], v[3]]);
        assert!(estimate.rminus(&truth).length() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_optimizer_default() {
        let optimizer = LevenbergMarquardt::default();
        assert_eq!(optimizer.lambda_init, 1e-3);
        assert_eq!(optimizer.lambda_max, 1e10);
        assert_eq!(optimizer.lambda_factor, 10.0);
        assert_eq!(optimizer.max_iterations, 50);
    }
}
