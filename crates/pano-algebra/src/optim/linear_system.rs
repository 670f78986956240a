use std::collections::HashMap;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use super::factor::FactorError;
use super::levenberg_marquardt::OptimizerError;
use super::problem::{Problem, ProblemError};

/// Precomputed ordering and tangent layout of the free variables.
///
/// Variables are ordered by name so that the normal equations do not depend on the
/// hash map iteration order. Fixed variables are left out.
#[derive(Debug, Clone)]
pub struct VariableLayout {
    /// Names of the free variables in solve order.
    pub var_names: Vec<String>,
    /// Position of each free variable in `var_names`.
    pub var_index_map: HashMap<String, usize>,
    /// First tangent column of each free variable.
    pub global_starts: Vec<usize>,
    /// Tangent dimension of each free variable.
    pub local_dims: Vec<usize>,
    /// Total tangent dimension of the system.
    pub total_local_dim: usize,
}

impl VariableLayout {
    /// Build the layout of the free variables of a problem.
    pub fn from_problem(problem: &Problem) -> Self {
        let variables = problem.get_variables();
        let mut var_names: Vec<String> = variables
            .values()
            .filter(|v| !v.fixed)
            .map(|v| v.name.clone())
            .collect();
        var_names.sort();

        let var_index_map: HashMap<String, usize> = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();

        let mut total_local_dim: usize = 0;
        let mut local_dims: Vec<usize> = Vec::with_capacity(var_names.len());
        let mut global_starts: Vec<usize> = Vec::with_capacity(var_names.len());

        for name in &var_names {
            global_starts.push(total_local_dim);
            let dim = variables[name].local_dim();
            local_dims.push(dim);
            total_local_dim += dim;
        }

        Self {
            var_names,
            var_index_map,
            global_starts,
            local_dims,
            total_local_dim,
        }
    }
}

/// Builds normal equations from factors for a given layout.
pub struct LinearSystemBuilder;

impl LinearSystemBuilder {
    /// Linearize every factor and accumulate `JᵀJ`, `Jᵀr` and the total cost.
    ///
    /// Factors are linearized in parallel; the accumulation runs serially in factor order
    /// so the result is identical for any thread count.
    pub fn build(
        problem: &Problem,
        layout: &VariableLayout,
    ) -> Result<(DMatrix<f64>, DVector<f64>, f64), OptimizerError> {
        let factors = problem.get_factors();

        let linearized = factors
            .par_iter()
            .map(|(factor, var_names)| -> Result<_, ProblemError> {
                let params = problem.params_for(var_names)?;
                Ok(factor.linearize(&params, true)?)
            })
            .collect::<Result<Vec<_>, ProblemError>>()?;

        let dim = layout.total_local_dim;
        let mut jtj = DMatrix::<f64>::zeros(dim, dim);
        let mut jtr = DVector::<f64>::zeros(dim);
        let mut cost = 0.0;

        for ((factor, var_names), result) in factors.iter().zip(linearized) {
            let Some(jacobian) = &result.jacobian else {
                return Err(OptimizerError::Factor(FactorError::NumericalInstability(
                    "jacobian required for optimization".to_string(),
                )));
            };

            let residual_dim = result.residual_dim();
            let total_local_dim = result.total_local_dim;
            if total_local_dim != factor.total_local_dim()
                || jacobian.len() != residual_dim * total_local_dim
            {
                return Err(OptimizerError::Factor(FactorError::DimensionMismatch {
                    expected: residual_dim * factor.total_local_dim(),
                    actual: jacobian.len(),
                }));
            }

            // (column in the system, dim, column in the factor jacobian) of each free variable
            let mut mapping: Vec<(usize, usize, usize)> = Vec::with_capacity(var_names.len());
            let mut factor_col_offset = 0;
            for (idx, var_name) in var_names.iter().enumerate() {
                let dim = factor.variable_local_dim(idx);
                if let Some(&var_idx) = layout.var_index_map.get(var_name) {
                    mapping.push((layout.global_starts[var_idx], dim, factor_col_offset));
                }
                factor_col_offset += dim;
            }

            cost += result.residual.iter().map(|r| r * r).sum::<f64>();

            for row in 0..residual_dim {
                let jac_row = &jacobian[row * total_local_dim..(row + 1) * total_local_dim];
                let residual_val = result.residual[row];
                for &(start_i, dim_i, offset_i) in &mapping {
                    for di in 0..dim_i {
                        let jac_i_val = jac_row[offset_i + di];
                        if jac_i_val == 0.0 {
                            continue;
                        }
                        jtr[start_i + di] += jac_i_val * residual_val;
                        for &(start_j, dim_j, offset_j) in &mapping {
                            for dj in 0..dim_j {
                                jtj[(start_i + di, start_j + dj)] +=
                                    jac_i_val * jac_row[offset_j + dj];
                            }
                        }
                    }
                }
            }
        }

        Ok((jtj, jtr, cost))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::{PriorFactor, Variable};
    use approx::assert_relative_eq;

    #[test]
    fn test_layout_skips_fixed_variables() -> Result<(), ProblemError> {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("b", vec![0.0, 0.0]))?;
        problem.add_variable(Variable::euclidean("a", vec![0.0]))?;
        problem.add_variable(Variable::euclidean("c", vec![0.0]).with_fixed(true))?;

        let layout = VariableLayout::from_problem(&problem);
        assert_eq!(layout.var_names, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(layout.global_starts, vec![0, 1]);
        assert_eq!(layout.total_local_dim, 3);
        Ok(())
    }

    #[test]
    fn test_build_normal_equations() -> Result<(), OptimizerError> {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("x", vec![1.0, 2.0]))?;
        problem.add_variable(Variable::euclidean("y", vec![5.0]).with_fixed(true))?;
        problem.add_factor(
            Box::new(PriorFactor::new(vec![0.0, 0.0])),
            vec!["x".to_string()],
        )?;
        problem.add_factor(Box::new(PriorFactor::new(vec![4.0])), vec!["y".to_string()])?;

        let layout = VariableLayout::from_problem(&problem);
        let (jtj, jtr, cost) = LinearSystemBuilder::build(&problem, &layout)?;

        assert_eq!(jtj.nrows(), 2);
        assert_relative_eq!(jtj[(0, 0)], 1.0);
        assert_relative_eq!(jtj[(0, 1)], 0.0);
        assert_relative_eq!(jtr[1], 2.0);
        // the fixed variable still contributes to the cost
        assert_relative_eq!(cost, 1.0 + 4.0 + 1.0);
        Ok(())
    }
}
