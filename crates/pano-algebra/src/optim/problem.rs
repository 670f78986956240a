//! Problem struct for factor graph optimization
//!
//! A Problem contains variables (parameters to optimize) and factors (constraints/measurements).

use std::collections::HashMap;

use rayon::prelude::*;
use thiserror::Error;

use super::factor::{Factor, FactorError};
use super::variable::Variable;

/// Errors that can occur when working with optimization problems.
#[derive(Debug, Error)]
pub enum ProblemError {
    /// Variable with this name already exists
    #[error("Variable '{name}' already exists")]
    DuplicateVariable {
        /// Name of the variable.
        name: String,
    },
    /// Variable with this name was not found
    #[error("Variable '{name}' not found")]
    VariableNotFound {
        /// Name of the variable.
        name: String,
    },
    /// Dimension mismatch between expected and actual values
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },
    /// Factor evaluation failed
    #[error("Factor evaluation failed: {0}")]
    FactorEvaluation(#[from] FactorError),
}

type FactorEntry = (Box<dyn Factor>, Vec<String>);

/// An optimization problem containing variables and factors.
#[derive(Default)]
pub struct Problem {
    /// Variables in the problem, indexed by name
    variables: HashMap<String, Variable>,
    /// Factors in the problem, each with the names of variables it connects
    factors: Vec<FactorEntry>,
}

impl Problem {
    /// Create a new empty problem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a variable, keeping the values it was created with.
    pub fn add_variable(&mut self, var: Variable) -> Result<(), ProblemError> {
        if self.variables.contains_key(&var.name) {
            return Err(ProblemError::DuplicateVariable {
                name: var.name.clone(),
            });
        }
        if var.values.len() != var.global_dim() {
            return Err(ProblemError::DimensionMismatch {
                expected: var.global_dim(),
                actual: var.values.len(),
            });
        }
        self.variables.insert(var.name.clone(), var);
        Ok(())
    }

    /// Add a factor connecting the named variables, in the order the factor expects them.
    pub fn add_factor(
        &mut self,
        factor: Box<dyn Factor>,
        var_names: Vec<String>,
    ) -> Result<(), ProblemError> {
        if var_names.len() != factor.num_variables() {
            return Err(ProblemError::DimensionMismatch {
                expected: factor.num_variables(),
                actual: var_names.len(),
            });
        }
        for (idx, name) in var_names.iter().enumerate() {
            let var = self
                .variables
                .get(name)
                .ok_or_else(|| ProblemError::VariableNotFound { name: name.clone() })?;
            if var.local_dim() != factor.variable_local_dim(idx) {
                return Err(ProblemError::DimensionMismatch {
                    expected: factor.variable_local_dim(idx),
                    actual: var.local_dim(),
                });
            }
        }
        self.factors.push((factor, var_names));
        Ok(())
    }

    /// Look up a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// All variables indexed by name.
    pub fn get_variables(&self) -> &HashMap<String, Variable> {
        &self.variables
    }

    /// Mutable access to the variables.
    pub fn get_variables_mut(&mut self) -> &mut HashMap<String, Variable> {
        &mut self.variables
    }

    /// All factors with the names of their variables.
    pub fn get_factors(&self) -> &[FactorEntry] {
        &self.factors
    }

    /// Gather the parameter blocks of the named variables.
    pub(crate) fn params_for<'a>(
        &'a self,
        var_names: &[String],
    ) -> Result<Vec<&'a [f64]>, ProblemError> {
        var_names
            .iter()
            .map(|name| {
                self.variables
                    .get(name)
                    .map(|v| v.values.as_slice())
                    .ok_or_else(|| ProblemError::VariableNotFound { name: name.clone() })
            })
            .collect()
    }

    /// Sum of the squared residuals of every factor.
    pub fn compute_total_cost(&self) -> Result<f64, ProblemError> {
        let costs = self
            .factors
            .par_iter()
            .map(|(factor, var_names)| -> Result<f64, ProblemError> {
                let params = self.params_for(var_names)?;
                let result = factor.linearize(&params, false)?;
                Ok(result.residual.iter().map(|r| r * r).sum::<f64>())
            })
            .collect::<Result<Vec<f64>, ProblemError>>()?;

        // summed serially so the total does not depend on the thread schedule
        Ok(costs.iter().sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::PriorFactor;
    use approx::assert_relative_eq;

    #[test]
    fn test_add_and_get_variable() -> Result<(), ProblemError> {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("R", vec![1.0, 2.0]))?;

        let var = problem.variable("R").ok_or(ProblemError::VariableNotFound {
            name: "R".to_string(),
        })?;
        assert_eq!(var.values, vec![1.0, 2.0]);
        assert_eq!(var.name, "R");
        Ok(())
    }

    #[test]
    fn test_add_variable_duplicate_should_fail() -> Result<(), ProblemError> {
        let mut problem = Problem::new();
        let var = Variable::euclidean("R", vec![1.0, 2.0]);
        problem.add_variable(var.clone())?;
        assert!(matches!(
            problem.add_variable(var),
            Err(ProblemError::DuplicateVariable { .. })
        ));
        Ok(())
    }

    #[test]
    fn test_add_factor_checks_variables() -> Result<(), ProblemError> {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("x", vec![1.0, 2.0]))?;

        let res = problem.add_factor(
            Box::new(PriorFactor::new(vec![1.0, 1.0])),
            vec!["not_present".to_string()],
        );
        assert!(matches!(res, Err(ProblemError::VariableNotFound { name }) if name == "not_present"));

        let res = problem.add_factor(
            Box::new(PriorFactor::new(vec![1.0, 1.0, 1.0])),
            vec!["x".to_string()],
        );
        assert!(matches!(res, Err(ProblemError::DimensionMismatch { .. })));

        problem.add_factor(
            Box::new(PriorFactor::new(vec![1.5, 2.5])),
            vec!["x".to_string()],
        )?;
        assert_eq!(problem.get_factors().len(), 1);
        Ok(())
    }

    #[test]
    fn test_compute_total_cost_with_multiple_factors() -> Result<(), ProblemError> {
        let mut problem = Problem::new();
        problem.add_variable(Variable::euclidean("x", vec![2.0]))?;
        problem.add_variable(Variable::euclidean("y", vec![3.0, -2.0]))?;
        // (2-3)^2 = 1
        problem.add_factor(Box::new(PriorFactor::new(vec![3.0])), vec!["x".to_string()])?;
        // (3-4)^2 + (-2+5)^2 = 10
        problem.add_factor(
            Box::new(PriorFactor::new(vec![4.0, -5.0])),
            vec!["y".to_string()],
        )?;

        assert_relative_eq!(problem.compute_total_cost()?, 11.0, epsilon = 1e-12);
        Ok(())
    }
}
