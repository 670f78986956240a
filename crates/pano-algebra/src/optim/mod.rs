//! Non-linear least squares over factor graphs.
//!
//! Variables live either in a Euclidean space or on SO(3); factors compute residuals and
//! row-major Jacobians over the tangent spaces of their variables. Fixed variables take
//! part in the residuals but never enter the normal equations.

mod factor;
mod levenberg_marquardt;
mod linear_system;
mod problem;
mod variable;

pub use factor::{
    numeric_jacobian, Factor, FactorError, FactorResult, LinearizationResult, PriorFactor,
};
pub use levenberg_marquardt::{
    LevenbergMarquardt, OptimizerError, OptimizerResult, OptimizerState, TerminationReason,
};
pub use linear_system::{LinearSystemBuilder, VariableLayout};
pub use problem::{Problem, ProblemError};
pub use variable::{ParamError, Variable, VariableType};
