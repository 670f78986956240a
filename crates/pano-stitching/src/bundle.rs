//! Joint refinement of the camera rotations and focals.
//!
//! Every kept pair contributes one factor over the rotation and focal of both images. Its
//! residuals are the pixel reprojection errors of the inlier correspondences, transferred
//! in both directions through the rotational homography. The reference camera rotation is
//! fixed to remove the global rotation gauge.

use glam::{DMat3, DVec2, DVec3};

use pano_algebra::optim::{
    numeric_jacobian, Factor, FactorError, FactorResult, LevenbergMarquardt, LinearizationResult,
    OptimizerError, Problem, TerminationReason, Variable, VariableType,
};
use pano_algebra::SO3F64;

use crate::camera::CameraParams;
use crate::config::BundleAdjusterConfig;
use crate::error::StitchError;
use crate::features::FeatureSet;
use crate::graph::ImageGraph;
use crate::matcher::MatchSet;

const VARIABLE_TYPES: [VariableType; 4] = [
    VariableType::SO3,
    VariableType::Euclidean(1),
    VariableType::SO3,
    VariableType::Euclidean(1),
];

const JACOBIAN_STEP: f64 = 1e-6;

fn rotation_name(image: usize) -> String {
    format!("rotation_{image:05}")
}

fn focal_name(image: usize) -> String {
    format!("focal_{image:05}")
}

/// Symmetric transfer error of the inlier correspondences of one image pair.
///
/// Variables: source rotation, source focal, destination rotation, destination focal.
/// Points are relative to the principal point.
#[derive(Debug, Clone)]
pub struct ReprojectionFactor {
    src_points: Vec<DVec2>,
    dst_points: Vec<DVec2>,
}

impl ReprojectionFactor {
    /// Create a factor from corresponding centered points.
    pub fn new(src_points: Vec<DVec2>, dst_points: Vec<DVec2>) -> Result<Self, FactorError> {
        if src_points.len() != dst_points.len() {
            return Err(FactorError::DimensionMismatch {
                expected: src_points.len(),
                actual: dst_points.len(),
            });
        }
        Ok(Self {
            src_points,
            dst_points,
        })
    }

    fn rotation(values: &[f64]) -> FactorResult<DMat3> {
        let [x, y, z, w] = values else {
            return Err(FactorError::DimensionMismatch {
                expected: 4,
                actual: values.len(),
            });
        };
        Ok(SO3F64::from_array([*x, *y, *z, *w]).matrix())
    }

    fn focal(values: &[f64]) -> FactorResult<f64> {
        match values {
            [f] => Ok(*f),
            _ => Err(FactorError::DimensionMismatch {
                expected: 1,
                actual: values.len(),
            }),
        }
    }

    fn transfer(rel: &DMat3, f_from: f64, f_to: f64, p: DVec2) -> FactorResult<DVec2> {
        let d = *rel * DVec3::new(p.x, p.y, f_from);
        if d.z.abs() < 1e-12 {
            return Err(FactorError::NumericalInstability(
                "point transferred to infinity".to_string(),
            ));
        }
        Ok(DVec2::new(d.x, d.y) * (f_to / d.z))
    }

    fn residuals(&self, params: &[&[f64]]) -> FactorResult<Vec<f64>> {
        if params.len() != 4 {
            return Err(FactorError::DimensionMismatch {
                expected: 4,
                actual: params.len(),
            });
        }
        let r_src = Self::rotation(params[0])?;
        let f_src = Self::focal(params[1])?;
        let r_dst = Self::rotation(params[2])?;
        let f_dst = Self::focal(params[3])?;

        let src_to_dst = r_dst.transpose() * r_src;
        let dst_to_src = src_to_dst.transpose();

        let mut residual = Vec::with_capacity(self.residual_dim());
        for (p, q) in self.src_points.iter().zip(&self.dst_points) {
            let forward = Self::transfer(&src_to_dst, f_src, f_dst, *p)? - *q;
            let backward = Self::transfer(&dst_to_src, f_dst, f_src, *q)? - *p;
            residual.extend_from_slice(&[forward.x, forward.y, backward.x, backward.y]);
        }
        Ok(residual)
    }
}

impl Factor for ReprojectionFactor {
    fn linearize(
        &self,
        params: &[&[f64]],
        compute_jacobian: bool,
    ) -> FactorResult<LinearizationResult> {
        let residual = self.residuals(params)?;
        let jacobian = if compute_jacobian {
            Some(numeric_jacobian(
                &VARIABLE_TYPES,
                params,
                self.residual_dim(),
                JACOBIAN_STEP,
                |p| self.residuals(p),
            )?)
        } else {
            None
        };
        Ok(LinearizationResult::new(
            residual,
            jacobian,
            self.total_local_dim(),
        ))
    }

    fn residual_dim(&self) -> usize {
        4 * self.src_points.len()
    }

    fn num_variables(&self) -> usize {
        VARIABLE_TYPES.len()
    }

    fn variable_local_dim(&self, idx: usize) -> usize {
        VARIABLE_TYPES[idx].local_dim()
    }
}

/// Outcome of a bundle adjustment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BundleAdjustment {
    /// Sum of squared residuals before refinement.
    pub initial_cost: f64,
    /// Sum of squared residuals after refinement.
    pub final_cost: f64,
    /// Number of solver iterations.
    pub iterations: usize,
    /// Why the solver stopped.
    pub termination: TerminationReason,
    /// Number of residuals.
    pub num_residuals: usize,
}

impl BundleAdjustment {
    /// Root mean square reprojection error in pixels after refinement.
    pub fn rms_error(&self) -> f64 {
        if self.num_residuals == 0 {
            return 0.0;
        }
        (self.final_cost / self.num_residuals as f64).sqrt()
    }
}

/// Refine the cameras of the graph nodes with Levenberg-Marquardt.
///
/// `cameras` follows `graph.nodes`. The rotation of `reference` stays fixed. The cameras
/// are only written back when the refinement succeeds with finite rotations and positive
/// focals.
///
/// # Errors
///
/// [`StitchError::Optimizer`] when the solver fails and [`StitchError::Optimization`] when
/// it returns invalid parameters.
pub fn bundle_adjust(
    features: &[FeatureSet],
    matches: &[MatchSet],
    graph: &ImageGraph,
    cameras: &mut [CameraParams],
    reference: usize,
    config: &BundleAdjusterConfig,
) -> Result<BundleAdjustment, StitchError> {
    let mut problem = Problem::new();
    for (&image, cam) in graph.nodes.iter().zip(cameras.iter()) {
        let rotation = SO3F64::from_matrix(&cam.rotation);
        problem
            .add_variable(
                Variable::so3(rotation_name(image), &rotation).with_fixed(image == reference),
            )
            .map_err(OptimizerError::from)?;
        problem
            .add_variable(Variable::euclidean(focal_name(image), vec![cam.focal]))
            .map_err(OptimizerError::from)?;
    }

    let mut num_residuals = 0;
    for edge in &graph.edges {
        let pair = &matches[edge.match_idx];
        let (src_points, dst_points): (Vec<DVec2>, Vec<DVec2>) = pair
            .inlier_matches()
            .map(|(s, d)| {
                (
                    features[pair.src].centered_point(s),
                    features[pair.dst].centered_point(d),
                )
            })
            .unzip();
        if src_points.is_empty() {
            continue;
        }
        let factor =
            ReprojectionFactor::new(src_points, dst_points).map_err(OptimizerError::from)?;
        num_residuals += factor.residual_dim();
        problem
            .add_factor(
                Box::new(factor),
                vec![
                    rotation_name(pair.src),
                    focal_name(pair.src),
                    rotation_name(pair.dst),
                    focal_name(pair.dst),
                ],
            )
            .map_err(OptimizerError::from)?;
    }

    let solver = LevenbergMarquardt {
        max_iterations: config.max_iterations,
        cost_tolerance: config.cost_tolerance,
        ..Default::default()
    };
    let result = solver.optimize_with_callback(&mut problem, |_, state| {
        log::debug!(
            "Bundle adjustment iteration {}: cost {:.6}, lambda {:.3e}",
            state.iteration,
            state.cost,
            state.lambda
        );
        true
    })?;

    if !result.final_cost.is_finite() {
        return Err(StitchError::Optimization(format!(
            "final cost is not finite: {}",
            result.final_cost
        )));
    }

    let mut refined = cameras.to_vec();
    for (&image, cam) in graph.nodes.iter().zip(refined.iter_mut()) {
        let rotation = problem
            .variable(&rotation_name(image))
            .ok_or_else(|| StitchError::Optimization(format!("missing rotation #{image}")))
            .and_then(|v| {
                ReprojectionFactor::rotation(&v.values)
                    .map_err(|e| StitchError::Optimization(e.to_string()))
            })?;
        let focal = problem
            .variable(&focal_name(image))
            .and_then(|v| v.values.first().copied())
            .ok_or_else(|| StitchError::Optimization(format!("missing focal #{image}")))?;

        if !rotation.is_finite() || !focal.is_finite() || focal <= 0.0 {
            return Err(StitchError::Optimization(format!(
                "invalid camera parameters for image #{}",
                image + 1
            )));
        }
        cam.rotation = rotation;
        cam.focal = focal;
    }
    cameras.copy_from_slice(&refined);

    let adjustment = BundleAdjustment {
        initial_cost: result.initial_cost,
        final_cost: result.final_cost,
        iterations: result.iterations,
        termination: result.termination_reason,
        num_residuals,
    };
    log::debug!(
        "Bundle adjustment: cost {:.4} -> {:.4} after {} iterations ({:?}), RMS error {:.4}",
        adjustment.initial_cost,
        adjustment.final_cost,
        adjustment.iterations,
        adjustment.termination,
        adjustment.rms_error()
    );
    Ok(adjustment)
}
