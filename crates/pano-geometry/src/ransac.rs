use glam::{DMat3, DVec2};
use rand::{rngs::StdRng, SeedableRng};

use crate::homography::{homography_dlt, transfer_error_sq};
use crate::GeometryError;

const SAMPLE_SIZE: usize = 4;

/// Parameters for RANSAC homography estimation.
#[derive(Debug, Clone)]
pub struct RansacParams {
    /// Maximum number of RANSAC iterations.
    pub max_iterations: usize,
    /// Pixel transfer error threshold to classify a correspondence as an inlier.
    pub reproj_threshold_px: f64,
    /// Desired probability that at least one sample set is outlier-free.
    pub confidence: f64,
    /// Optional fixed seed for reproducible sampling.
    pub random_seed: Option<u64>,
    /// Minimum number of inliers for the model to be accepted.
    pub min_inliers: usize,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            max_iterations: 2000,
            reproj_threshold_px: 3.0,
            confidence: 0.995,
            random_seed: Some(0),
            min_inliers: SAMPLE_SIZE,
        }
    }
}

/// Result of a RANSAC model fit.
#[derive(Clone, Debug)]
pub struct RansacResult<M> {
    /// Estimated model.
    pub model: M,
    /// Per-correspondence inlier mask.
    pub inliers: Vec<bool>,
    /// Total inlier count.
    pub inlier_count: usize,
    /// Sum of squared inlier errors (lower is better).
    pub score: f64,
    /// Number of hypotheses evaluated.
    pub iterations: usize,
}

/// Number of iterations needed to draw one all-inlier sample with the given confidence.
fn required_iterations(inlier_ratio: f64, confidence: f64, max_iterations: usize) -> usize {
    let ws = inlier_ratio.powi(SAMPLE_SIZE as i32);
    if ws >= 1.0 - 1e-12 {
        return 1;
    }
    if ws <= 1e-12 {
        return max_iterations;
    }
    let log_conf = (1.0 - confidence).max(1e-12).ln();
    let log_denom = (1.0 - ws).ln();
    let est = (log_conf / log_denom).ceil();
    if est.is_finite() && est > 0.0 {
        (est as usize).min(max_iterations)
    } else {
        max_iterations
    }
}

/// True if any three of the four points are (nearly) collinear.
fn is_degenerate_sample(pts: &[DVec2; SAMPLE_SIZE]) -> bool {
    const TRIPLES: [(usize, usize, usize); 4] = [(0, 1, 2), (0, 1, 3), (0, 2, 3), (1, 2, 3)];
    TRIPLES.iter().any(|&(a, b, c)| {
        let area = (pts[b] - pts[a]).perp_dot(pts[c] - pts[a]);
        area.abs() < 1e-6
    })
}

fn classify_inliers(
    h: &DMat3,
    src: &[DVec2],
    dst: &[DVec2],
    threshold_sq: f64,
) -> (Vec<bool>, usize, f64) {
    let mut inliers = vec![false; src.len()];
    let mut count = 0usize;
    let mut score = 0.0f64;
    for (i, (p, q)) in src.iter().zip(dst).enumerate() {
        let d = transfer_error_sq(h, *p, *q);
        if d <= threshold_sq {
            inliers[i] = true;
            count += 1;
            score += d;
        }
    }
    (inliers, count, score)
}

/// Estimate a homography with RANSAC using the 4-point solver.
///
/// - Minimal samples are drawn without replacement from a seeded generator.
/// - Samples with three collinear points are skipped.
/// - Iterations adapt from the best inlier ratio and the desired confidence.
/// - The best model is refit on all of its inliers; the refit is kept only if it does not
///   lose inliers.
///
/// # Arguments
///
/// * `src` - Points in the source image.
/// * `dst` - Corresponding points in the destination image.
/// * `params` - RANSAC settings.
///
/// # Returns
///
/// The homography mapping `src` onto `dst` with its inlier mask.
pub fn ransac_homography(
    src: &[DVec2],
    dst: &[DVec2],
    params: &RansacParams,
) -> Result<RansacResult<DMat3>, GeometryError> {
    if src.len() != dst.len() {
        return Err(GeometryError::MismatchedLengths(src.len(), dst.len()));
    }
    let n = src.len();
    if n < SAMPLE_SIZE {
        return Err(GeometryError::InsufficientCorrespondences {
            required: SAMPLE_SIZE,
            actual: n,
        });
    }

    let mut rng = match params.random_seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => {
            let mut tr = rand::rng();
            StdRng::from_rng(&mut tr)
        }
    };

    let threshold_sq = params.reproj_threshold_px * params.reproj_threshold_px;

    let mut best: Option<(DMat3, Vec<bool>, usize, f64)> = None;
    let mut required_iters = params.max_iterations;
    let mut iter = 0usize;

    while iter < required_iters {
        iter += 1;

        let sample = rand::seq::index::sample(&mut rng, n, SAMPLE_SIZE);
        let mut s_src = [DVec2::ZERO; SAMPLE_SIZE];
        let mut s_dst = [DVec2::ZERO; SAMPLE_SIZE];
        for (i, idx) in sample.iter().enumerate() {
            s_src[i] = src[idx];
            s_dst[i] = dst[idx];
        }
        if is_degenerate_sample(&s_src) || is_degenerate_sample(&s_dst) {
            continue;
        }

        let Ok(h) = homography_dlt(&s_src, &s_dst) else {
            continue;
        };

        let (inliers, count, score) = classify_inliers(&h, src, dst, threshold_sq);
        let better = match &best {
            None => count > 0,
            Some((_, _, best_count, best_score)) => {
                count > *best_count || (count == *best_count && score < *best_score)
            }
        };
        if better {
            best = Some((h, inliers, count, score));
            let ratio = count as f64 / n as f64;
            required_iters =
                required_iterations(ratio, params.confidence, params.max_iterations).max(iter);
        }
    }

    let Some((mut model, mut inliers, mut count, mut score)) = best else {
        return Err(GeometryError::RansacFailure {
            inliers: 0,
            required: params.min_inliers,
        });
    };

    // refit on every inlier
    if count > SAMPLE_SIZE {
        let (in_src, in_dst): (Vec<DVec2>, Vec<DVec2>) = src
            .iter()
            .zip(dst)
            .zip(&inliers)
            .filter(|(_, is_in)| **is_in)
            .map(|((p, q), _)| (*p, *q))
            .unzip();
        if let Ok(refit) = homography_dlt(&in_src, &in_dst) {
            let (r_inliers, r_count, r_score) = classify_inliers(&refit, src, dst, threshold_sq);
            if r_count >= count {
                model = refit;
                inliers = r_inliers;
                count = r_count;
                score = r_score;
            }
        }
    }

    if count < params.min_inliers.max(SAMPLE_SIZE) {
        return Err(GeometryError::RansacFailure {
            inliers: count,
            required: params.min_inliers.max(SAMPLE_SIZE),
        });
    }

    log::trace!("ransac: {count}/{n} inliers after {iter} iterations");

    Ok(RansacResult {
        model,
        inliers,
        inlier_count: count,
        score,
        iterations: iter,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homography::{mat3_from_rows, transform_point};
    use approx::assert_relative_eq;
    use rand::Rng;

    fn synthetic(outliers: usize) -> (DMat3, Vec<DVec2>, Vec<DVec2>) {
        let h = mat3_from_rows([
            [0.98, -0.02, 25.0],
            [0.03, 1.01, -4.0],
            [1e-4, 2e-5, 1.0],
        ]);
        let mut rng = StdRng::seed_from_u64(7);
        let mut src = Vec::new();
        let mut dst = Vec::new();
        for _ in 0..60 {
            let p = DVec2::new(rng.random_range(-150.0..150.0), rng.random_range(-100.0..100.0));
            if let Some(q) = transform_point(&h, p) {
                src.push(p);
                dst.push(q);
            }
        }
        // outliers land far away from every true match
        for _ in 0..outliers {
            src.push(DVec2::new(
                rng.random_range(-150.0..150.0),
                rng.random_range(-100.0..100.0),
            ));
            dst.push(DVec2::new(
                rng.random_range(500.0..800.0),
                rng.random_range(500.0..800.0),
            ));
        }
        (h, src, dst)
    }

    #[test]
    fn test_required_iterations() {
        assert_eq!(required_iterations(1.0, 0.995, 2000), 1);
        assert_eq!(required_iterations(0.0, 0.995, 2000), 2000);
        // 0.5^4 = 1/16, ln(0.005) / ln(15/16) = 82.1
        assert_eq!(required_iterations(0.5, 0.995, 2000), 83);
    }

    #[test]
    fn test_ransac_homography_with_outliers() -> Result<(), GeometryError> {
        let (h, src, dst) = synthetic(30);
        let result = ransac_homography(&src, &dst, &RansacParams::default())?;

        assert_eq!(result.inlier_count, 60);
        for i in 0..60 {
            assert!(result.inliers[i]);
        }
        for (a, b) in result
            .model
            .to_cols_array()
            .iter()
            .zip(h.to_cols_array().iter())
        {
            assert_relative_eq!(a, b, epsilon = 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_ransac_is_deterministic() -> Result<(), GeometryError> {
        let (_, src, dst) = synthetic(40);
        let params = RansacParams::default();
        let a = ransac_homography(&src, &dst, &params)?;
        let b = ransac_homography(&src, &dst, &params)?;
        assert_eq!(a.model, b.model);
        assert_eq!(a.inliers, b.inliers);
        assert_eq!(a.iterations, b.iterations);
        Ok(())
    }

    #[test]
    fn test_ransac_min_inliers() {
        let (_, src, dst) = synthetic(0);
        let params = RansacParams {
            min_inliers: 100,
            ..Default::default()
        };
        assert!(matches!(
            ransac_homography(&src, &dst, &params),
            Err(GeometryError::RansacFailure { required: 100, .. })
        ));
        assert!(matches!(
            ransac_homography(&src[..3], &dst[..3], &params),
            Err(GeometryError::InsufficientCorrespondences { .. })
        ));
    }
}
