use glam::{DMat3, DVec2, DVec3};
use nalgebra::{DMatrix, SymmetricEigen};

use crate::GeometryError;

/// Build a 3x3 matrix from its rows.
#[inline]
pub fn mat3_from_rows(rows: [[f64; 3]; 3]) -> DMat3 {
    DMat3::from_cols_array_2d(&rows).transpose()
}

/// Similarity that moves the centroid to the origin and the mean distance to sqrt(2).
fn normalizing_transform(points: &[DVec2]) -> Result<DMat3, GeometryError> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(DVec2::ZERO, |acc, p| acc + *p) / n;
    let mean_dist = points.iter().map(|p| p.distance(centroid)).sum::<f64>() / n;
    if !mean_dist.is_finite() || mean_dist < 1e-12 {
        return Err(GeometryError::Degenerate);
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Ok(mat3_from_rows([
        [s, 0.0, -s * centroid.x],
        [0.0, s, -s * centroid.y],
        [0.0, 0.0, 1.0],
    ]))
}

/// Estimate the homography mapping `src` onto `dst` with the normalized direct linear transform.
///
/// Points are conditioned (Hartley normalization) before solving, and the solution is the
/// eigenvector of `AᵀA` with the smallest eigenvalue, which is the least squares solution of
/// `A h = 0` for any number of correspondences `>= 4`.
///
/// # Arguments
///
/// * `src` - The source points.
/// * `dst` - The destination points, same length as `src`.
///
/// # Returns
///
/// The homography `H` with `dst ~ H * src`, scaled so that `H[2][2] = 1` when possible.
pub fn homography_dlt(src: &[DVec2], dst: &[DVec2]) -> Result<DMat3, GeometryError> {
    if src.len() != dst.len() {
        return Err(GeometryError::MismatchedLengths(src.len(), dst.len()));
    }
    if src.len() < 4 {
        return Err(GeometryError::InsufficientCorrespondences {
            required: 4,
            actual: src.len(),
        });
    }

    let t_src = normalizing_transform(src)?;
    let t_dst = normalizing_transform(dst)?;

    // accumulate AᵀA directly, two rows per correspondence
    let mut ata = DMatrix::<f64>::zeros(9, 9);
    for (p, q) in src.iter().zip(dst) {
        let p = t_src.transform_point2(*p);
        let q = t_dst.transform_point2(*q);
        let rows = [
            [p.x, p.y, 1.0, 0.0, 0.0, 0.0, -q.x * p.x, -q.x * p.y, -q.x],
            [0.0, 0.0, 0.0, p.x, p.y, 1.0, -q.y * p.x, -q.y * p.y, -q.y],
        ];
        for row in &rows {
            for i in 0..9 {
                if row[i] == 0.0 {
                    continue;
                }
                for j in 0..9 {
                    ata[(i, j)] += row[i] * row[j];
                }
            }
        }
    }

    let eig = SymmetricEigen::new(ata);
    let (min_idx, _) = eig
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(GeometryError::Degenerate)?;
    let h = eig.eigenvectors.column(min_idx);

    let h_norm = mat3_from_rows([[h[0], h[1], h[2]], [h[3], h[4], h[5]], [h[6], h[7], h[8]]]);
    let homo = t_dst.inverse() * h_norm * t_src;

    normalize_homography(&homo)
}

/// Scale a homography so that its bottom right entry is one.
///
/// Falls back to unit Frobenius norm when that entry vanishes.
pub fn normalize_homography(h: &DMat3) -> Result<DMat3, GeometryError> {
    if !h.is_finite() {
        return Err(GeometryError::Degenerate);
    }
    let h22 = h.z_axis.z;
    let out = if h22.abs() > 1e-12 {
        *h * (1.0 / h22)
    } else {
        let norm = h.to_cols_array().iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm < 1e-15 {
            return Err(GeometryError::Degenerate);
        }
        *h * (1.0 / norm)
    };

    if out.determinant().abs() < 1e-12 {
        return Err(GeometryError::Degenerate);
    }
    Ok(out)
}

/// Map a point through a homography.
///
/// Returns `None` when the point maps to infinity.
#[inline]
pub fn transform_point(h: &DMat3, p: DVec2) -> Option<DVec2> {
    let v = *h * DVec3::new(p.x, p.y, 1.0);
    if v.z.abs() < 1e-12 {
        return None;
    }
    Some(DVec2::new(v.x / v.z, v.y / v.z))
}

/// Squared transfer error `|H * src - dst|²`, infinite when `src` maps to infinity.
#[inline]
pub fn transfer_error_sq(h: &DMat3, src: DVec2, dst: DVec2) -> f64 {
    match transform_point(h, src) {
        Some(p) => p.distance_squared(dst),
        None => f64::INFINITY,
    }
}
