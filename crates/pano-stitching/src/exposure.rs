//! Per-image gains equalizing the brightness of overlapping images.

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use pano_image::Image;

use crate::error::StitchError;
use crate::seam::covers;
use crate::warper::WarpedImage;

/// Estimates a multiplicative gain for every warped image.
pub trait ExposureCompensator: Send + Sync {
    /// One gain per image, in input order.
    fn gains(&self, images: &[WarpedImage]) -> Result<Vec<f32>, StitchError>;
}

/// Leaves every image untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExposureCompensator;

impl ExposureCompensator for NoExposureCompensator {
    fn gains(&self, images: &[WarpedImage]) -> Result<Vec<f32>, StitchError> {
        Ok(vec![1.0; images.len()])
    }
}

/// Least squares gains matching the mean intensities of every overlap.
///
/// Minimizes `sum N_ij ((g_i I_ij - g_j I_ji)^2 / sigma_n^2 + (1 - g_i)^2 / sigma_g^2)` where
/// `N_ij` is the overlap area and `I_ij` the mean intensity of image `i` inside it.
#[derive(Debug, Clone, Copy)]
pub struct GainCompensator {
    /// Weight of the intensity difference term, `1 / sigma_n^2`.
    pub alpha: f64,
    /// Weight of the unit gain prior, `1 / sigma_g^2`.
    pub beta: f64,
}

impl Default for GainCompensator {
    fn default() -> Self {
        Self {
            alpha: 0.01,
            beta: 100.0,
        }
    }
}

fn intensity(image: &WarpedImage, x: i64, y: i64) -> f64 {
    let cx = (x - image.roi.x) as usize;
    let cy = (y - image.roi.y) as usize;
    let idx = 3 * (cy * image.roi.width + cx);
    let px = &image.image.as_slice()[idx..idx + 3];
    px.iter().map(|v| (*v as f64).powi(2)).sum::<f64>().sqrt()
}

/// Overlap area and summed intensities of both images inside it.
fn overlap_stats(a: &WarpedImage, b: &WarpedImage) -> (usize, f64, f64) {
    let Some(roi) = a.roi.intersection(&b.roi) else {
        return (0, 0.0, 0.0);
    };
    let mut count = 0;
    let (mut sum_a, mut sum_b) = (0.0, 0.0);
    for y in roi.y..roi.bottom() {
        for x in roi.x..roi.right() {
            if covers(a, x, y) && covers(b, x, y) {
                count += 1;
                sum_a += intensity(a, x, y);
                sum_b += intensity(b, x, y);
            }
        }
    }
    (count, sum_a, sum_b)
}

impl ExposureCompensator for GainCompensator {
    fn gains(&self, images: &[WarpedImage]) -> Result<Vec<f32>, StitchError> {
        let n = images.len();
        if n < 2 {
            return Ok(vec![1.0; n]);
        }

        let pairs: Vec<(usize, usize)> = (0..n)
            .flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .collect();
        let stats: Vec<(usize, f64, f64)> = pairs
            .par_iter()
            .map(|&(i, j)| overlap_stats(&images[i], &images[j]))
            .collect();

        // N(i, i) is the image area, N(i, j) at least one so the system stays regular
        let mut counts = DMatrix::<f64>::zeros(n, n);
        let mut means = DMatrix::<f64>::zeros(n, n);
        for (i, image) in images.iter().enumerate() {
            counts[(i, i)] = image.mask.as_slice().iter().filter(|m| **m > 0).count() as f64;
        }
        for (&(i, j), &(count, sum_i, sum_j)) in pairs.iter().zip(&stats) {
            counts[(i, j)] = count.max(1) as f64;
            counts[(j, i)] = counts[(i, j)];
            if count > 0 {
                means[(i, j)] = sum_i / count as f64;
                means[(j, i)] = sum_j / count as f64;
            }
        }

        let mut a = DMatrix::<f64>::zeros(n, n);
        let mut b = DVector::<f64>::zeros(n);
        for i in 0..n {
            for j in 0..n {
                b[i] += self.beta * counts[(i, j)];
                a[(i, i)] += self.beta * counts[(i, j)];
                if j == i {
                    continue;
                }
                a[(i, i)] += 2.0 * self.alpha * means[(i, j)].powi(2) * counts[(i, j)];
                a[(i, j)] -= 2.0 * self.alpha * means[(i, j)] * means[(j, i)] * counts[(i, j)];
            }
        }

        let gains = a
            .lu()
            .solve(&b)
            .ok_or_else(|| StitchError::Composition("singular gain system".into()))?;
        if gains.iter().any(|g| !g.is_finite() || *g <= 0.0) {
            return Err(StitchError::Composition(format!(
                "invalid exposure gains {:?}",
                gains.as_slice()
            )));
        }
        log::debug!("Exposure gains: {:?}", gains.as_slice());
        Ok(gains.iter().map(|g| *g as f32).collect())
    }
}

/// Multiply every sample of an image by a gain.
pub fn apply_gain(image: &mut Image<f32, 3>, gain: f32) {
    if gain == 1.0 {
        return;
    }
    image
        .as_slice_mut()
        .par_iter_mut()
        .for_each(|v| *v *= gain);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::warper::Roi;
    use approx::assert_relative_eq;
    use glam::DVec2;

    fn constant(x: i64, width: usize, value: f32) -> Result<WarpedImage, StitchError> {
        Ok(WarpedImage {
            image: Image::from_size_val([width, 10].into(), value)?,
            mask: Image::from_size_val([width, 10].into(), 255)?,
            roi: Roi {
                x,
                y: 0,
                width,
                height: 10,
            },
            center: DVec2::new(x as f64 + 0.5 * width as f64, 5.0),
            period: None,
        })
    }

    #[test]
    fn test_gains_equalize_overlap() -> Result<(), StitchError> {
        let images = vec![constant(0, 40, 60.0)?, constant(20, 40, 120.0)?];
        let gains = GainCompensator::default().gains(&images)?;
        assert_eq!(gains.len(), 2);
        assert!(gains[0] > 1.0 && gains[1] < 1.0, "{gains:?}");
        let before = 120.0 - 60.0;
        let after = (gains[1] * 120.0 - gains[0] * 60.0).abs();
        assert!(after < 0.33 * before, "{gains:?}");
        Ok(())
    }

    #[test]
    fn test_equal_images_keep_unit_gains() -> Result<(), StitchError> {
        let images = vec![
            constant(0, 30, 90.0)?,
            constant(10, 30, 90.0)?,
            constant(50, 30, 10.0)?,
        ];
        let gains = GainCompensator::default().gains(&images)?;
        for g in &gains[..2] {
            assert_relative_eq!(*g, 1.0, epsilon = 1e-5);
        }
        // no overlap, nothing to match
        assert_relative_eq!(gains[2], 1.0, epsilon = 1e-5);
        Ok(())
    }

    #[test]
    fn test_apply_gain() -> Result<(), StitchError> {
        let mut image = Image::<f32, 3>::from_size_val([4, 2].into(), 10.0)?;
        apply_gain(&mut image, 1.5);
        assert!(image.as_slice().iter().all(|v| *v == 15.0));
        assert_eq!(
            NoExposureCompensator.gains(&[constant(0, 4, 1.0)?])?,
            vec![1.0]
        );
        Ok(())
    }
}
