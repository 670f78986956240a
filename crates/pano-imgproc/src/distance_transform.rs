use pano_image::{Image, ImageError};

const AXIAL: f32 = 1.0;
const DIAGONAL: f32 = std::f32::consts::SQRT_2;

/// Compute the distance from every pixel to the closest non-zero pixel.
///
/// Uses the two pass 3x3 chamfer approximation of the euclidean distance:
/// a forward raster scan followed by a backward one. Pixels are sources when
/// their value is greater than zero. If the image has no source pixel every
/// distance is set to `f32::MAX`.
///
/// # Arguments
///
/// * `src` - The input image where non-zero pixels are the sources.
/// * `dst` - The output distances, same size as the input.
pub fn distance_transform(src: &Image<f32, 1>, dst: &mut Image<f32, 1>) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    let (rows, cols) = (src.rows(), src.cols());
    let src_data = src.as_slice();
    let dist = dst.as_slice_mut();

    for (d, &s) in dist.iter_mut().zip(src_data) {
        *d = if s > 0.0 { 0.0 } else { f32::MAX };
    }

    let relax = |dist: &mut [f32], idx: usize, other: usize, cost: f32| {
        let candidate = dist[other] + cost;
        if candidate < dist[idx] {
            dist[idx] = candidate;
        }
    };

    // forwards pass
    for r in 0..rows {
        for c in 0..cols {
            let idx = r * cols + c;
            if c > 0 {
                relax(dist, idx, idx - 1, AXIAL);
            }
            if r > 0 {
                relax(dist, idx, idx - cols, AXIAL);
                if c > 0 {
                    relax(dist, idx, idx - cols - 1, DIAGONAL);
                }
                if c + 1 < cols {
                    relax(dist, idx, idx - cols + 1, DIAGONAL);
                }
            }
        }
    }

    // backwards pass
    for r in (0..rows).rev() {
        for c in (0..cols).rev() {
            let idx = r * cols + c;
            if c + 1 < cols {
                relax(dist, idx, idx + 1, AXIAL);
            }
            if r + 1 < rows {
                relax(dist, idx, idx + cols, AXIAL);
                if c + 1 < cols {
                    relax(dist, idx, idx + cols + 1, DIAGONAL);
                }
                if c > 0 {
                    relax(dist, idx, idx + cols - 1, DIAGONAL);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pano_image::ImageSize;

    #[test]
    fn distance_transform_column() -> Result<(), ImageError> {
        let image = Image::<f32, 1>::new(
            ImageSize {
                width: 3,
                height: 4,
            },
            vec![
                0.0f32, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0,
            ],
        )?;
        let mut output = Image::<f32, 1>::from_size_val(image.size(), 0.0)?;
        distance_transform(&image, &mut output)?;

        for r in 0..4 {
            assert_relative_eq!(output.get_pixel(0, r, 0)?, 2.0);
            assert_relative_eq!(output.get_pixel(1, r, 0)?, 1.0);
            assert_relative_eq!(output.get_pixel(2, r, 0)?, 0.0);
        }
        Ok(())
    }

    #[test]
    fn distance_transform_diagonal() -> Result<(), ImageError> {
        let mut image = Image::<f32, 1>::from_size_val([3, 3].into(), 0.0)?;
        image.set_pixel(0, 0, 0, 1.0)?;
        let mut output = Image::<f32, 1>::from_size_val(image.size(), 0.0)?;
        distance_transform(&image, &mut output)?;

        assert_relative_eq!(output.get_pixel(1, 1, 0)?, DIAGONAL);
        assert_relative_eq!(output.get_pixel(2, 2, 0)?, 2.0 * DIAGONAL);
        assert_relative_eq!(output.get_pixel(2, 0, 0)?, 2.0);
        Ok(())
    }
}
