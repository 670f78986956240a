use pano_image::{Image, ImageError};
use rayon::prelude::*;

use super::kernels::gaussian_kernel_1d;

/// Reflect an index into `[0, n)` mirroring around the edge pixels (`dcb|abcd|cba`).
#[inline]
pub fn reflect_101(mut i: isize, n: isize) -> usize {
    if n == 1 {
        return 0;
    }
    loop {
        if i < 0 {
            i = -i;
        } else if i >= n {
            i = 2 * n - 2 - i;
        } else {
            return i as usize;
        }
    }
}

/// Apply a separable filter to an image.
///
/// Performs horizontal filtering followed by vertical filtering using a temporary buffer.
/// Pixels outside the image are read from the mirrored interior.
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W, C).
/// * `dst` - The destination image with shape (H, W, C).
/// * `kernel_x` - The horizontal kernel.
/// * `kernel_y` - The vertical kernel.
pub fn separable_filter<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
    kernel_x: &[f32],
    kernel_y: &[f32],
) -> Result<(), ImageError> {
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.cols(),
            src.rows(),
            dst.cols(),
            dst.rows(),
        ));
    }

    if src.size().area() == 0 {
        return Ok(());
    }

    let (rows, cols) = (src.rows(), src.cols());
    let half_x = (kernel_x.len() / 2) as isize;
    let half_y = (kernel_y.len() / 2) as isize;

    let src_data = src.as_slice();
    let mut temp = vec![0.0f32; src_data.len()];

    // horizontal pass
    temp.par_chunks_exact_mut(cols * C)
        .zip(src_data.par_chunks_exact(cols * C))
        .for_each(|(temp_row, src_row)| {
            for c in 0..cols {
                let mut acc = [0.0f32; C];
                for (k, &kv) in kernel_x.iter().enumerate() {
                    let x = reflect_101(c as isize + k as isize - half_x, cols as isize);
                    for ch in 0..C {
                        acc[ch] += src_row[x * C + ch] * kv;
                    }
                }
                temp_row[c * C..(c + 1) * C].copy_from_slice(&acc);
            }
        });

    // vertical pass
    dst.as_slice_mut()
        .par_chunks_exact_mut(cols * C)
        .enumerate()
        .for_each(|(r, dst_row)| {
            dst_row.iter_mut().for_each(|v| *v = 0.0);
            for (k, &kv) in kernel_y.iter().enumerate() {
                let y = reflect_101(r as isize + k as isize - half_y, rows as isize);
                let temp_row = &temp[y * cols * C..(y + 1) * cols * C];
                for (d, &t) in dst_row.iter_mut().zip(temp_row) {
                    *d += t * kv;
                }
            }
        });

    Ok(())
}

/// Blur an image using a gaussian kernel.
///
/// # Arguments
///
/// * `src` - The source image with shape (H, W, C).
/// * `dst` - The destination image with shape (H, W, C).
/// * `kernel_size` - The size of the kernel (kernel_x, kernel_y).
/// * `sigma` - The sigma of the gaussian kernel (sigma_x, sigma_y).
pub fn gaussian_blur<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
    kernel_size: (usize, usize),
    sigma: (f32, f32),
) -> Result<(), ImageError> {
    let kernel_x = gaussian_kernel_1d(kernel_size.0, sigma.0);
    let kernel_y = gaussian_kernel_1d(kernel_size.1, sigma.1);
    separable_filter(src, dst, &kernel_x, &kernel_y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pano_image::ImageSize;

    #[test]
    fn test_reflect_101() {
        assert_eq!(reflect_101(-1, 5), 1);
        assert_eq!(reflect_101(-2, 5), 2);
        assert_eq!(reflect_101(5, 5), 3);
        assert_eq!(reflect_101(6, 5), 2);
        assert_eq!(reflect_101(3, 1), 0);
    }

    #[test]
    fn test_separable_filter_constant() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 5,
            height: 4,
        };
        let img = Image::<f32, 2>::from_size_val(size, 3.0)?;
        let mut dst = Image::<f32, 2>::from_size_val(size, 0.0)?;
        gaussian_blur(&img, &mut dst, (5, 5), (1.0, 1.0))?;

        for &v in dst.as_slice() {
            assert_relative_eq!(v, 3.0, epsilon = 1e-5);
        }
        Ok(())
    }

    #[test]
    fn test_separable_filter_impulse() -> Result<(), ImageError> {
        let size = ImageSize {
            width: 5,
            height: 5,
        };
        let mut img = Image::<f32, 1>::from_size_val(size, 0.0)?;
        img.set_pixel(2, 2, 0, 9.0)?;

        let kernel = vec![1.0 / 3.0; 3];
        let mut dst = Image::<f32, 1>::from_size_val(size, 0.0)?;
        separable_filter(&img, &mut dst, &kernel, &kernel)?;

        assert_relative_eq!(dst.get_pixel(2, 2, 0)?, 1.0, epsilon = 1e-6);
        assert_relative_eq!(dst.get_pixel(1, 1, 0)?, 1.0, epsilon = 1e-6);
        assert_relative_eq!(dst.get_pixel(0, 0, 0)?, 0.0, epsilon = 1e-6);
        assert_relative_eq!(dst.as_slice().iter().sum::<f32>(), 9.0, epsilon = 1e-5);
        Ok(())
    }
}
