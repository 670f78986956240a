use rayon::prelude::*;

use crate::filter::pyramid_kernel_1d;
use pano_image::{Image, ImageError, ImageSize};

#[inline]
fn clamp_index(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}

/// Size of the next coarser pyramid level.
pub fn pyrdown_size(size: ImageSize) -> ImageSize {
    ImageSize {
        width: size.width.div_ceil(2),
        height: size.height.div_ceil(2),
    }
}

/// Blur an image with the 5x5 binomial kernel and downsample it by two.
///
/// # Arguments
///
/// * `src` - The source image.
/// * `dst` - The destination image with size `ceil(W / 2) x ceil(H / 2)`.
///
/// # Example
///
/// ```
/// use pano_image::{Image, ImageSize};
/// use pano_imgproc::pyramid::pyrdown;
///
/// let image = Image::<f32, 1>::from_size_val([5, 4].into(), 1.0).unwrap();
/// let mut down = Image::<f32, 1>::from_size_val([3, 2].into(), 0.0).unwrap();
///
/// pyrdown(&image, &mut down).unwrap();
/// assert_eq!(down.as_slice(), &[1.0; 6]);
/// ```
pub fn pyrdown<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
) -> Result<(), ImageError> {
    let expected = pyrdown_size(src.size());
    if dst.size() != expected {
        return Err(ImageError::InvalidImageSize(
            expected.width,
            expected.height,
            dst.width(),
            dst.height(),
        ));
    }

    if src.size().area() == 0 {
        return Ok(());
    }

    let kernel = pyramid_kernel_1d();
    let (src_cols, src_rows) = (src.cols(), src.rows());
    let dst_cols = dst.cols();
    let src_data = src.as_slice();

    // horizontal pass evaluated at the even columns only
    let mut temp = vec![0.0f32; src_rows * dst_cols * C];
    temp.par_chunks_exact_mut(dst_cols * C)
        .zip(src_data.par_chunks_exact(src_cols * C))
        .for_each(|(temp_row, src_row)| {
            for x in 0..dst_cols {
                for (k, &kv) in kernel.iter().enumerate() {
                    let sx = reflect(2 * x as isize + k as isize - 2, src_cols);
                    for ch in 0..C {
                        temp_row[x * C + ch] += src_row[sx * C + ch] * kv;
                    }
                }
            }
        });

    // vertical pass evaluated at the even rows only
    dst.as_slice_mut()
        .par_chunks_exact_mut(dst_cols * C)
        .enumerate()
        .for_each(|(y, dst_row)| {
            dst_row.iter_mut().for_each(|v| *v = 0.0);
            for (k, &kv) in kernel.iter().enumerate() {
                let sy = reflect(2 * y as isize + k as isize - 2, src_rows);
                let temp_row = &temp[sy * dst_cols * C..(sy + 1) * dst_cols * C];
                for (d, &t) in dst_row.iter_mut().zip(temp_row) {
                    *d += t * kv;
                }
            }
        });

    Ok(())
}

#[inline]
fn reflect(i: isize, n: usize) -> usize {
    crate::filter::reflect_101(i, n as isize)
}

/// Upsample an image by two and blur it with the 5x5 binomial kernel.
///
/// This is the expansion operator of a Burt-Adelson pyramid: it is equivalent to
/// inserting zeros between the samples and filtering with four times the kernel.
/// The destination may be one pixel smaller than twice the source in each
/// dimension, so that odd sized levels can be restored exactly.
///
/// # Arguments
///
/// * `src` - The source image to be upsampled.
/// * `dst` - The destination image to store the result.
///
/// # Example
///
/// ```
/// use pano_image::{Image, ImageSize};
/// use pano_imgproc::pyramid::pyrup;
///
/// let image = Image::<f32, 3>::new(
///     ImageSize {
///         width: 2,
///         height: 2,
///     },
///     vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0, 11.0],
/// ).unwrap();
///
/// let mut upsampled = Image::<f32, 3>::from_size_val(
///     ImageSize {
///         width: 4,
///         height: 4,
///     },
///     0.0,
/// ).unwrap();
///
/// pyrup(&image, &mut upsampled).unwrap();
/// ```
pub fn pyrup<const C: usize>(src: &Image<f32, C>, dst: &mut Image<f32, C>) -> Result<(), ImageError> {
    if pyrdown_size(dst.size()) != src.size() {
        return Err(ImageError::InvalidImageSize(
            src.width() * 2,
            src.height() * 2,
            dst.width(),
            dst.height(),
        ));
    }

    if src.size().area() == 0 {
        return Ok(());
    }

    let (src_cols, src_rows) = (src.cols(), src.rows());
    let dst_cols = dst.cols();
    let src_data = src.as_slice();

    // horizontal expansion of every source row
    let mut temp = vec![0.0f32; src_rows * dst_cols * C];
    temp.par_chunks_exact_mut(dst_cols * C)
        .zip(src_data.par_chunks_exact(src_cols * C))
        .for_each(|(temp_row, src_row)| {
            for x in 0..dst_cols {
                let i = (x / 2) as isize;
                let out = &mut temp_row[x * C..(x + 1) * C];
                if x % 2 == 0 {
                    let (a, b, c) = (
                        clamp_index(i - 1, src_cols),
                        clamp_index(i, src_cols),
                        clamp_index(i + 1, src_cols),
                    );
                    for ch in 0..C {
                        out[ch] = (src_row[a * C + ch]
                            + 6.0 * src_row[b * C + ch]
                            + src_row[c * C + ch])
                            * 0.125;
                    }
                } else {
                    let (a, b) = (clamp_index(i, src_cols), clamp_index(i + 1, src_cols));
                    for ch in 0..C {
                        out[ch] = (src_row[a * C + ch] + src_row[b * C + ch]) * 0.5;
                    }
                }
            }
        });

    // vertical expansion
    dst.as_slice_mut()
        .par_chunks_exact_mut(dst_cols * C)
        .enumerate()
        .for_each(|(y, dst_row)| {
            let i = (y / 2) as isize;
            let row = |r: usize| &temp[r * dst_cols * C..(r + 1) * dst_cols * C];
            if y % 2 == 0 {
                let (a, b, c) = (
                    row(clamp_index(i - 1, src_rows)),
                    row(clamp_index(i, src_rows)),
                    row(clamp_index(i + 1, src_rows)),
                );
                for (k, d) in dst_row.iter_mut().enumerate() {
                    *d = (a[k] + 6.0 * b[k] + c[k]) * 0.125;
                }
            } else {
                let (a, b) = (
                    row(clamp_index(i, src_rows)),
                    row(clamp_index(i + 1, src_rows)),
                );
                for (k, d) in dst_row.iter_mut().enumerate() {
                    *d = (a[k] + b[k]) * 0.5;
                }
            }
        });

    Ok(())
}

/// Build a gaussian pyramid with `num_levels` downsampled levels on top of the input.
///
/// The returned vector holds `num_levels + 1` images, the first one being a copy of `src`.
pub fn build_gaussian_pyramid<const C: usize>(
    src: &Image<f32, C>,
    num_levels: usize,
) -> Result<Vec<Image<f32, C>>, ImageError> {
    let mut pyramid = Vec::with_capacity(num_levels + 1);
    pyramid.push(src.clone());
    for level in 0..num_levels {
        let prev = &pyramid[level];
        let mut next = Image::from_size_val(pyrdown_size(prev.size()), 0.0)?;
        pyrdown(prev, &mut next)?;
        pyramid.push(next);
    }
    Ok(pyramid)
}

/// Build a laplacian pyramid with `num_levels` band-pass levels and a low-pass residual.
///
/// Level `i < num_levels` stores `G_i - up(G_{i+1})`; the last level stores `G_{num_levels}`.
pub fn build_laplacian_pyramid<const C: usize>(
    src: &Image<f32, C>,
    num_levels: usize,
) -> Result<Vec<Image<f32, C>>, ImageError> {
    let mut pyramid = build_gaussian_pyramid(src, num_levels)?;
    for level in 0..num_levels {
        let mut up = Image::from_size_val(pyramid[level].size(), 0.0)?;
        pyrup(&pyramid[level + 1], &mut up)?;
        pyramid[level]
            .as_slice_mut()
            .iter_mut()
            .zip(up.as_slice())
            .for_each(|(g, u)| *g -= u);
    }
    Ok(pyramid)
}

/// Reconstruct an image from its laplacian pyramid by upsampling and summing the bands.
pub fn collapse_laplacian_pyramid<const C: usize>(
    pyramid: &[Image<f32, C>],
) -> Result<Image<f32, C>, ImageError> {
    let Some((top, bands)) = pyramid.split_last() else {
        return Err(ImageError::EmptyImage);
    };

    let mut current = top.clone();
    for band in bands.iter().rev() {
        let mut up = Image::from_size_val(band.size(), 0.0)?;
        pyrup(&current, &mut up)?;
        up.as_slice_mut()
            .iter_mut()
            .zip(band.as_slice())
            .for_each(|(u, b)| *u += b);
        current = up;
    }
    Ok(current)
}
