use crate::interpolation::{interpolate_pixel, InterpolationMode};
use crate::parallel::par_iter_rows_indexed;
use pano_image::{Image, ImageError};

/// Resize an image to a new size.
///
/// The destination size defines the output grid. Pixel centers are aligned so that
/// the image borders map onto each other.
///
/// # Arguments
///
/// * `src` - The input image container.
/// * `dst` - The output image container.
/// * `interpolation` - The interpolation mode used to sample the source.
///
/// # Example
///
/// ```
/// use pano_image::{Image, ImageSize};
/// use pano_imgproc::resize::resize_native;
/// use pano_imgproc::interpolation::InterpolationMode;
///
/// let image = Image::<_, 3>::new(
///     ImageSize {
///         width: 4,
///         height: 5,
///     },
///     vec![0f32; 4 * 5 * 3],
/// )
/// .unwrap();
///
/// let new_size = ImageSize {
///     width: 2,
///     height: 3,
/// };
///
/// let mut image_resized = Image::<_, 3>::from_size_val(new_size, 0.0).unwrap();
///
/// resize_native(&image, &mut image_resized, InterpolationMode::Nearest).unwrap();
///
/// assert_eq!(image_resized.size().width, 2);
/// assert_eq!(image_resized.size().height, 3);
/// ```
pub fn resize_native<const C: usize>(
    src: &Image<f32, C>,
    dst: &mut Image<f32, C>,
    interpolation: InterpolationMode,
) -> Result<(), ImageError> {
    if src.size().area() == 0 {
        return Err(ImageError::EmptyImage);
    }

    let sx = src.width() as f32 / dst.width().max(1) as f32;
    let sy = src.height() as f32 / dst.height().max(1) as f32;

    par_iter_rows_indexed(dst, |r, row| {
        let v = (r as f32 + 0.5) * sy - 0.5;
        for (c, out) in row.chunks_exact_mut(C).enumerate() {
            let u = (c as f32 + 0.5) * sx - 0.5;
            out.copy_from_slice(&interpolate_pixel(src, u, v, interpolation));
        }
    });

    Ok(())
}
