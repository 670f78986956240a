use crate::{error::ImageError, image::Image};

/// Cast the pixel data of an image into a preallocated image and scale it.
///
/// # Arguments
///
/// * `src` - The source image.
/// * `dst` - The destination image, with the same size as the source.
/// * `scale` - The factor applied to every value after the cast.
///
/// # Errors
///
/// If the sizes do not match or a value cannot be represented in the target type.
pub fn cast_and_scale<T, U, const C: usize>(
    src: &Image<T, C>,
    dst: &mut Image<U, C>,
    scale: U,
) -> Result<(), ImageError>
where
    T: num_traits::NumCast + Copy,
    U: num_traits::NumCast + std::ops::Mul<Output = U> + Copy,
{
    if src.size() != dst.size() {
        return Err(ImageError::InvalidImageSize(
            src.width(),
            src.height(),
            dst.width(),
            dst.height(),
        ));
    }

    for (out, &x) in dst.as_slice_mut().iter_mut().zip(src.as_slice()) {
        *out = U::from(x).ok_or(ImageError::CastError)? * scale;
    }

    Ok(())
}

/// Convert a floating point image in the `[0, 255]` range to 8 bits, rounding and clamping.
pub fn saturate_u8<const C: usize>(src: &Image<f32, C>) -> Result<Image<u8, C>, ImageError> {
    let data = src
        .as_slice()
        .iter()
        .map(|&x| x.round().clamp(0.0, 255.0) as u8)
        .collect();
    Image::new(src.size(), data)
}
