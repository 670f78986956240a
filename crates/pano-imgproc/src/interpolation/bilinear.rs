use pano_image::Image;

/// Kernel for bilinear interpolation
///
/// # Arguments
///
/// * `image` - The input image container.
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
///
/// # Returns
///
/// The interpolated pixel values.
pub fn bilinear_interpolation<const C: usize>(image: &Image<f32, C>, u: f32, v: f32) -> [f32; C] {
    let (rows, cols) = (image.rows(), image.cols());
    if rows == 0 || cols == 0 {
        return [0.0; C];
    }

    let u = u.clamp(0.0, (cols - 1) as f32);
    let v = v.clamp(0.0, (rows - 1) as f32);

    let iu0 = (u.trunc() as usize).min(cols - 1);
    let iv0 = (v.trunc() as usize).min(rows - 1);

    let frac_u = u - iu0 as f32;
    let frac_v = v - iv0 as f32;

    let frac_uu = 1.0 - frac_u;
    let frac_vv = 1.0 - frac_v;

    let w00 = frac_uu * frac_vv;
    let w01 = frac_u * frac_vv;
    let w10 = frac_uu * frac_v;
    let w11 = frac_u * frac_v;

    let iu1 = if iu0 + 1 < cols { iu0 + 1 } else { iu0 };
    let iv1 = if iv0 + 1 < rows { iv0 + 1 } else { iv0 };

    let data = image.as_slice();
    let base00 = (iv0 * cols + iu0) * C;
    let base01 = (iv0 * cols + iu1) * C;
    let base10 = (iv1 * cols + iu0) * C;
    let base11 = (iv1 * cols + iu1) * C;

    let mut pixel = [0.0; C];
    for (k, px) in pixel.iter_mut().enumerate() {
        *px = data[base00 + k] * w00
            + data[base01 + k] * w01
            + data[base10 + k] * w10
            + data[base11 + k] * w11;
    }

    pixel
}
