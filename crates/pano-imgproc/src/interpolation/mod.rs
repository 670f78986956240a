//! Pixel interpolation methods for image transformations.
//!
//! - **Nearest**: uses the nearest pixel value
//! - **Bilinear**: linear interpolation between the four adjacent pixels

mod bilinear;
mod nearest;

use pano_image::Image;

pub use bilinear::bilinear_interpolation;
pub use nearest::nearest_neighbor_interpolation;

/// Interpolation mode for resampling operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpolationMode {
    /// Bilinear interpolation
    Bilinear,
    /// Nearest neighbor interpolation
    Nearest,
}

/// Kernel for interpolating a pixel value
///
/// # Arguments
///
/// * `image` - The input image container with shape (height, width, C).
/// * `u` - The x coordinate of the pixel to interpolate.
/// * `v` - The y coordinate of the pixel to interpolate.
/// * `interpolation` - The interpolation mode to use.
///
/// # Returns
///
/// The interpolated pixel values. Coordinates outside the image are clamped to the border.
pub fn interpolate_pixel<const C: usize>(
    image: &Image<f32, C>,
    u: f32,
    v: f32,
    interpolation: InterpolationMode,
) -> [f32; C] {
    match interpolation {
        InterpolationMode::Bilinear => bilinear_interpolation(image, u, v),
        InterpolationMode::Nearest => nearest_neighbor_interpolation(image, u, v),
    }
}
