mod fast;
pub use fast::*;

mod matching;
pub use matching::*;

mod orb;
pub use orb::*;

/// A keypoint detected at some scale of an image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Keypoint {
    /// Column in the original image coordinates.
    pub x: f32,
    /// Row in the original image coordinates.
    pub y: f32,
    /// Diameter of the meaningful neighbourhood in the original image.
    pub size: f32,
    /// Orientation in radians.
    pub angle: f32,
    /// Detector response, larger is stronger.
    pub response: f32,
    /// Pyramid level the keypoint was detected on.
    pub octave: usize,
}
