use glam::DMat3;

use pano_geometry::autocalib::intrinsic_matrix;

/// Intrinsics and orientation of one registered image.
///
/// `rotation` maps camera rays to panorama rays, so a pixel `x` sees the direction
/// `rotation * K⁻¹ x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraParams {
    /// Focal length in pixels.
    pub focal: f64,
    /// Principal point column.
    pub ppx: f64,
    /// Principal point row.
    pub ppy: f64,
    /// Camera to panorama rotation.
    pub rotation: DMat3,
}

impl CameraParams {
    /// Camera with the principal point at the image center.
    pub fn new(focal: f64, width: usize, height: usize, rotation: DMat3) -> Self {
        Self {
            focal,
            ppx: 0.5 * width as f64,
            ppy: 0.5 * height as f64,
            rotation,
        }
    }

    /// Intrinsic matrix.
    pub fn intrinsics(&self) -> DMat3 {
        intrinsic_matrix(self.focal, self.ppx, self.ppy)
    }

    /// The same camera for an image resized by `scale`.
    pub fn scaled(&self, scale: f64) -> Self {
        Self {
            focal: self.focal * scale,
            ppx: self.ppx * scale,
            ppy: self.ppy * scale,
            rotation: self.rotation,
        }
    }
}
