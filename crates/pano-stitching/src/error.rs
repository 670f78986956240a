use pano_algebra::optim::OptimizerError;
use pano_geometry::GeometryError;
use pano_image::ImageError;

use crate::context::Stage;

/// An error type for the stitching pipeline.
#[derive(thiserror::Error, Debug)]
pub enum StitchError {
    /// Fewer than two images can take part in the run.
    #[error("Need more images: {usable} usable image(s), at least 2 required")]
    InsufficientImages {
        /// Number of images that could be used.
        usable: usize,
    },

    /// The largest group of connected images is too small to build a panorama.
    #[error("Insufficient overlap: the largest connected component has {component_size} image(s)")]
    InsufficientOverlap {
        /// Number of images in the largest connected component.
        component_size: usize,
    },

    /// Camera registration diverged or produced invalid parameters.
    #[error("Camera parameters adjusting failed: {0}")]
    Optimization(String),

    /// Error raised by the non-linear least squares solver.
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// No image could be composited.
    #[error("Composition failed: {0}")]
    Composition(String),

    /// The run was cancelled by the caller.
    #[error("Stitching cancelled before {0:?}")]
    Cancelled(Stage),

    /// The caller supplied deadline passed.
    #[error("Deadline exceeded before {0:?}")]
    DeadlineExceeded(Stage),

    /// Error raised by an image operation.
    #[error(transparent)]
    Image(#[from] ImageError),

    /// Error raised by a geometric estimator.
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// Why an input image does not contribute to the panorama.
#[derive(Debug, Clone, PartialEq)]
pub enum DropReason {
    /// The image has no pixels.
    EmptyImage,
    /// No keypoints could be extracted.
    NoFeatures,
    /// The image is not part of the largest connected component.
    NotConnected,
    /// Warping or blending the image failed.
    CompositionFailed(String),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::EmptyImage => write!(f, "empty image"),
            DropReason::NoFeatures => write!(f, "no features found"),
            DropReason::NotConnected => write!(f, "not connected to the panorama"),
            DropReason::CompositionFailed(msg) => write!(f, "composition failed: {msg}"),
        }
    }
}

/// Which input images a run used and which it dropped.
///
/// Indices refer to the positions in the slice handed to the stitcher.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StitchReport {
    /// Images contributing to the result, ascending.
    pub used: Vec<usize>,
    /// Dropped images with the reason, ascending by index.
    pub dropped: Vec<(usize, DropReason)>,
}

impl StitchReport {
    /// Report for a run where every image is still in use.
    pub fn all_used(num_images: usize) -> Self {
        Self {
            used: (0..num_images).collect(),
            dropped: Vec::new(),
        }
    }

    /// Move an image from the used set to the dropped set.
    ///
    /// Has no effect if the image was already dropped.
    pub fn drop_image(&mut self, index: usize, reason: DropReason) {
        if let Some(pos) = self.used.iter().position(|&i| i == index) {
            self.used.remove(pos);
            let at = self.dropped.partition_point(|(i, _)| *i < index);
            self.dropped.insert(at, (index, reason));
        }
    }

    /// The reason an image was dropped, if it was.
    pub fn drop_reason(&self, index: usize) -> Option<&DropReason> {
        self.dropped
            .iter()
            .find_map(|(i, reason)| (*i == index).then_some(reason))
    }
}

/// A failed run: the error plus the images used and dropped up to the failure.
#[derive(thiserror::Error, Debug)]
#[error("{error}")]
pub struct StitchFailure {
    /// What stopped the run.
    #[source]
    pub error: StitchError,
    /// State of the run when it stopped.
    pub report: StitchReport,
}

impl StitchFailure {
    /// Attach a report to an error.
    pub fn new(error: StitchError, report: StitchReport) -> Self {
        Self { error, report }
    }
}
