#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// Composition of the warped images.
pub mod blender;

/// Levenberg-Marquardt refinement of the cameras.
pub mod bundle;

/// Camera intrinsics and orientation.
pub mod camera;

/// Session configuration.
pub mod config;

/// Telemetry, deadline and cancellation of a run.
pub mod context;

mod error;
pub use error::{DropReason, StitchError, StitchFailure, StitchReport};

/// Initial cameras from the pairwise homographies.
pub mod estimator;

/// Exposure compensation.
pub mod exposure;

/// Keypoints and descriptors.
pub mod features;

/// Focal aggregation.
pub mod focal;

/// Image graph of the matched pairs.
pub mod graph;

/// Pairwise matching and geometric verification.
pub mod matcher;

/// The stitching driver.
pub mod pipeline;

/// Seam estimation.
pub mod seam;

/// Projection onto the panorama surface.
pub mod warper;

/// Wave correction.
pub mod wave;

pub use crate::camera::CameraParams;
pub use crate::config::StitcherConfig;
pub use crate::context::{Stage, StageTimings, StitchContext, Telemetry};
pub use crate::pipeline::{StitchOutput, Stitcher};
