#![deny(missing_docs)]
//! Image types for the panorama stitching pipeline

/// image representation for computer vision purposes.
pub mod image;

/// Error types for the image module.
pub mod error;

/// Element-wise operations over images.
pub mod ops;

pub use crate::error::ImageError;
pub use crate::image::{Image, ImageSize};
