#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]

/// color transformations module.
pub mod color;

/// distance transform over binary masks.
pub mod distance_transform;

/// feature detection, description and matching module.
pub mod features;

/// image filtering module.
pub mod filter;

/// utilities for interpolation.
pub mod interpolation;

/// module containing parallization utilities.
pub mod parallel;

/// Pyramid operations
pub mod pyramid;

/// utility functions for resizing images.
pub mod resize;
