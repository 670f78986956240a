#![deny(missing_docs)]
//! Two-view geometry under a rotating camera.
//!
//! - [`homography`]: normalized DLT fit and point transfer
//! - [`ransac`]: robust homography estimation with adaptive iteration count
//! - [`autocalib`]: focal lengths and relative rotation recovered from a homography

/// Focal and rotation recovery from homographies.
pub mod autocalib;

mod error;
pub use error::GeometryError;

/// Homography fitting and application.
pub mod homography;

/// Robust homography estimation.
pub mod ransac;
