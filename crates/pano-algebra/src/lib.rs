//! Lie groups, small linear algebra and non-linear least squares for panorama registration.
//!
//! This crate provides:
//! - The rotation group SO(3) in double precision over the glam backend
//! - 3x3 decompositions used to project estimates back onto rotations
//! - A factor graph Levenberg-Marquardt optimizer over Euclidean and SO(3) variables

/// Lie groups.
pub mod lie;

/// Linear algebra helpers for 3x3 matrices.
pub mod linalg;

/// Factor graph optimization.
pub mod optim;

pub use lie::so3::SO3F64;
