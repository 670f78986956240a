//! # Lie Groups
//!
//! The exponential map (`exp`) moves from the Lie algebra (a plain vector space, suitable
//! for optimization) to the group, and the logarithmic map (`log`) goes back.
//!
//! | Group | Description | DOF | Internal repr |
//! |-------|-------------|-----|---------------|
//! | [`so3::SO3F64`] | 3D rotations | 3 | Unit quaternion |

pub mod so3;
