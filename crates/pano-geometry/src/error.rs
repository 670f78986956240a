/// Errors returned by the geometry estimators.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum GeometryError {
    /// Not enough correspondences for the model.
    #[error("Need at least {required} correspondences, got {actual}")]
    InsufficientCorrespondences {
        /// Minimum required correspondences.
        required: usize,
        /// Provided correspondences.
        actual: usize,
    },

    /// The two point lists differ in length.
    #[error("Mismatched correspondence lengths: {0} source points and {1} destination points")]
    MismatchedLengths(usize, usize),

    /// The configuration of points does not determine the model.
    #[error("Degenerate point configuration")]
    Degenerate,

    /// No model gathered enough inliers.
    #[error("RANSAC found {inliers} inliers, {required} required")]
    RansacFailure {
        /// Inliers of the best model.
        inliers: usize,
        /// Minimum required inliers.
        required: usize,
    },
}
