//! Configuration of a stitching session.
//!
//! Every struct implements [`Default`] and deserializes with `#[serde(default)]`, so a partial
//! JSON document overrides only the options it names:
//!
//! ```
//! use pano_stitching::config::{BlenderKind, StitcherConfig};
//!
//! let config: StitcherConfig =
//!     serde_json::from_str(r#"{ "blender": { "kind": "feather" } }"#).unwrap();
//! assert_eq!(config.blender.kind, BlenderKind::Feather);
//! assert_eq!(config.blender.num_bands, 5);
//! ```

use serde::{Deserialize, Serialize};

/// Keypoint detection and description options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Maximum number of keypoints per image.
    pub num_features: usize,
    /// Number of pyramid levels.
    pub num_levels: usize,
    /// Scale factor between pyramid levels.
    pub scale_factor: f32,
    /// FAST threshold on the `[0, 255]` intensity range.
    pub fast_threshold: f32,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            num_features: 1500,
            num_levels: 8,
            scale_factor: 1.2,
            fast_threshold: 20.0,
        }
    }
}

/// Pairwise matching and geometric verification options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatcherConfig {
    /// Maximum ratio between the best and second best descriptor distance.
    pub match_ratio: f32,
    /// Minimum number of putative matches to attempt a homography fit.
    pub min_matches: usize,
    /// Minimum number of RANSAC inliers for a pair to be kept.
    pub min_inliers: usize,
    /// Only match images at most this far apart in input order.
    pub range_width: Option<usize>,
    /// RANSAC inlier threshold in pixels at registration scale.
    pub ransac_threshold_px: f64,
    /// RANSAC confidence.
    pub ransac_confidence: f64,
    /// Maximum number of RANSAC iterations.
    pub ransac_max_iterations: usize,
    /// Base seed of the per-pair random generators.
    pub seed: u64,
}

impl Default for MatcherConfig {
    fn default() -> Self {
        Self {
            match_ratio: 0.75,
            min_matches: 6,
            min_inliers: 8,
            range_width: None,
            ransac_threshold_px: 3.0,
            ransac_confidence: 0.995,
            ransac_max_iterations: 2000,
            seed: 0,
        }
    }
}

/// Image graph options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Minimum pair confidence for an edge to be kept.
    pub confidence_threshold: f64,
    /// Minimum number of inliers for an edge to be kept.
    pub min_inliers: usize,
    /// Refine cameras over the maximum spanning tree edges only.
    pub prune_to_spanning_tree: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 1.0,
            min_inliers: 8,
            prune_to_spanning_tree: false,
        }
    }
}

/// Straightening applied to the cameras after bundle adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaveCorrection {
    /// Leave the rotations untouched.
    None,
    /// Make the horizon of a horizontal sweep straight.
    Horizontal,
    /// Straighten a vertical sweep.
    Vertical,
}

/// Camera refinement options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleAdjusterConfig {
    /// Maximum number of Levenberg-Marquardt iterations.
    pub max_iterations: usize,
    /// Relative cost decrease under which the solver stops.
    pub cost_tolerance: f64,
    /// Straightening applied after the refinement.
    pub wave_correction: WaveCorrection,
}

impl Default for BundleAdjusterConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            cost_tolerance: 1e-8,
            wave_correction: WaveCorrection::Horizontal,
        }
    }
}

/// Surface the panorama is projected onto.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceKind {
    /// Longitude and latitude.
    Spherical,
    /// Longitude and height on a vertical cylinder.
    Cylindrical,
}

/// Warping options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarperConfig {
    /// Projection surface.
    pub surface: SurfaceKind,
}

impl Default for WarperConfig {
    fn default() -> Self {
        Self {
            surface: SurfaceKind::Spherical,
        }
    }
}

/// Seam estimation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeamFinderKind {
    /// Minimum cut over the color differences in each overlap.
    GraphCut,
    /// Every pixel goes to the closest image center.
    Voronoi,
}

/// Seam estimation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeamConfig {
    /// Seam estimation algorithm.
    pub finder: SeamFinderKind,
    /// Weight of the gradient term in the graph cut cost, zero for a pure color cost.
    pub gradient_weight: f32,
}

impl Default for SeamConfig {
    fn default() -> Self {
        Self {
            finder: SeamFinderKind::GraphCut,
            gradient_weight: 0.0,
        }
    }
}

/// Blending algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlenderKind {
    /// Laplacian pyramid blending.
    MultiBand,
    /// Distance weighted averaging.
    Feather,
}

/// Blending options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlenderConfig {
    /// Blending algorithm.
    pub kind: BlenderKind,
    /// Number of frequency bands of the multi-band blender.
    pub num_bands: usize,
    /// Slope of the feather weights per pixel of distance to the mask border.
    pub sharpness: f32,
}

impl Default for BlenderConfig {
    fn default() -> Self {
        Self {
            kind: BlenderKind::MultiBand,
            num_bands: 5,
            sharpness: 0.02,
        }
    }
}

/// Exposure compensation algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExposureKind {
    /// No compensation.
    None,
    /// One gain per image.
    Gain,
}

/// Exposure compensation options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    /// Exposure compensation algorithm.
    pub kind: ExposureKind,
}

impl Default for ExposureConfig {
    fn default() -> Self {
        Self {
            kind: ExposureKind::Gain,
        }
    }
}

/// Options of a whole stitching session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StitcherConfig {
    /// Resolution of the registration images in megapixels.
    pub registration_megapix: f64,
    /// Resolution of the seam estimation images in megapixels.
    pub seam_megapix: f64,
    /// Resolution of the composited images in megapixels, `None` for the input resolution.
    pub compose_megapix: Option<f64>,
    /// Keypoint options.
    pub features: FeatureConfig,
    /// Matching options.
    pub matcher: MatcherConfig,
    /// Image graph options.
    pub graph: GraphConfig,
    /// Camera refinement options.
    pub bundle: BundleAdjusterConfig,
    /// Warping options.
    pub warper: WarperConfig,
    /// Seam options.
    pub seam: SeamConfig,
    /// Blending options.
    pub blender: BlenderConfig,
    /// Exposure options.
    pub exposure: ExposureConfig,
}

impl Default for StitcherConfig {
    fn default() -> Self {
        Self {
            registration_megapix: 0.6,
            seam_megapix: 0.1,
            compose_megapix: None,
            features: FeatureConfig::default(),
            matcher: MatcherConfig::default(),
            graph: GraphConfig::default(),
            bundle: BundleAdjusterConfig::default(),
            warper: WarperConfig::default(),
            seam: SeamConfig::default(),
            blender: BlenderConfig::default(),
            exposure: ExposureConfig::default(),
        }
    }
}
