use std::collections::BTreeSet;

use glam::{DMat3, DVec2};
use rayon::prelude::*;

use pano_geometry::ransac::{ransac_homography, RansacParams};
use pano_imgproc::features::match_descriptors;

use crate::config::MatcherConfig;
use crate::features::FeatureSet;

/// Pairs with a higher confidence are most likely the same image twice.
const DUPLICATE_CONFIDENCE: f64 = 3.0;

/// Verified correspondences between two images.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSet {
    /// Index of the source image.
    pub src: usize,
    /// Index of the destination image.
    pub dst: usize,
    /// Putative matches as `(source keypoint, destination keypoint)`.
    pub matches: Vec<(usize, usize)>,
    /// Inlier flag of every putative match.
    pub inliers: Vec<bool>,
    /// Number of inliers.
    pub num_inliers: usize,
    /// Pair confidence, zero when the pair is rejected.
    pub confidence: f64,
    /// Homography from centered source to centered destination coordinates.
    pub homography: Option<DMat3>,
}

impl MatchSet {
    /// A pair without any verified correspondence.
    pub fn empty(src: usize, dst: usize) -> Self {
        Self {
            src,
            dst,
            matches: Vec::new(),
            inliers: Vec::new(),
            num_inliers: 0,
            confidence: 0.0,
            homography: None,
        }
    }

    /// The inlier matches as `(source keypoint, destination keypoint)`.
    pub fn inlier_matches(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.matches
            .iter()
            .zip(&self.inliers)
            .filter(|(_, is_in)| **is_in)
            .map(|(m, _)| *m)
    }
}

/// Matches the features of two images and verifies them geometrically.
pub trait PairwiseMatcher: Send + Sync {
    /// Match image `src` against image `dst`.
    ///
    /// A pair that cannot be verified yields an empty [`MatchSet`], never an error.
    fn match_pair(
        &self,
        src: usize,
        dst: usize,
        src_features: &FeatureSet,
        dst_features: &FeatureSet,
    ) -> MatchSet;
}

/// Two nearest neighbour matcher with a ratio test in both directions and a RANSAC
/// homography check.
#[derive(Debug, Clone, Default)]
pub struct BestOf2NearestMatcher {
    config: MatcherConfig,
}

impl BestOf2NearestMatcher {
    /// Create a matcher from the matching options.
    pub fn new(config: MatcherConfig) -> Self {
        Self { config }
    }

    /// Union of the ratio tested matches from source to destination and back.
    fn putative_matches(&self, src: &FeatureSet, dst: &FeatureSet) -> Vec<(usize, usize)> {
        let ratio = Some(self.config.match_ratio);
        let forward = match_descriptors(&src.descriptors, &dst.descriptors, None, false, ratio);
        let backward = match_descriptors(&dst.descriptors, &src.descriptors, None, false, ratio);

        let mut seen = BTreeSet::new();
        let mut matches = Vec::with_capacity(forward.len() + backward.len());
        let pairs = forward
            .iter()
            .map(|m| (m.query, m.train))
            .chain(backward.iter().map(|m| (m.train, m.query)));
        for pair in pairs {
            if seen.insert(pair) {
                matches.push(pair);
            }
        }
        matches
    }

    fn pair_seed(&self, src: usize, dst: usize) -> u64 {
        self.config.seed ^ (((src as u64) << 32) | dst as u64)
    }
}

impl PairwiseMatcher for BestOf2NearestMatcher {
    fn match_pair(
        &self,
        src: usize,
        dst: usize,
        src_features: &FeatureSet,
        dst_features: &FeatureSet,
    ) -> MatchSet {
        let mut result = MatchSet::empty(src, dst);
        if src_features.is_empty() || dst_features.is_empty() {
            return result;
        }

        let matches = self.putative_matches(src_features, dst_features);
        if matches.len() < self.config.min_matches {
            log::debug!(
                "Pair ({}, {}): {} matches, below {}",
                src + 1,
                dst + 1,
                matches.len(),
                self.config.min_matches
            );
            return result;
        }

        let (src_pts, dst_pts): (Vec<DVec2>, Vec<DVec2>) = matches
            .iter()
            .map(|&(s, d)| (src_features.centered_point(s), dst_features.centered_point(d)))
            .unzip();

        let params = RansacParams {
            max_iterations: self.config.ransac_max_iterations,
            reproj_threshold_px: self.config.ransac_threshold_px,
            confidence: self.config.ransac_confidence,
            random_seed: Some(self.pair_seed(src, dst)),
            min_inliers: self.config.min_inliers,
        };
        let fit = match ransac_homography(&src_pts, &dst_pts, &params) {
            Ok(fit) => fit,
            Err(err) => {
                log::debug!("Pair ({}, {}) rejected: {err}", src + 1, dst + 1);
                return result;
            }
        };
        if fit.inlier_count < self.config.min_inliers {
            log::debug!(
                "Pair ({}, {}): {} inliers, below {}",
                src + 1,
                dst + 1,
                fit.inlier_count,
                self.config.min_inliers
            );
            return result;
        }

        let mut confidence = fit.inlier_count as f64 / (8.0 + 0.3 * matches.len() as f64);
        if confidence > DUPLICATE_CONFIDENCE {
            log::debug!("Pair ({}, {}) looks like a duplicate", src + 1, dst + 1);
            confidence = 0.0;
        }

        result.matches = matches;
        result.inliers = fit.inliers;
        result.num_inliers = fit.inlier_count;
        result.confidence = confidence;
        result.homography = Some(fit.model);
        result
    }
}

/// Candidate pairs `(i, j)` with `i < j`, optionally limited to `j - i <= range_width`.
pub fn candidate_pairs(num_images: usize, range_width: Option<usize>) -> Vec<(usize, usize)> {
    let mut pairs = Vec::new();
    for i in 0..num_images {
        for j in i + 1..num_images {
            if range_width.is_some_and(|w| j - i > w) {
                break;
            }
            pairs.push((i, j));
        }
    }
    pairs
}

/// Match every candidate pair in parallel, in candidate order.
pub fn match_pairs(
    features: &[FeatureSet],
    matcher: &dyn PairwiseMatcher,
    range_width: Option<usize>,
) -> Vec<MatchSet> {
    candidate_pairs(features.len(), range_width)
        .into_par_iter()
        .map(|(i, j)| matcher.match_pair(i, j, &features[i], &features[j]))
        .collect()
}
