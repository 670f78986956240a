//! Initial cameras from the pairwise homographies.

use std::collections::{BTreeMap, VecDeque};

use glam::DMat3;

use pano_geometry::autocalib::{
    focals_from_homography, intrinsic_matrix, relative_rotation_from_homography,
};

use crate::camera::CameraParams;
use crate::error::StitchError;
use crate::features::FeatureSet;
use crate::focal::median_focal;
use crate::graph::ImageGraph;
use crate::matcher::MatchSet;

/// Initial focal shared by every camera.
///
/// Each kept pair whose homography yields both focals contributes their geometric mean.
/// With at least one estimate per tree edge the median is used, otherwise the focal falls
/// back to the mean of `width + height` over the images.
pub fn estimate_focal(features: &[FeatureSet], matches: &[MatchSet], graph: &ImageGraph) -> f64 {
    let estimates: Vec<f64> = graph
        .edges
        .iter()
        .filter_map(|e| matches[e.match_idx].homography)
        .filter_map(|h| match focals_from_homography(&h) {
            (Some(f_src), Some(f_dst)) => Some((f_src * f_dst).sqrt()),
            _ => None,
        })
        .collect();

    if estimates.len() + 1 >= graph.nodes.len() {
        if let Some(focal) = median_focal(&estimates) {
            log::debug!("Focal from {} homographies: {focal:.2}", estimates.len());
            return focal;
        }
    }

    let sum: f64 = graph
        .nodes
        .iter()
        .map(|&i| (features[i].image_size.width + features[i].image_size.height) as f64)
        .sum();
    let focal = sum / graph.nodes.len() as f64;
    log::debug!("Not enough focal estimates, falling back to {focal:.2}");
    focal
}

/// Cameras of the graph nodes, in node order.
///
/// The highest degree node is the reference with an identity rotation. The other rotations
/// are chained breadth first along the maximum spanning tree, visiting neighbours in
/// ascending image order, so the result only depends on the graph.
///
/// # Errors
///
/// [`StitchError::Optimization`] if a tree homography cannot be turned into a rotation.
pub fn initialize_cameras(
    features: &[FeatureSet],
    matches: &[MatchSet],
    graph: &ImageGraph,
) -> Result<(Vec<CameraParams>, usize), StitchError> {
    let seed = graph
        .highest_degree_node()
        .ok_or_else(|| StitchError::Optimization("empty image graph".to_string()))?;
    let focal = estimate_focal(features, matches, graph);
    let k = intrinsic_matrix(focal, 0.0, 0.0);

    let mut adjacency: BTreeMap<usize, BTreeMap<usize, usize>> = BTreeMap::new();
    for e in graph.maximum_spanning_tree() {
        adjacency.entry(e.a).or_default().insert(e.b, e.match_idx);
        adjacency.entry(e.b).or_default().insert(e.a, e.match_idx);
    }

    let mut rotations: BTreeMap<usize, DMat3> = BTreeMap::new();
    rotations.insert(seed, DMat3::IDENTITY);
    let mut queue = VecDeque::from([seed]);

    while let Some(from) = queue.pop_front() {
        let r_from = rotations[&from];
        let Some(neighbours) = adjacency.get(&from) else {
            continue;
        };
        for (&to, &match_idx) in neighbours {
            if rotations.contains_key(&to) {
                continue;
            }
            let pair = &matches[match_idx];
            let h = pair
                .homography
                .ok_or_else(|| StitchError::Optimization("tree edge without homography".into()))?;
            let rel = relative_rotation_from_homography(&h, &k, &k).ok_or_else(|| {
                StitchError::Optimization(format!(
                    "degenerate homography between images #{} and #{}",
                    pair.src + 1,
                    pair.dst + 1
                ))
            })?;
            // rel is R_srcᵀ R_dst for the stored direction of the pair
            let r_to = if pair.src == from {
                r_from * rel
            } else {
                r_from * rel.transpose()
            };
            rotations.insert(to, r_to);
            queue.push_back(to);
        }
    }

    let cameras = graph
        .nodes
        .iter()
        .map(|i| {
            let rotation = rotations.get(i).copied().ok_or_else(|| {
                StitchError::Optimization(format!("image #{} is not reachable", i + 1))
            })?;
            let size = features[*i].image_size;
            Ok(CameraParams::new(focal, size.width, size.height, rotation))
        })
        .collect::<Result<Vec<_>, StitchError>>()?;

    Ok((cameras, seed))
}
