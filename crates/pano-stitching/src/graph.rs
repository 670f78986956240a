//! Image connectivity from the verified pairs.

use std::cmp::Ordering;

use crate::config::GraphConfig;
use crate::error::{DropReason, StitchError};
use crate::features::FeatureSet;
use crate::matcher::MatchSet;

/// Disjoint sets over image indices with path halving and union by size.
#[derive(Debug, Clone)]
pub struct DisjointSets {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl DisjointSets {
    /// `n` singleton sets.
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    /// Representative of the set containing `x`.
    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    /// Merge the sets of `a` and `b`, returns false if they were already merged.
    pub fn union(&mut self, a: usize, b: usize) -> bool {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return false;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
        true
    }

    /// Number of elements in the set containing `x`.
    pub fn set_size(&mut self, x: usize) -> usize {
        let root = self.find(x);
        self.size[root]
    }
}

/// A kept pair of images.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    /// Smaller image index.
    pub a: usize,
    /// Larger image index.
    pub b: usize,
    /// Pair confidence.
    pub confidence: f64,
    /// Position of the pair in the match list.
    pub match_idx: usize,
}

/// Images of the largest connected component and the pairs linking them.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageGraph {
    /// Image indices, ascending.
    pub nodes: Vec<usize>,
    /// Kept pairs between the nodes, in match list order.
    pub edges: Vec<Edge>,
}

impl ImageGraph {
    /// Number of kept pairs touching `node`.
    pub fn degree(&self, node: usize) -> usize {
        self.edges
            .iter()
            .filter(|e| e.a == node || e.b == node)
            .count()
    }

    /// Node with the most kept pairs, the smallest index on ties.
    pub fn highest_degree_node(&self) -> Option<usize> {
        let mut best: Option<(usize, usize)> = None;
        for &node in &self.nodes {
            let degree = self.degree(node);
            if best.map_or(true, |(_, d)| degree > d) {
                best = Some((node, degree));
            }
        }
        best.map(|(node, _)| node)
    }

    /// Maximum spanning tree over the pair confidences (Kruskal).
    ///
    /// Ties are broken by the position of the pair in the match list.
    pub fn maximum_spanning_tree(&self) -> Vec<Edge> {
        let mut sorted = self.edges.clone();
        sorted.sort_by(|x, y| {
            y.confidence
                .partial_cmp(&x.confidence)
                .unwrap_or(Ordering::Equal)
                .then(x.match_idx.cmp(&y.match_idx))
        });

        let num_images = self.nodes.iter().max().map_or(0, |&n| n + 1);
        let mut sets = DisjointSets::new(num_images);
        sorted
            .into_iter()
            .filter(|e| sets.union(e.a, e.b))
            .collect()
    }

    /// Keep only the spanning tree edges.
    pub fn prune_to_spanning_tree(&mut self) {
        let mut tree = self.maximum_spanning_tree();
        tree.sort_by_key(|e| e.match_idx);
        self.edges = tree;
    }
}

/// Build the graph of the largest connected component.
///
/// A pair becomes an edge when its confidence reaches `config.confidence_threshold` and it
/// has at least `config.min_inliers` inliers. Images outside the largest component are
/// returned with the reason they were dropped. On equal sizes the component holding the
/// smallest image index wins.
///
/// # Errors
///
/// [`StitchError::InsufficientOverlap`] if the largest component has fewer than two images.
pub fn build_image_graph(
    features: &[FeatureSet],
    matches: &[MatchSet],
    config: &GraphConfig,
) -> Result<(ImageGraph, Vec<(usize, DropReason)>), StitchError> {
    let num_images = features.len();
    let mut sets = DisjointSets::new(num_images);

    let edges: Vec<Edge> = matches
        .iter()
        .enumerate()
        .filter(|(_, m)| {
            m.homography.is_some()
                && m.confidence >= config.confidence_threshold
                && m.num_inliers >= config.min_inliers
        })
        .map(|(idx, m)| Edge {
            a: m.src.min(m.dst),
            b: m.src.max(m.dst),
            confidence: m.confidence,
            match_idx: idx,
        })
        .collect();

    for e in &edges {
        sets.union(e.a, e.b);
    }

    let mut best_root = None;
    let mut best_size = 0;
    for i in 0..num_images {
        let size = sets.set_size(i);
        if size > best_size {
            best_size = size;
            best_root = Some(sets.find(i));
        }
    }

    let mut nodes = Vec::new();
    let mut dropped = Vec::new();
    for (i, set) in features.iter().enumerate() {
        if best_size >= 2 && Some(sets.find(i)) == best_root {
            nodes.push(i);
        } else if set.is_empty() {
            dropped.push((i, DropReason::NoFeatures));
        } else {
            dropped.push((i, DropReason::NotConnected));
        }
    }

    if nodes.len() < 2 {
        return Err(StitchError::InsufficientOverlap {
            component_size: best_size.min(num_images),
        });
    }

    let edges = edges
        .into_iter()
        .filter(|e| nodes.binary_search(&e.a).is_ok())
        .collect();

    Ok((ImageGraph { nodes, edges }, dropped))
}
