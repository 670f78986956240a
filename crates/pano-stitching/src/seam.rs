//! Ownership of every covered panorama pixel.
//!
//! Seams are estimated on low resolution warped images and the resulting labels are
//! carried to compose resolution with [`upscale_labels`].

use std::collections::VecDeque;

use rayon::prelude::*;

use pano_image::Image;

use crate::error::StitchError;
use crate::warper::{Roi, WarpedImage};

const UNLABELED: u32 = u32::MAX;

/// Capacity tying a pixel to the image owning its neighbour outside the overlap.
const TERMINAL_CAPACITY: f64 = 1e9;
/// Capacity keeping the current label of pixels not linked to any terminal.
const PRIOR_CAPACITY: f64 = 1e-6;
/// Base cost of cutting between two pixels, favours short seams in flat areas.
const CUT_EPSILON: f64 = 1e-4;
const FLOW_EPSILON: f64 = 1e-12;

/// Owning image of every panorama pixel of a region.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelMap {
    roi: Roi,
    labels: Vec<u32>,
}

impl LabelMap {
    /// A map over `roi` without any label.
    pub fn new(roi: Roi) -> Self {
        Self {
            roi,
            labels: vec![UNLABELED; roi.width * roi.height],
        }
    }

    /// Region covered by the map.
    pub fn roi(&self) -> Roi {
        self.roi
    }

    fn offset(&self, x: i64, y: i64) -> Option<usize> {
        let (cx, cy) = (x - self.roi.x, y - self.roi.y);
        if cx < 0 || cy < 0 || cx >= self.roi.width as i64 || cy >= self.roi.height as i64 {
            return None;
        }
        Some(cy as usize * self.roi.width + cx as usize)
    }

    /// Owner of the panorama pixel `(x, y)`.
    pub fn get(&self, x: i64, y: i64) -> Option<usize> {
        let label = self.labels[self.offset(x, y)?];
        (label != UNLABELED).then_some(label as usize)
    }

    /// Set the owner of the panorama pixel `(x, y)`, ignored outside the map.
    pub fn set(&mut self, x: i64, y: i64, label: Option<usize>) {
        if let Some(idx) = self.offset(x, y) {
            self.labels[idx] = label.map_or(UNLABELED, |l| l as u32);
        }
    }

    /// Number of pixels owned by each of the first `num_images` images.
    pub fn label_counts(&self, num_images: usize) -> Vec<usize> {
        let mut counts = vec![0; num_images];
        for &label in &self.labels {
            if let Some(count) = counts.get_mut(label as usize) {
                *count += 1;
            }
        }
        counts
    }

    /// Drop the labels whose `keep` entry is false and renumber the others in order.
    pub fn retain_labels(&mut self, keep: &[bool]) {
        let mut remap = Vec::with_capacity(keep.len());
        let mut next = 0u32;
        for &k in keep {
            if k {
                remap.push(next);
                next += 1;
            } else {
                remap.push(UNLABELED);
            }
        }
        self.labels.par_iter_mut().for_each(|label| {
            if let Some(&new) = remap.get(*label as usize) {
                *label = new;
            }
        });
    }

    /// Mask over `roi` with 255 where the pixel belongs to `label`.
    pub fn mask_for(&self, label: usize, roi: &Roi) -> Result<Image<u8, 1>, StitchError> {
        let mut mask = Image::<u8, 1>::from_size_val(roi.size(), 0)?;
        for (r, row) in mask.as_slice_mut().chunks_exact_mut(roi.width.max(1)).enumerate() {
            for (c, out) in row.iter_mut().enumerate() {
                if self.get(roi.x + c as i64, roi.y + r as i64) == Some(label) {
                    *out = 255;
                }
            }
        }
        Ok(mask)
    }
}

/// True if the warped image has a source pixel at the panorama pixel `(x, y)`.
#[inline]
pub fn covers(image: &WarpedImage, x: i64, y: i64) -> bool {
    let (cx, cy) = (x - image.roi.x, y - image.roi.y);
    if cx < 0 || cy < 0 || cx >= image.roi.width as i64 || cy >= image.roi.height as i64 {
        return false;
    }
    image.mask.as_slice()[cy as usize * image.roi.width + cx as usize] > 0
}

/// Covering image with the closest center, the smallest index on ties.
fn nearest_covering(images: &[WarpedImage], x: i64, y: i64) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, image) in images.iter().enumerate() {
        if !covers(image, x, y) {
            continue;
        }
        let d = image.center_distance_sq(x, y);
        if best.map_or(true, |(_, bd)| d < bd) {
            best = Some((idx, d));
        }
    }
    best.map(|(idx, _)| idx)
}

fn fill_labels(roi: Roi, label: impl Fn(i64, i64) -> Option<usize> + Sync) -> LabelMap {
    let mut map = LabelMap::new(roi);
    map.labels
        .par_chunks_exact_mut(roi.width.max(1))
        .enumerate()
        .for_each(|(r, row)| {
            let y = roi.y + r as i64;
            for (c, out) in row.iter_mut().enumerate() {
                if let Some(l) = label(roi.x + c as i64, y) {
                    *out = l as u32;
                }
            }
        });
    map
}

/// Assigns an owner to every panorama pixel covered by at least one image.
pub trait SeamFinder: Send + Sync {
    /// Label the union of the warped images. Labels index into `images`.
    fn find(&self, images: &[WarpedImage]) -> Result<LabelMap, StitchError>;
}

/// Nearest image center ownership.
#[derive(Debug, Clone, Copy, Default)]
pub struct VoronoiSeamFinder;

impl SeamFinder for VoronoiSeamFinder {
    fn find(&self, images: &[WarpedImage]) -> Result<LabelMap, StitchError> {
        let roi = Roi::union_all(images.iter().map(|i| &i.roi))
            .ok_or_else(|| StitchError::Composition("no warped image".into()))?;
        Ok(fill_labels(roi, |x, y| nearest_covering(images, x, y)))
    }
}

/// Minimum cut seams over the color differences of every overlapping pair.
///
/// Starts from the Voronoi labels and, pair by pair, relabels the pixels owned by either
/// image inside their overlap with an s-t minimum cut. Pixels bordering an area owned by
/// one of the two images are tied to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphCutSeamFinder {
    /// Weight of the gradient term, zero for a pure color cost.
    pub gradient_weight: f32,
}

impl GraphCutSeamFinder {
    /// Create a finder with the given gradient weight.
    pub fn new(gradient_weight: f32) -> Self {
        Self { gradient_weight }
    }

    fn pixel(image: &WarpedImage, x: i64, y: i64) -> [f32; 3] {
        let cx = (x - image.roi.x) as usize;
        let cy = (y - image.roi.y) as usize;
        let idx = 3 * (cy * image.roi.width + cx);
        let data = image.image.as_slice();
        [data[idx], data[idx + 1], data[idx + 2]]
    }

    fn gradient(image: &WarpedImage, x: i64, y: i64) -> f64 {
        let luma = |p: [f32; 3]| (p[0] + p[1] + p[2]) as f64 / 3.0;
        let center = luma(Self::pixel(image, x, y));
        let mut g = 0.0;
        for (nx, ny) in [(x + 1, y), (x, y + 1)] {
            if covers(image, nx, ny) {
                g += (luma(Self::pixel(image, nx, ny)) - center).abs();
            }
        }
        g / 255.0
    }

    fn color_difference(a: &WarpedImage, b: &WarpedImage, x: i64, y: i64) -> f64 {
        let (pa, pb) = (Self::pixel(a, x, y), Self::pixel(b, x, y));
        let sq: f32 = pa.iter().zip(&pb).map(|(u, v)| (u - v) * (u - v)).sum();
        sq.sqrt() as f64 / 255.0
    }

    /// Relabel the overlap of images `i` and `j`.
    fn cut_pair(&self, images: &[WarpedImage], labels: &mut LabelMap, i: usize, j: usize) {
        let (a, b) = (&images[i], &images[j]);
        let Some(overlap) = a.roi.intersection(&b.roi) else {
            return;
        };

        // nodes are the overlap pixels currently owned by i or j
        let mut node_of = vec![usize::MAX; overlap.width * overlap.height];
        let mut pixels = Vec::new();
        for r in 0..overlap.height {
            for c in 0..overlap.width {
                let (x, y) = (overlap.x + c as i64, overlap.y + r as i64);
                let owner = labels.get(x, y);
                if covers(a, x, y) && covers(b, x, y) && (owner == Some(i) || owner == Some(j)) {
                    node_of[r * overlap.width + c] = pixels.len();
                    pixels.push((x, y));
                }
            }
        }
        if pixels.is_empty() {
            return;
        }

        let node = |x: i64, y: i64| -> Option<usize> {
            let (c, r) = (x - overlap.x, y - overlap.y);
            if c < 0 || r < 0 || c >= overlap.width as i64 || r >= overlap.height as i64 {
                return None;
            }
            let n = node_of[r as usize * overlap.width + c as usize];
            (n != usize::MAX).then_some(n)
        };

        let source = pixels.len();
        let sink = source + 1;
        let mut graph = FlowGraph::new(pixels.len() + 2);

        let pixel_cost = |x: i64, y: i64| -> f64 {
            let diff = Self::color_difference(a, b, x, y);
            if self.gradient_weight > 0.0 {
                let grad = Self::gradient(a, x, y) + Self::gradient(b, x, y);
                diff / (1.0 + self.gradient_weight as f64 * grad)
            } else {
                diff
            }
        };

        for (n, &(x, y)) in pixels.iter().enumerate() {
            let cost_p = pixel_cost(x, y);

            if labels.get(x, y) == Some(i) {
                graph.add_edge(source, n, PRIOR_CAPACITY, 0.0);
            } else {
                graph.add_edge(n, sink, PRIOR_CAPACITY, 0.0);
            }

            for (nx, ny) in [(x + 1, y), (x - 1, y), (x, y + 1), (x, y - 1)] {
                match node(nx, ny) {
                    Some(m) => {
                        // each undirected edge once
                        if m > n {
                            let cap = cost_p + pixel_cost(nx, ny) + CUT_EPSILON;
                            graph.add_edge(n, m, cap, cap);
                        }
                    }
                    None => match labels.get(nx, ny) {
                        Some(l) if l == i => graph.add_edge(source, n, TERMINAL_CAPACITY, 0.0),
                        Some(l) if l == j => graph.add_edge(n, sink, TERMINAL_CAPACITY, 0.0),
                        _ => {}
                    },
                }
            }
        }

        graph.max_flow(source, sink);
        let source_side = graph.reachable_from(source);
        for (n, &(x, y)) in pixels.iter().enumerate() {
            labels.set(x, y, Some(if source_side[n] { i } else { j }));
        }
    }
}

impl SeamFinder for GraphCutSeamFinder {
    fn find(&self, images: &[WarpedImage]) -> Result<LabelMap, StitchError> {
        let mut labels = VoronoiSeamFinder.find(images)?;
        for i in 0..images.len() {
            for j in i + 1..images.len() {
                self.cut_pair(images, &mut labels, i, j);
            }
        }
        Ok(labels)
    }
}

/// Carry low resolution labels to the compose resolution images.
///
/// `ratio` maps compose panorama coordinates to seam panorama coordinates. A pixel keeps
/// the low resolution owner when that image covers it at compose resolution; otherwise the
/// closest covering image center wins, so every covered pixel ends up owned by an image
/// covering it.
pub fn upscale_labels(
    seam_labels: &LabelMap,
    images: &[WarpedImage],
    ratio: f64,
) -> Result<LabelMap, StitchError> {
    let roi = Roi::union_all(images.iter().map(|i| &i.roi))
        .ok_or_else(|| StitchError::Composition("no warped image".into()))?;
    Ok(fill_labels(roi, |x, y| {
        let sx = ((x as f64 + 0.5) * ratio - 0.5).round() as i64;
        let sy = ((y as f64 + 0.5) * ratio - 0.5).round() as i64;
        match seam_labels.get(sx, sy) {
            Some(l) if l < images.len() && covers(&images[l], x, y) => Some(l),
            _ => nearest_covering(images, x, y),
        }
    }))
}

/// Blending mask of image `label`: its seam mask grown by one pixel, restricted to coverage.
pub fn blend_mask(
    labels: &LabelMap,
    label: usize,
    image: &WarpedImage,
) -> Result<Image<u8, 1>, StitchError> {
    let roi = image.roi;
    let seam = labels.mask_for(label, &roi)?;
    let (w, h) = (roi.width as i64, roi.height as i64);
    let mut mask = Image::<u8, 1>::from_size_val(roi.size(), 0)?;
    mask.as_slice_mut()
        .par_chunks_exact_mut(roi.width.max(1))
        .enumerate()
        .for_each(|(r, row)| {
            let r = r as i64;
            for (c, out) in row.iter_mut().enumerate() {
                let c = c as i64;
                if image.mask.as_slice()[(r * w + c) as usize] == 0 {
                    continue;
                }
                let owned = (r - 1..=r + 1).any(|y| {
                    (c - 1..=c + 1).any(|x| {
                        (0..w).contains(&x)
                            && (0..h).contains(&y)
                            && seam.as_slice()[(y * w + x) as usize] > 0
                    })
                });
                if owned {
                    *out = 255;
                }
            }
        });
    Ok(mask)
}

/// Residual graph for Dinic's maximum flow.
struct FlowGraph {
    adjacency: Vec<Vec<usize>>,
    to: Vec<usize>,
    capacity: Vec<f64>,
}

impl FlowGraph {
    fn new(num_nodes: usize) -> Self {
        Self {
            adjacency: vec![Vec::new(); num_nodes],
            to: Vec::new(),
            capacity: Vec::new(),
        }
    }

    /// Edge `u -> v` with its reverse `v -> u`, stored at consecutive indices.
    fn add_edge(&mut self, u: usize, v: usize, cap: f64, rev_cap: f64) {
        self.adjacency[u].push(self.to.len());
        self.to.push(v);
        self.capacity.push(cap);
        self.adjacency[v].push(self.to.len());
        self.to.push(u);
        self.capacity.push(rev_cap);
    }

    fn levels(&self, source: usize) -> Vec<usize> {
        let mut level = vec![usize::MAX; self.adjacency.len()];
        level[source] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(u) = queue.pop_front() {
            for &e in &self.adjacency[u] {
                let v = self.to[e];
                if self.capacity[e] > FLOW_EPSILON && level[v] == usize::MAX {
                    level[v] = level[u] + 1;
                    queue.push_back(v);
                }
            }
        }
        level
    }

    /// Push one augmenting path along the level graph, returns the pushed flow.
    fn augment(&mut self, source: usize, sink: usize, level: &[usize], next: &mut [usize]) -> f64 {
        let mut path: Vec<usize> = Vec::new();
        let mut u = source;
        loop {
            if u == sink {
                let flow = path
                    .iter()
                    .map(|&e| self.capacity[e])
                    .fold(f64::INFINITY, f64::min);
                for &e in &path {
                    self.capacity[e] -= flow;
                    self.capacity[e ^ 1] += flow;
                }
                return flow;
            }

            let mut advanced = false;
            while next[u] < self.adjacency[u].len() {
                let e = self.adjacency[u][next[u]];
                let v = self.to[e];
                if self.capacity[e] > FLOW_EPSILON && level[v] == level[u].wrapping_add(1) {
                    path.push(e);
                    u = v;
                    advanced = true;
                    break;
                }
                next[u] += 1;
            }

            if !advanced {
                // dead end, retreat and skip the edge that led here
                let Some(e) = path.pop() else {
                    return 0.0;
                };
                u = self.to[e ^ 1];
                next[u] += 1;
            }
        }
    }

    fn max_flow(&mut self, source: usize, sink: usize) -> f64 {
        let mut total = 0.0;
        loop {
            let level = self.levels(source);
            if level[sink] == usize::MAX {
                return total;
            }
            let mut next = vec![0; self.adjacency.len()];
            loop {
                let flow = self.augment(source, sink, &level, &mut next);
                if flow <= 0.0 {
                    break;
                }
                total += flow;
            }
        }
    }

    /// Nodes reachable from `source` in the residual graph.
    fn reachable_from(&self, source: usize) -> Vec<bool> {
        self.levels(source)
            .into_iter()
            .map(|l| l != usize::MAX)
            .collect()
    }
}
