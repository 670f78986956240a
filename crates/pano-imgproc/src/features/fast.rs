use pano_image::{Image, ImageError};
use rayon::prelude::*;

/// Offsets of the 16 pixels of the Bresenham circle of radius 3, clockwise from the top.
const CIRCLE: [(isize, isize); 16] = [
    (0, -3),
    (1, -3),
    (2, -2),
    (3, -1),
    (3, 0),
    (3, 1),
    (2, 2),
    (1, 3),
    (0, 3),
    (-1, 3),
    (-2, 2),
    (-3, 1),
    (-3, 0),
    (-3, -1),
    (-2, -2),
    (-1, -3),
];

/// A corner detected by the FAST detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FastCorner {
    /// Column of the corner.
    pub x: usize,
    /// Row of the corner.
    pub y: usize,
    /// Sum of absolute differences beyond the threshold along the qualifying arc.
    pub score: f32,
}

/// Fast feature detector
///
/// # Arguments
///
/// * `src` - The source grayscale image.
/// * `threshold` - The intensity difference a circle pixel needs to be brighter or darker.
/// * `arc_length` - The number of consecutive circle pixels (with wrap around) that must be
///   all brighter or all darker than the center pixel.
/// * `nms` - Whether to keep only corners that are the maximum of their 3x3 neighbourhood.
///
/// # Returns
///
/// The detected corners in raster order.
pub fn fast_feature_detector(
    src: &Image<f32, 1>,
    threshold: f32,
    arc_length: usize,
    nms: bool,
) -> Result<Vec<FastCorner>, ImageError> {
    let (cols, rows) = (src.cols(), src.rows());
    if cols < 7 || rows < 7 {
        return Ok(Vec::new());
    }

    let data = src.as_slice();
    let offsets: Vec<isize> = CIRCLE
        .iter()
        .map(|&(dx, dy)| dy * cols as isize + dx)
        .collect();

    // score map, zero where there is no corner
    let mut scores = vec![0.0f32; cols * rows];
    scores
        .par_chunks_exact_mut(cols)
        .enumerate()
        .skip(3)
        .take(rows - 6)
        .for_each(|(y, row_scores)| {
            for (x, score) in row_scores.iter_mut().enumerate().take(cols - 3).skip(3) {
                let idx = (y * cols + x) as isize;
                *score = corner_score(data, idx, &offsets, threshold, arc_length);
            }
        });

    let corners = (3..rows - 3)
        .into_par_iter()
        .flat_map_iter(|y| {
            let scores = &scores;
            (3..cols - 3).filter_map(move |x| {
                let score = scores[y * cols + x];
                if score <= 0.0 {
                    return None;
                }
                if nms && !is_local_maximum(scores, cols, x, y) {
                    return None;
                }
                Some(FastCorner { x, y, score })
            })
        })
        .collect();

    Ok(corners)
}

/// Strict maximum over the earlier neighbours, non-strict over the later ones,
/// so plateaus keep exactly one corner.
fn is_local_maximum(scores: &[f32], cols: usize, x: usize, y: usize) -> bool {
    let s = scores[y * cols + x];
    for dy in -1isize..=1 {
        for dx in -1isize..=1 {
            if dx == 0 && dy == 0 {
                continue;
            }
            let n = scores[(y as isize + dy) as usize * cols + (x as isize + dx) as usize];
            let earlier = dy < 0 || (dy == 0 && dx < 0);
            if (earlier && n >= s) || (!earlier && n > s) {
                return false;
            }
        }
    }
    true
}

fn corner_score(
    data: &[f32],
    idx: isize,
    offsets: &[isize],
    threshold: f32,
    arc_length: usize,
) -> f32 {
    let center = data[idx as usize];
    let upper = center + threshold;
    let lower = center - threshold;

    let mut circle = [0.0f32; 16];
    for (c, &off) in circle.iter_mut().zip(offsets) {
        *c = data[(idx + off) as usize];
    }

    // quick rejection on the four compass points
    let bright = [0, 4, 8, 12].iter().filter(|&&i| circle[i] > upper).count();
    let dark = [0, 4, 8, 12].iter().filter(|&&i| circle[i] < lower).count();
    if arc_length >= 12 && bright < 3 && dark < 3 {
        return 0.0;
    }
    if bright < 2 && dark < 2 && arc_length >= 9 {
        return 0.0;
    }

    let is_bright = |v: f32| v > upper;
    let is_dark = |v: f32| v < lower;

    let has_arc = |pred: &dyn Fn(f32) -> bool| {
        let mut run = 0;
        for i in 0..32 {
            if pred(circle[i % 16]) {
                run += 1;
                if run >= arc_length {
                    return true;
                }
            } else {
                run = 0;
            }
        }
        false
    };

    let mut score = 0.0f32;
    if has_arc(&is_bright) {
        score = circle
            .iter()
            .filter(|&&v| is_bright(v))
            .map(|&v| v - upper)
            .sum::<f32>();
    }
    if has_arc(&is_dark) {
        let dark_score = circle
            .iter()
            .filter(|&&v| is_dark(v))
            .map(|&v| lower - v)
            .sum::<f32>();
        score = score.max(dark_score);
    }

    score
}
