use rayon::prelude::*;

/// A correspondence between two descriptor sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DescriptorMatch {
    /// Index into the query descriptors.
    pub query: usize,
    /// Index into the train descriptors.
    pub train: usize,
    /// Hamming distance between the two descriptors.
    pub distance: u32,
}

/// Hamming distance between two fixed-size byte descriptors.
#[inline]
pub fn hamming_distance(a: &[u8], b: &[u8]) -> u32 {
    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x ^ y).count_ones())
        .sum()
}

/// Best and second best neighbour of every query descriptor.
fn two_nearest<const N: usize>(query: &[[u8; N]], train: &[[u8; N]]) -> Vec<(usize, u32, u32)> {
    query
        .par_iter()
        .map(|d1| {
            let mut best = (0usize, u32::MAX);
            let mut second = u32::MAX;
            for (j, d2) in train.iter().enumerate() {
                let dist = hamming_distance(d1, d2);
                if dist < best.1 {
                    second = best.1;
                    best = (j, dist);
                } else if dist < second {
                    second = dist;
                }
            }
            (best.0, best.1, second)
        })
        .collect()
}

/// Match binary descriptors using brute-force Hamming distance.
///
/// For each descriptor in `query`, finds the nearest neighbor in `train`.
/// Optionally filters matches by maximum distance, cross-check, and Lowe's ratio test.
///
/// # Arguments
///
/// * `query` - First set of N-byte binary descriptors.
/// * `train` - Second set of N-byte binary descriptors.
/// * `max_distance` - If set, discard matches with Hamming distance above this threshold.
/// * `cross_check` - If true, keep only mutual nearest neighbors.
/// * `max_ratio` - If set, apply Lowe's ratio test (best / second-best < ratio).
///
/// # Returns
///
/// The surviving matches ordered by query index.
pub fn match_descriptors<const N: usize>(
    query: &[[u8; N]],
    train: &[[u8; N]],
    max_distance: Option<u32>,
    cross_check: bool,
    max_ratio: Option<f32>,
) -> Vec<DescriptorMatch> {
    if query.is_empty() || train.is_empty() {
        return vec![];
    }

    let forward = two_nearest(query, train);
    let backward = if cross_check {
        Some(two_nearest(train, query))
    } else {
        None
    };

    forward
        .iter()
        .enumerate()
        .filter_map(|(i, &(j, best, second))| {
            if let Some(max_dist) = max_distance {
                if best > max_dist {
                    return None;
                }
            }

            if let Some(rev) = &backward {
                if rev[j].0 != i {
                    return None;
                }
            }

            if let Some(ratio) = max_ratio {
                if ratio < 1.0 && second != u32::MAX {
                    let denom = if second == 0 {
                        f32::EPSILON
                    } else {
                        second as f32
                    };
                    if best as f32 / denom >= ratio {
                        return None;
                    }
                }
            }

            Some(DescriptorMatch {
                query: i,
                train: j,
                distance: best,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(&[0b1010], &[0b0101]), 4);
        assert_eq!(hamming_distance(&[0xff, 0x00], &[0xff, 0x00]), 0);
    }

    #[test]
    fn test_match_descriptors_identity() {
        let d1 = [[0u8; 2], [0xffu8; 2], [0x0fu8; 2]];
        let matches = match_descriptors(&d1, &d1, None, true, None);
        assert_eq!(matches.len(), 3);
        for m in &matches {
            assert_eq!(m.query, m.train);
            assert_eq!(m.distance, 0);
        }
    }

    #[test]
    fn test_match_descriptors_ratio_rejects_ambiguous() {
        let query = [[0b0000_0001u8]];
        // two equally distant candidates
        let train = [[0b0000_0011u8], [0b0000_0101u8]];
        assert!(match_descriptors(&query, &train, None, false, Some(0.8)).is_empty());
        assert_eq!(match_descriptors(&query, &train, None, false, None).len(), 1);
    }

    #[test]
    fn test_match_descriptors_max_distance() {
        let query = [[0x00u8]];
        let train = [[0xffu8]];
        assert!(match_descriptors(&query, &train, Some(4), false, None).is_empty());
    }

    #[test]
    fn test_match_descriptors_empty() {
        let query: [[u8; 4]; 0] = [];
        assert!(match_descriptors(&query, &[[0u8; 4]], None, false, Some(0.7)).is_empty());
    }
}
