/// Median of the focal lengths, the mean of the two middle values for an even count.
///
/// Returns `None` for an empty slice.
///
/// ```
/// use pano_stitching::focal::median_focal;
///
/// assert_eq!(median_focal(&[540.0, 500.0, 520.0]), Some(520.0));
/// assert_eq!(median_focal(&[500.0, 560.0, 520.0, 540.0]), Some(530.0));
/// ```
pub fn median_focal(focals: &[f64]) -> Option<f64> {
    if focals.is_empty() {
        return None;
    }
    let mut sorted = focals.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        Some(sorted[mid])
    } else {
        Some(0.5 * (sorted[mid - 1] + sorted[mid]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_focal() {
        assert_eq!(median_focal(&[]), None);
        assert_eq!(median_focal(&[610.0]), Some(610.0));
        assert_eq!(median_focal(&[500.0, 520.0, 540.0]), Some(520.0));
        assert_eq!(median_focal(&[500.0, 520.0, 540.0, 560.0]), Some(530.0));
        assert_eq!(median_focal(&[560.0, 500.0]), Some(530.0));
    }
}
