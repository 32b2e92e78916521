//! Robust statistics and peak detection.
//!
//! Thresholds are derived from the median and the scaled median absolute
//! deviation, so a few outliers do not move them. Peak detection works on
//! histogram counts: maxima and minima are found with a topographic
//! prominence criterion after median filtering.

use crate::signal::{nan_min_max, quantile_sorted, sorted_non_nan};
use minflux_core::{Error, Result};

/// Ratio between the MAD and the standard deviation of a normal
/// distribution.
pub const MAD_TO_STD: f64 = 0.67449;

/// Median-centered threshold band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RobustThreshold {
    /// `median + factor * scaled_mad`.
    pub upper: f64,
    /// `median - factor * scaled_mad`.
    pub lower: f64,
    /// Median of the non-NaN values.
    pub median: f64,
    /// Median absolute deviation divided by [`MAD_TO_STD`].
    pub scaled_mad: f64,
}

/// Median/MAD threshold of `values` at `factor` scaled MADs.
///
/// NaNs are dropped first; returns `None` if nothing remains.
#[must_use]
pub fn robust_threshold(values: &[f64], factor: f64) -> Option<RobustThreshold> {
    let sorted = sorted_non_nan(values);
    let median = quantile_sorted(&sorted, 0.5)?;
    let deviations = sorted_non_nan(&sorted.iter().map(|v| (v - median).abs()).collect::<Vec<_>>());
    let scaled_mad = quantile_sorted(&deviations, 0.5)? / MAD_TO_STD;
    Some(RobustThreshold {
        upper: median + factor * scaled_mad,
        lower: median - factor * scaled_mad,
        median,
        scaled_mad,
    })
}

/// Maps any index onto `0..len` by mirroring about the array ends,
/// repeating the edge sample (`d c b a | a b c d | d c b a`).
#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn reflect(index: isize, len: usize) -> usize {
    let len = len as isize;
    let period = 2 * len;
    let m = index.rem_euclid(period);
    (if m < len { m } else { period - 1 - m }) as usize
}

/// Running median over `support` samples with mirrored boundaries.
///
/// For an even `support` the upper of the two middle values is taken.
/// A `support` of 0 or 1 returns the signal unchanged.
#[must_use]
#[allow(clippy::cast_possible_wrap)]
pub fn median_filter(signal: &[f64], support: usize) -> Vec<f64> {
    if support <= 1 || signal.is_empty() {
        return signal.to_vec();
    }
    let origin = (support / 2) as isize;
    let mut window = Vec::with_capacity(support);
    (0..signal.len())
        .map(|i| {
            window.clear();
            let start = i as isize - origin;
            window.extend((0..support).map(|j| signal[reflect(start + j as isize, signal.len())]));
            window.sort_unstable_by(f64::total_cmp);
            window[support / 2]
        })
        .collect()
}

/// Local maxima of `signal` with a topographic prominence of at least
/// `min_prominence`, in ascending index order.
///
/// A flat top counts as one maximum, reported at its middle sample
/// (rounded down). The first and last samples are never maxima.
#[must_use]
pub fn find_peaks(signal: &[f64], min_prominence: f64) -> Vec<usize> {
    local_maxima(signal)
        .into_iter()
        .filter(|&p| prominence(signal, p) >= min_prominence)
        .collect()
}

fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut peaks = Vec::new();
    if x.len() < 3 {
        return peaks;
    }
    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    peaks
}

/// Height of `peak` above the higher of the lowest points reachable on
/// each side before meeting a higher sample.
fn prominence(x: &[f64], peak: usize) -> f64 {
    let height = x[peak];
    let left_min = x[..=peak]
        .iter()
        .rev()
        .take_while(|&&v| v <= height)
        .fold(height, |m, &v| m.min(v));
    let right_min = x[peak..]
        .iter()
        .take_while(|&&v| v <= height)
        .fold(height, |m, &v| m.min(v));
    height - left_min.max(right_min)
}

fn check_lengths(counts: &[f64], bins: &[f64]) -> Result<()> {
    if counts.is_empty() {
        return Err(Error::EmptyInput);
    }
    if counts.len() != bins.len() {
        return Err(Error::LengthMismatch {
            expected: counts.len(),
            actual: bins.len(),
        });
    }
    Ok(())
}

/// Bounds of the first peak of a histogram.
///
/// `counts` are median filtered with `median_filter_support`, then maxima
/// and minima (maxima of the inverted signal) with prominence at least
/// `min_relative_prominence` times the filtered range are located. The
/// first maximum is bounded by the nearest minimum on each side, or by the
/// first/last bin where there is none.
///
/// Returns `Ok(None)` when no maximum qualifies and the full bin range
/// when there are maxima but no minima.
///
/// # Errors
/// Returns `EmptyInput` for empty counts and `LengthMismatch` when
/// `counts` and `bins` differ in length.
pub fn first_peak_bounds(
    counts: &[f64],
    bins: &[f64],
    min_relative_prominence: f64,
    median_filter_support: usize,
) -> Result<Option<(f64, f64)>> {
    check_lengths(counts, bins)?;
    let filtered = median_filter(counts, median_filter_support);
    let Some((min, max)) = nan_min_max(&filtered) else {
        return Ok(None);
    };
    let min_prominence = min_relative_prominence * (max - min);

    let peaks = find_peaks(&filtered, min_prominence);
    let Some(&first) = peaks.first() else {
        return Ok(None);
    };

    let inverted: Vec<f64> = filtered.iter().map(|v| max - v).collect();
    let minima = find_peaks(&inverted, min_prominence);
    let (first_bin, last_bin) = (bins[0], bins[bins.len() - 1]);
    if minima.is_empty() {
        return Ok(Some((first_bin, last_bin)));
    }

    let lower = minima
        .iter()
        .rev()
        .find(|&&m| m < first)
        .map_or(first_bin, |&m| bins[m]);
    let upper = minima
        .iter()
        .find(|&&m| m > first)
        .map_or(last_bin, |&m| bins[m]);
    Ok(Some((lower, upper)))
}

/// The local minimum of `counts` closest to `expected`.
///
/// Minima must have a prominence of at least 5% of the count range.
/// Returns `Ok(None)` when there is no such minimum.
///
/// # Errors
/// Returns `EmptyInput` for empty counts and `LengthMismatch` when
/// `counts` and `bins` differ in length.
pub fn find_cutoff_near_value(counts: &[f64], bins: &[f64], expected: f64) -> Result<Option<f64>> {
    check_lengths(counts, bins)?;
    let Some((min, max)) = nan_min_max(counts) else {
        return Ok(None);
    };
    let inverted: Vec<f64> = counts.iter().map(|v| max - v).collect();
    let minima = find_peaks(&inverted, 0.05 * (max - min));
    Ok(minima
        .into_iter()
        .map(|m| bins[m])
        .min_by(|a, b| (a - expected).abs().total_cmp(&(b - expected).abs())))
}

/// Per-axis display ranges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalizationBounds {
    /// x range.
    pub x: (f64, f64),
    /// y range.
    pub y: (f64, f64),
    /// z range; `(0, 0)`-like for 2D data.
    pub z: (f64, f64),
}

fn widen(range: (f64, f64), min_range: f64) -> (f64, f64) {
    if range.1 - range.0 >= min_range {
        return range;
    }
    let center = 0.5 * (range.0 + range.1);
    (center - min_range / 2.0, center + min_range / 2.0)
}

/// Ranges covering the `[alpha, 1 - alpha]` quantiles of each axis,
/// widened symmetrically to at least `min_range`.
///
/// The z range is only widened when it spans more than `1e-6` (3D data).
///
/// # Errors
/// Returns `InvalidParameter` unless `0 <= alpha < 0.5`, and `EmptyInput`
/// when an axis has no non-NaN values.
pub fn localization_boundaries(
    x: &[f64],
    y: &[f64],
    z: &[f64],
    alpha: f64,
    min_range: f64,
) -> Result<LocalizationBounds> {
    if !(0.0..0.5).contains(&alpha) {
        return Err(Error::InvalidParameter(format!(
            "alpha must be in [0, 0.5), got {alpha}"
        )));
    }
    let quantiles = |values: &[f64]| -> Result<(f64, f64)> {
        let sorted = sorted_non_nan(values);
        let lo = quantile_sorted(&sorted, alpha).ok_or(Error::EmptyInput)?;
        let hi = quantile_sorted(&sorted, 1.0 - alpha).ok_or(Error::EmptyInput)?;
        Ok((lo, hi))
    };

    let rz = quantiles(z)?;
    Ok(LocalizationBounds {
        x: widen(quantiles(x)?, min_range),
        y: widen(quantiles(y)?, min_range),
        z: if rz.1 - rz.0 > 1e-6 {
            widen(rz, min_range)
        } else {
            rz
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_robust_threshold_ignores_outlier() {
        let t = robust_threshold(&[1.0, 2.0, 3.0, 4.0, 5.0, 100.0], 2.0).unwrap();
        assert_relative_eq!(t.median, 3.5);
        // |v - 3.5| = 2.5, 1.5, 0.5, 0.5, 1.5, 96.5 -> median 1.5
        assert_relative_eq!(t.scaled_mad, 1.5 / MAD_TO_STD);
        assert_relative_eq!(t.upper, 3.5 + 3.0 / MAD_TO_STD);
        assert_relative_eq!(t.lower, 3.5 - 3.0 / MAD_TO_STD);
    }

    #[test]
    fn test_robust_threshold_empty() {
        assert!(robust_threshold(&[], 2.0).is_none());
        assert!(robust_threshold(&[f64::NAN, f64::NAN], 2.0).is_none());
    }

    #[test]
    fn test_reflect_indices() {
        let mapped: Vec<usize> = (-3..7).map(|i| reflect(i, 4)).collect();
        assert_eq!(mapped, vec![2, 1, 0, 0, 1, 2, 3, 3, 2, 1]);
    }

    #[test]
    fn test_median_filter_removes_spike() {
        let filtered = median_filter(&[1.0, 1.0, 9.0, 1.0, 1.0], 3);
        assert_eq!(filtered, vec![1.0; 5]);
        assert_eq!(median_filter(&[3.0, 1.0, 2.0], 1), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_median_filter_boundaries() {
        // Windows: [1,1,2], [1,2,3], [2,3,3]
        assert_eq!(median_filter(&[1.0, 2.0, 3.0], 3), vec![1.0, 2.0, 3.0]);
        // Even support picks the upper middle value.
        assert_eq!(median_filter(&[1.0, 4.0, 2.0, 3.0], 2), vec![1.0, 4.0, 4.0, 3.0]);
    }

    #[test]
    fn test_find_peaks_plateau_and_edges() {
        let x = [5.0, 1.0, 3.0, 3.0, 3.0, 1.0, 2.0, 0.0, 4.0];
        assert_eq!(find_peaks(&x, 0.0), vec![3, 6]);
        assert_eq!(find_peaks(&x, 1.5), vec![3]);
    }

    #[test]
    fn test_prominence_uses_higher_base() {
        let x = [0.0, 4.0, 1.0, 6.0, 2.0, 3.0, 0.0];
        assert_relative_eq!(prominence(&x, 1), 3.0);
        assert_relative_eq!(prominence(&x, 3), 6.0);
        assert_relative_eq!(prominence(&x, 5), 1.0);
    }

    #[test]
    fn test_first_peak_bounds() {
        let counts = [0.0, 2.0, 8.0, 3.0, 1.0, 4.0, 6.0, 2.0, 0.0];
        let bins: Vec<f64> = (0..9).map(|i| f64::from(i) * 10.0).collect();
        let bounds = first_peak_bounds(&counts, &bins, 0.1, 1).unwrap();
        assert_eq!(bounds, Some((0.0, 40.0)));
    }

    #[test]
    fn test_first_peak_bounds_without_minima() {
        let counts = [0.0, 2.0, 5.0, 2.0, 0.0];
        let bins = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert_eq!(
            first_peak_bounds(&counts, &bins, 0.1, 1).unwrap(),
            Some((1.0, 5.0))
        );
    }

    #[test]
    fn test_first_peak_bounds_errors() {
        assert_eq!(first_peak_bounds(&[], &[], 0.1, 3), Err(Error::EmptyInput));
        assert!(matches!(
            first_peak_bounds(&[1.0, 2.0], &[1.0], 0.1, 3),
            Err(Error::LengthMismatch { .. })
        ));
    }

    #[test]
    fn test_cutoff_near_value() {
        let counts = [9.0, 3.0, 8.0, 7.0, 1.0, 6.0, 5.0];
        let bins = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert_eq!(find_cutoff_near_value(&counts, &bins, 0.5).unwrap(), Some(1.0));
        assert_eq!(find_cutoff_near_value(&counts, &bins, 5.0).unwrap(), Some(4.0));
        assert_eq!(
            find_cutoff_near_value(&[1.0, 2.0, 3.0], &[0.0, 1.0, 2.0], 1.0).unwrap(),
            None
        );
    }

    #[test]
    fn test_localization_boundaries() {
        let x: Vec<f64> = (0..=100).map(f64::from).collect();
        let y = vec![50.0; 101];
        let z = vec![0.0; 101];
        let b = localization_boundaries(&x, &y, &z, 0.1, 20.0).unwrap();
        assert_relative_eq!(b.x.0, 10.0);
        assert_relative_eq!(b.x.1, 90.0);
        assert_relative_eq!(b.y.0, 40.0);
        assert_relative_eq!(b.y.1, 60.0);
        assert_eq!(b.z, (0.0, 0.0));

        assert!(matches!(
            localization_boundaries(&x, &y, &z, 0.5, 20.0),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            localization_boundaries(&x, &y, &z, -0.1, 20.0),
            Err(Error::InvalidParameter(_))
        ));
    }
}
