//! Histogram binning.
//!
//! Automatic bin widths follow the Freedman-Diaconis rule (or Scott's
//! variant) on the interquartile range of the non-NaN values; fixed widths
//! anchor the first bin on a multiple of the bin size.

use crate::signal::{nan_min_max, quantile_sorted, sorted_non_nan};
use minflux_core::{Error, Result};
use ndarray::Array2;
use rayon::prelude::*;
use std::f64::consts::PI;

/// Width of the single bin returned for constant input.
pub const DEGENERATE_BIN_WIDTH: f64 = 1e-6;

/// Upper limit on the number of bins a specification may request.
pub const MAX_BINS: usize = 1 << 24;

const FREEDMAN_DIACONIS_FACTOR: f64 = 2.0;
const SCOTT_FACTOR: f64 = 2.59;

/// How bin widths are chosen.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BinningMode {
    /// `2 * IQR / n^(1/3)`.
    #[default]
    FreedmanDiaconis,
    /// Scott's rule, `2.59 * IQR / n^(1/3)`.
    Scott,
    /// A fixed bin width.
    Fixed(f64),
}

/// Bin edges, centers and width.
#[derive(Debug, Clone, PartialEq)]
pub struct HistogramSpec {
    /// `num_bins() + 1` ascending edges.
    pub edges: Vec<f64>,
    /// Midpoints of consecutive edges.
    pub centers: Vec<f64>,
    /// Bin width.
    pub width: f64,
}

impl HistogramSpec {
    #[allow(clippy::cast_precision_loss)]
    fn regular(first_edge: f64, width: f64, num_bins: usize) -> Self {
        let edges: Vec<f64> = (0..=num_bins)
            .map(|k| first_edge + k as f64 * width)
            .collect();
        let centers = edges.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
        Self {
            edges,
            centers,
            width,
        }
    }

    fn degenerate(value: f64) -> Self {
        let half = DEGENERATE_BIN_WIDTH / 2.0;
        Self {
            edges: vec![value - half, value + half],
            centers: vec![value],
            width: DEGENERATE_BIN_WIDTH,
        }
    }

    /// Number of bins.
    #[must_use]
    pub fn num_bins(&self) -> usize {
        self.centers.len()
    }

    /// Bin containing `value`. The last bin includes its right edge.
    #[must_use]
    pub fn bin_index(&self, value: f64) -> Option<usize> {
        bin_index(&self.edges, value)
    }
}

/// Index of the bin of `edges` containing `value`, with the last bin closed
/// on the right. `None` for NaN and out-of-range values.
fn bin_index(edges: &[f64], value: f64) -> Option<usize> {
    let (&first, &last) = (edges.first()?, edges.last()?);
    if value.is_nan() || value < first || value > last || edges.len() < 2 {
        return None;
    }
    let bins = edges.len() - 1;
    // Number of edges <= value, minus one.
    let idx = edges.partition_point(|&e| e <= value).saturating_sub(1);
    Some(idx.min(bins - 1))
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn bin_count(span: f64, width: f64) -> Result<usize> {
    let bins = (span / width).floor() + 1.0;
    if !bins.is_finite() || bins > MAX_BINS as f64 {
        return Err(Error::InvalidParameter(format!(
            "bin width {width} yields too many bins for range {span}"
        )));
    }
    Ok(bins.max(1.0) as usize)
}

/// Computes bin edges, centers and width for `values`.
///
/// NaNs are ignored. Constant input yields a single bin of width `1e-6`
/// centered on the value.
///
/// # Errors
/// Returns `EmptyInput` when `values` holds no non-NaN value and
/// `InvalidParameter` when a fixed width is not a positive number.
#[allow(clippy::cast_precision_loss, clippy::float_cmp)]
pub fn bins_for(values: &[f64], mode: BinningMode) -> Result<HistogramSpec> {
    let (min, max) = nan_min_max(values).ok_or(Error::EmptyInput)?;

    let factor = match mode {
        BinningMode::Fixed(width) => {
            if width.is_nan() || width <= 0.0 {
                return Err(Error::InvalidParameter(format!(
                    "bin size must be positive, got {width}"
                )));
            }
            let anchor = width * (min / width).floor();
            let num_bins = bin_count(max - anchor, width)?;
            return Ok(HistogramSpec::regular(anchor - width / 2.0, width, num_bins));
        }
        BinningMode::FreedmanDiaconis => FREEDMAN_DIACONIS_FACTOR,
        BinningMode::Scott => SCOTT_FACTOR,
    };

    if min == max {
        return Ok(HistogramSpec::degenerate(min));
    }

    let sorted = sorted_non_nan(values);
    let q25 = quantile_sorted(&sorted, 0.25).unwrap_or(min);
    let q75 = quantile_sorted(&sorted, 0.75).unwrap_or(max);
    let mut width = factor * (q75 - q25) / (sorted.len() as f64).cbrt();
    if width == 0.0 {
        width = 0.5 * (min + max);
    }
    if !(width.is_finite() && width > 0.0) {
        width = max - min;
    }

    let num_bins = bin_count(max - min, width)?;
    Ok(HistogramSpec::regular(min - width / 2.0, width, num_bins))
}

/// Counts `values` into the bins of `spec`.
///
/// Values outside the edges and NaNs are not counted. With `normalize`,
/// counts are divided by their sum (left as zeros when nothing was counted).
#[must_use]
pub fn histogram(values: &[f64], spec: &HistogramSpec, normalize: bool) -> Vec<f64> {
    let mut counts = vec![0.0; spec.num_bins()];
    for &v in values {
        if let Some(i) = spec.bin_index(v) {
            counts[i] += 1.0;
        }
    }
    if normalize {
        let total: f64 = counts.iter().sum();
        if total > 0.0 {
            counts.iter_mut().for_each(|c| *c /= total);
        }
    }
    counts
}

/// Computes the bins for `values` and counts them.
///
/// # Errors
/// Same as [`bins_for`].
pub fn prepare_histogram(
    values: &[f64],
    mode: BinningMode,
    normalize: bool,
) -> Result<(Vec<f64>, HistogramSpec)> {
    let spec = bins_for(values, mode)?;
    let counts = histogram(values, &spec, normalize);
    Ok((counts, spec))
}

/// Two-dimensional histogram of `(x, y)` pairs.
///
/// The result has one row per y bin and one column per x bin. Pairs with a
/// NaN or out-of-range coordinate are skipped.
///
/// # Errors
/// Returns `LengthMismatch` when `x` and `y` differ in length and
/// `InvalidParameter` when either edge list has fewer than two entries.
pub fn histogram_2d(x: &[f64], y: &[f64], x_edges: &[f64], y_edges: &[f64]) -> Result<Array2<f64>> {
    if x.len() != y.len() {
        return Err(Error::LengthMismatch {
            expected: x.len(),
            actual: y.len(),
        });
    }
    if x_edges.len() < 2 || y_edges.len() < 2 {
        return Err(Error::InvalidParameter(
            "histogram edges need at least two entries".into(),
        ));
    }
    let mut counts = Array2::<f64>::zeros((y_edges.len() - 1, x_edges.len() - 1));
    for (&xv, &yv) in x.iter().zip(y) {
        if let (Some(col), Some(row)) = (bin_index(x_edges, xv), bin_index(y_edges, yv)) {
            counts[[row, col]] += 1.0;
        }
    }
    Ok(counts)
}

/// Gaussian kernel density estimate of `(x, y)` evaluated at bin centers.
///
/// The kernel covariance is the sample covariance of the points scaled by
/// Scott's factor `n^(-1/6)`. Missing edges are computed with [`bins_for`]
/// and `mode`. Pairs with a NaN coordinate are dropped. The result has one
/// row per y bin and one column per x bin, like [`histogram_2d`].
///
/// # Errors
/// Returns `LengthMismatch` when `x` and `y` differ in length, `EmptyInput`
/// when fewer than three pairs remain, and `InvalidParameter` for edge lists
/// shorter than two entries or points whose covariance is singular.
#[allow(clippy::cast_precision_loss, clippy::many_single_char_names)]
pub fn density_map(
    x: &[f64],
    y: &[f64],
    x_edges: Option<&[f64]>,
    y_edges: Option<&[f64]>,
    mode: BinningMode,
) -> Result<Array2<f64>> {
    if x.len() != y.len() {
        return Err(Error::LengthMismatch {
            expected: x.len(),
            actual: y.len(),
        });
    }
    let points: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(a, b)| !a.is_nan() && !b.is_nan())
        .map(|(&a, &b)| (a, b))
        .collect();
    if points.len() < 3 {
        return Err(Error::EmptyInput);
    }

    let centers = |values: &[f64], edges: Option<&[f64]>| -> Result<Vec<f64>> {
        let edges = match edges {
            Some(e) => e.to_vec(),
            None => bins_for(values, mode)?.edges,
        };
        if edges.len() < 2 {
            return Err(Error::InvalidParameter(
                "density map edges need at least two entries".into(),
            ));
        }
        Ok(edges.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect())
    };
    let xc = centers(x, x_edges)?;
    let yc = centers(y, y_edges)?;

    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for &(a, b) in &points {
        sxx += (a - mx) * (a - mx);
        syy += (b - my) * (b - my);
        sxy += (a - mx) * (b - my);
    }
    let factor2 = n.powf(-1.0 / 3.0);
    let (a, d, b) = (
        sxx / (n - 1.0) * factor2,
        syy / (n - 1.0) * factor2,
        sxy / (n - 1.0) * factor2,
    );
    let det = a * d - b * b;
    if !(det.is_finite() && det > 0.0) {
        return Err(Error::InvalidParameter(
            "density map points have a singular covariance".into(),
        ));
    }
    // Inverse of [[a, b], [b, d]].
    let (ia, id, ib) = (d / det, a / det, -b / det);
    let norm = 1.0 / (2.0 * PI * det.sqrt() * n);

    let values: Vec<f64> = yc
        .par_iter()
        .flat_map_iter(|&gy| {
            let points = &points;
            xc.iter().map(move |&gx| {
                points
                    .iter()
                    .map(|&(px, py)| {
                        let (dx, dy) = (gx - px, gy - py);
                        (-0.5 * (ia * dx * dx + 2.0 * ib * dx * dy + id * dy * dy)).exp()
                    })
                    .sum::<f64>()
                    * norm
            })
        })
        .collect();
    Array2::from_shape_vec((yc.len(), xc.len()), values)
        .map_err(|e| Error::InvalidParameter(e.to_string()))
}
