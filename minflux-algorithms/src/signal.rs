//! Numeric helpers shared by the statistics, rendering and FRC modules.
//!
//! Quantiles follow linear interpolation between closest ranks. The
//! Savitzky-Golay filter fits polynomials to the first and last windows at
//! the edges instead of padding the signal.

use ndarray::{Array2, Axis};
use num_complex::Complex64;

/// Returns the non-NaN values of `values`, sorted ascending.
#[must_use]
pub fn sorted_non_nan(values: &[f64]) -> Vec<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    sorted.sort_unstable_by(f64::total_cmp);
    sorted
}

/// Linear-interpolated quantile of an ascending slice.
///
/// Returns `None` for an empty slice. `q` is clamped to `[0, 1]`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn quantile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    let last = sorted.len().checked_sub(1)?;
    let position = q.clamp(0.0, 1.0) * last as f64;
    let lo = position.floor() as usize;
    let hi = (lo + 1).min(last);
    let fraction = position - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * fraction)
}

/// Quantile of `values`, ignoring NaNs.
#[must_use]
pub fn nan_quantile(values: &[f64], q: f64) -> Option<f64> {
    quantile_sorted(&sorted_non_nan(values), q)
}

/// Median of `values`, ignoring NaNs.
#[must_use]
pub fn nan_median(values: &[f64]) -> Option<f64> {
    nan_quantile(values, 0.5)
}

/// Minimum and maximum of the non-NaN values.
#[must_use]
pub fn nan_min_max(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Symmetric Gaussian window of `len` samples with standard deviation `std`
/// (in samples), peaking at 1.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn gaussian_window(len: usize, std: f64) -> Vec<f64> {
    let center = (len as f64 - 1.0) / 2.0;
    (0..len)
        .map(|n| {
            let t = (n as f64 - center) / std;
            (-0.5 * t * t).exp()
        })
        .collect()
}

/// Convolves `data` with the separable kernel `outer(kernel, kernel)`,
/// returning an array of the input's shape (zero padding, centered).
#[must_use]
pub fn convolve_same_separable(data: &Array2<Complex64>, kernel: &[f64]) -> Array2<Complex64> {
    let along_rows = convolve_axis(data, kernel, Axis(0));
    convolve_axis(&along_rows, kernel, Axis(1))
}

#[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
fn convolve_axis(data: &Array2<Complex64>, kernel: &[f64], axis: Axis) -> Array2<Complex64> {
    let mut out = Array2::<Complex64>::zeros(data.raw_dim());
    let half = (kernel.len() / 2) as isize;
    let n = data.len_of(axis) as isize;
    for (src, mut dst) in data.lanes(axis).into_iter().zip(out.lanes_mut(axis)) {
        for i in 0..n {
            let mut acc = Complex64::new(0.0, 0.0);
            for (j, &k) in kernel.iter().enumerate() {
                let idx = i + half - j as isize;
                if (0..n).contains(&idx) {
                    acc += src[idx as usize] * k;
                }
            }
            dst[i as usize] = acc;
        }
    }
    out
}

/// Least-squares polynomial of degree `order` through `(x, y)`, evaluated
/// at each point of `at`.
#[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
fn polyfit_eval(x: &[f64], y: &[f64], order: usize, at: &[f64]) -> Vec<f64> {
    let terms = order + 1;
    let mut normal = vec![vec![0.0; terms + 1]; terms];
    for (&xi, &yi) in x.iter().zip(y) {
        for r in 0..terms {
            let xr = xi.powi(r as i32);
            for c in 0..terms {
                normal[r][c] += xr * xi.powi(c as i32);
            }
            normal[r][terms] += xr * yi;
        }
    }

    // Gauss-Jordan with partial pivoting on the augmented normal matrix.
    for col in 0..terms {
        let pivot = (col..terms)
            .max_by(|&a, &b| normal[a][col].abs().total_cmp(&normal[b][col].abs()))
            .unwrap_or(col);
        normal.swap(col, pivot);
        let p = normal[col][col];
        if p.abs() < f64::EPSILON {
            continue;
        }
        for c in col..=terms {
            normal[col][c] /= p;
        }
        for r in 0..terms {
            if r != col {
                let factor = normal[r][col];
                for c in col..=terms {
                    normal[r][c] -= factor * normal[col][c];
                }
            }
        }
    }
    let coeffs: Vec<f64> = normal.iter().map(|row| row[terms]).collect();

    at.iter()
        .map(|&t| {
            coeffs
                .iter()
                .rev()
                .fold(0.0, |acc: f64, &c| acc.mul_add(t, c))
        })
        .collect()
}

/// Savitzky-Golay smoothing.
///
/// Interior samples take the value at the window center of a local
/// least-squares polynomial. The first and last `window / 2` samples are
/// evaluated from the polynomial fitted to the first and last full window.
/// Signals shorter than `window` use the largest odd window that fits, and
/// are returned unchanged when no window larger than `order` fits.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn savgol_filter(signal: &[f64], window: usize, order: usize) -> Vec<f64> {
    let n = signal.len();
    let mut window = window.min(n);
    if window % 2 == 0 {
        window = window.saturating_sub(1);
    }
    if window <= order {
        return signal.to_vec();
    }
    let half = window / 2;
    let offsets: Vec<f64> = (0..window).map(|k| k as f64 - half as f64).collect();
    let mut out = vec![0.0; n];

    for i in half..n - half {
        out[i] = polyfit_eval(&offsets, &signal[i - half..=i + half], order, &[0.0])[0];
    }

    let head = polyfit_eval(&offsets, &signal[..window], order, &offsets[..half]);
    out[..half].copy_from_slice(&head);
    let tail = polyfit_eval(&offsets, &signal[n - window..], order, &offsets[window - half..]);
    out[n - half..].copy_from_slice(&tail);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_quantile_interpolates() {
        let v = [1.0, 2.0, 3.0, 4.0];
        assert_relative_eq!(quantile_sorted(&v, 0.25).unwrap(), 1.75);
        assert_relative_eq!(quantile_sorted(&v, 0.5).unwrap(), 2.5);
        assert_relative_eq!(quantile_sorted(&v, 1.0).unwrap(), 4.0);
        assert!(quantile_sorted(&[], 0.5).is_none());
    }

    #[test]
    fn test_nan_median_skips_nan() {
        assert_relative_eq!(nan_median(&[f64::NAN, 3.0, 1.0, 2.0]).unwrap(), 2.0);
        assert!(nan_median(&[f64::NAN]).is_none());
        assert_eq!(nan_min_max(&[2.0, f64::NAN, -1.0]), Some((-1.0, 2.0)));
    }

    #[test]
    fn test_gaussian_window_peak() {
        let w = gaussian_window(31, 1.0);
        assert_eq!(w.len(), 31);
        assert_relative_eq!(w[15], 1.0);
        assert_relative_eq!(w[14], w[16]);
        assert_relative_eq!(w[16], (-0.5f64).exp());
    }

    #[test]
    fn test_savgol_preserves_lines() {
        let line: Vec<f64> = (0..12).map(|i| 2.0 * f64::from(i) + 1.0).collect();
        let smoothed = savgol_filter(&line, 7, 1);
        for (a, b) in line.iter().zip(&smoothed) {
            assert_relative_eq!(a, b, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_savgol_averages_interior() {
        let signal = [0.0, 0.0, 0.0, 7.0, 0.0, 0.0, 0.0];
        let smoothed = savgol_filter(&signal, 7, 1);
        assert_relative_eq!(smoothed[3], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_savgol_short_signal() {
        assert_eq!(savgol_filter(&[1.0, 2.0], 7, 1), vec![1.0, 2.0]);
        assert_eq!(savgol_filter(&[1.0, 5.0, 3.0], 7, 1).len(), 3);
    }

    #[test]
    fn test_convolve_impulse() {
        let mut data = Array2::<Complex64>::zeros((5, 5));
        data[[2, 2]] = Complex64::new(1.0, 0.0);
        let out = convolve_same_separable(&data, &[0.5, 1.0, 0.5]);
        assert_relative_eq!(out[[2, 2]].re, 1.0);
        assert_relative_eq!(out[[1, 2]].re, 0.5);
        assert_relative_eq!(out[[1, 1]].re, 0.25);
        assert_relative_eq!(out[[0, 0]].re, 0.0);
    }
}
