//! Fourier ring correlation (FRC) resolution estimation.
//!
//! The localizations are split at random into two halves, each half is
//! rendered on the same grid, and the normalized cross-correlation of the
//! two spectra is averaged over rings of constant spatial frequency. The
//! resolution is the inverse of the frequency at which the smoothed curve
//! first drops below 1/7.

use crate::render::{render_xy, Extent2D, RenderMode};
use crate::signal::{convolve_same_separable, gaussian_window, savgol_filter};
use minflux_core::{Error, Result};
use ndarray::{Array2, Axis};
use num_complex::Complex64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

/// Correlation level that defines the resolution.
pub const FRC_THRESHOLD: f64 = 1.0 / 7.0;

/// Default number of sub-bins per frequency step.
pub const DEFAULT_FRC_BIN_SIZE: f64 = 11.0;

/// Length of the default spectrum smoothing window.
pub const SMOOTHING_KERNEL_SIZE: usize = 31;

/// Share of the frequency axis kept; the top end is dominated by
/// smoothing artifacts.
const FREQUENCY_CUTOFF: f64 = 0.8;

const SAVGOL_WINDOW: usize = 7;
const SAVGOL_ORDER: usize = 1;

/// One factor of the default separable smoothing kernel: a 31-sample
/// Gaussian window with sigma 1.
#[must_use]
pub fn default_smoothing_kernel() -> Vec<f64> {
    gaussian_window(SMOOTHING_KERNEL_SIZE, 1.0)
}

/// Frequency indices of an `n`-point FFT, in FFT output order
/// (`0, 1, ..., -2, -1`).
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn fourier_grid_1d(n: usize) -> Vec<f64> {
    let half = n / 2;
    (0..n)
        .map(|k| ((k + half) % n) as f64 - half as f64)
        .collect()
}

/// Frequency index grids for a `rows` by `cols` FFT: the first varies
/// along rows, the second along columns.
#[must_use]
pub fn fourier_grid_2d(rows: usize, cols: usize) -> (Array2<f64>, Array2<f64>) {
    let gx = fourier_grid_1d(rows);
    let gy = fourier_grid_1d(cols);
    let qx = Array2::from_shape_fn((rows, cols), |(i, _)| gx[i]);
    let qy = Array2::from_shape_fn((rows, cols), |(_, j)| gy[j]);
    (qx, qy)
}

/// A radial correlation curve and the resolution read from it.
#[derive(Debug, Clone, PartialEq)]
pub struct FrcCurve {
    /// Estimated resolution in meters.
    pub resolution: f64,
    /// Ring frequencies (1/m).
    pub qi: Vec<f64>,
    /// Smoothed ring correlations.
    pub ci: Vec<f64>,
}

/// Result of correlating one pair of images.
#[derive(Debug, Clone)]
pub struct FrcResult {
    /// Radial curve and resolution.
    pub curve: FrcCurve,
    /// Real part of the smoothed, normalized cross-spectrum.
    pub correlation_map: Array2<f64>,
}

fn transform_lanes(data: &mut Array2<Complex64>, axis: Axis, fft: &Arc<dyn Fft<f64>>) {
    let mut buffer = vec![Complex64::new(0.0, 0.0); data.len_of(axis)];
    for mut lane in data.lanes_mut(axis) {
        for (b, v) in buffer.iter_mut().zip(lane.iter()) {
            *b = *v;
        }
        fft.process(&mut buffer);
        for (v, b) in lane.iter_mut().zip(&buffer) {
            *v = *b;
        }
    }
}

fn fft2(image: &Array2<f64>) -> Array2<Complex64> {
    let (rows, cols) = image.dim();
    let mut data = image.mapv(|v| Complex64::new(v, 0.0));
    let mut planner = FftPlanner::new();
    transform_lanes(&mut data, Axis(1), &planner.plan_fft_forward(cols));
    transform_lanes(&mut data, Axis(0), &planner.plan_fft_forward(rows));
    data
}

/// Moves the zero-frequency sample of an FFT-ordered array to the center.
fn ifftshift(data: &Array2<Complex64>) -> Array2<Complex64> {
    let (rows, cols) = data.dim();
    Array2::from_shape_fn((rows, cols), |(i, j)| {
        data[[(i + rows / 2) % rows, (j + cols / 2) % cols]]
    })
}

struct Spectra {
    a: Array2<Complex64>,
    b: Array2<Complex64>,
    c: Array2<Complex64>,
}

fn spectra(image1: &Array2<f64>, image2: &Array2<f64>) -> Result<Spectra> {
    if image1.dim() != image2.dim() {
        return Err(Error::InvalidParameter(format!(
            "image shapes differ: {:?} vs {:?}",
            image1.dim(),
            image2.dim()
        )));
    }
    if image1.is_empty() {
        return Err(Error::EmptyInput);
    }
    let f1 = fft2(image1);
    let f2 = fft2(image2);
    Ok(Spectra {
        a: ndarray::Zip::from(&f1)
            .and(&f2)
            .map_collect(|&x, &y| x * y.conj()),
        b: f1.mapv(|x| x * x.conj()),
        c: f2.mapv(|x| x * x.conj()),
    })
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn radial_curve(s: &Spectra, sx: f64, sy: f64, frc_bin_size: f64) -> Result<FrcCurve> {
    for (name, value) in [("frc bin size", frc_bin_size), ("sx", sx), ("sy", sy)] {
        if value.is_nan() || value <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "{name} must be positive, got {value}"
            )));
        }
    }
    let (rows, cols) = s.a.dim();
    // Physical image size in meters.
    let size = (rows as f64 * sy * 1e-9, cols as f64 * sx * 1e-9);
    let bin = (1.0 / size.0).min(1.0 / size.1) / frc_bin_size;

    let gx = fourier_grid_1d(rows);
    let gy = fourier_grid_1d(cols);
    let ring = |i: usize, j: usize| -> usize {
        let q = (gx[i] / size.0).hypot(gy[j] / size.1);
        (q / bin).round() as usize
    };

    let mut num_rings = 0;
    for i in 0..rows {
        for j in 0..cols {
            num_rings = num_rings.max(ring(i, j) + 1);
        }
    }
    let zero = Complex64::new(0.0, 0.0);
    let mut aj = vec![zero; num_rings];
    let mut bj = vec![zero; num_rings];
    let mut cj = vec![zero; num_rings];
    let mut members = vec![0usize; num_rings];
    for ((i, j), a) in s.a.indexed_iter() {
        let k = ring(i, j);
        aj[k] += *a;
        bj[k] += s.b[[i, j]];
        cj[k] += s.c[[i, j]];
        members[k] += 1;
    }

    let q_max = (num_rings - 1) as f64 * bin;
    let (qi, raw): (Vec<f64>, Vec<f64>) = (0..num_rings)
        .filter(|&k| members[k] > 0 && (k as f64 * bin) < FREQUENCY_CUTOFF * q_max)
        .map(|k| (k as f64 * bin, (aj[k] / (bj[k] * cj[k]).sqrt()).re))
        .unzip();
    if qi.len() < 2 {
        return Err(Error::InvalidParameter(format!(
            "{rows}x{cols} image is too small for ring correlation"
        )));
    }
    let ci = savgol_filter(&raw, SAVGOL_WINDOW, SAVGOL_ORDER);

    let q_critical = qi
        .iter()
        .zip(&ci)
        .find(|&(&q, &c)| q > 0.0 && c < FRC_THRESHOLD)
        .map_or(qi[qi.len() - 1], |(&q, _)| q);
    Ok(FrcCurve {
        resolution: 1.0 / q_critical,
        qi,
        ci,
    })
}

/// Ring correlation curve of two images rendered with `sx` by `sy` nm
/// pixels.
///
/// # Errors
/// Returns `InvalidParameter` for mismatched shapes, a non-positive bin
/// size or images too small to yield a curve, and `EmptyInput` for empty
/// images.
pub fn ring_correlation_curve(
    image1: &Array2<f64>,
    image2: &Array2<f64>,
    sx: f64,
    sy: f64,
    frc_bin_size: f64,
) -> Result<FrcCurve> {
    radial_curve(&spectra(image1, image2)?, sx, sy, frc_bin_size)
}

/// Full Fourier ring correlation of two images.
///
/// Besides the radial curve this computes the 2D correlation map: the
/// cross- and auto-spectra are recentered, smoothed with the separable
/// kernel `outer(kernel, kernel)` (default: [`default_smoothing_kernel`])
/// and normalized.
///
/// # Errors
/// Same as [`ring_correlation_curve`].
pub fn fourier_ring_correlation(
    image1: &Array2<f64>,
    image2: &Array2<f64>,
    sx: f64,
    sy: f64,
    kernel: Option<&[f64]>,
    frc_bin_size: f64,
) -> Result<FrcResult> {
    let s = spectra(image1, image2)?;
    let default_kernel;
    let kernel = if let Some(k) = kernel {
        k
    } else {
        default_kernel = default_smoothing_kernel();
        &default_kernel
    };
    let smooth = |x: &Array2<Complex64>| convolve_same_separable(&ifftshift(x), kernel);
    let (a_s, b_s, c_s) = (smooth(&s.a), smooth(&s.b), smooth(&s.c));
    let correlation_map = ndarray::Zip::from(&a_s)
        .and(&b_s)
        .and(&c_s)
        .map_collect(|&a, &b, &c| (a / (b * c).sqrt()).re);

    Ok(FrcResult {
        curve: radial_curve(&s, sx, sy, frc_bin_size)?,
        correlation_map,
    })
}

/// Parameters of a repeated FRC estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct FrcConfig {
    /// Number of random splits.
    pub num_repetitions: usize,
    /// Pixel size along x (nm).
    pub sx: f64,
    /// Pixel size along y (nm).
    pub sy: f64,
    /// Render extent shared by every repetition; the data's min/max when
    /// `None`.
    pub extent: Option<Extent2D>,
    /// Rendering mode of both halves.
    pub mode: RenderMode,
    /// Sub-bins per frequency step.
    pub frc_bin_size: f64,
    /// Seed of the split generator; a fresh entropy seed when `None`.
    pub seed: Option<u64>,
}

impl Default for FrcConfig {
    fn default() -> Self {
        Self {
            num_repetitions: 5,
            sx: 1.0,
            sy: 1.0,
            extent: None,
            mode: RenderMode::Histogram,
            frc_bin_size: DEFAULT_FRC_BIN_SIZE,
            seed: None,
        }
    }
}

impl FrcConfig {
    /// Sets the number of repetitions.
    #[must_use]
    pub fn with_repetitions(mut self, n: usize) -> Self {
        self.num_repetitions = n;
        self
    }

    /// Sets the pixel size (nm) along both axes.
    #[must_use]
    pub fn with_pixel_size(mut self, sx: f64, sy: f64) -> Self {
        self.sx = sx;
        self.sy = sy;
        self
    }

    /// Sets the shared render extent.
    #[must_use]
    pub fn with_extent(mut self, extent: Extent2D) -> Self {
        self.extent = Some(extent);
        self
    }

    /// Sets the render mode.
    #[must_use]
    pub fn with_mode(mut self, mode: RenderMode) -> Self {
        self.mode = mode;
        self
    }

    /// Sets the frequency sub-binning.
    #[must_use]
    pub fn with_frc_bin_size(mut self, frc_bin_size: f64) -> Self {
        self.frc_bin_size = frc_bin_size;
        self
    }

    /// Fixes the random seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Averaged FRC estimate.
#[derive(Debug, Clone, PartialEq)]
pub struct FrcEstimate {
    /// Mean resolution in meters.
    pub resolution: f64,
    /// Ring frequencies (1/m), shared by every repetition.
    pub qi: Vec<f64>,
    /// Mean correlation per ring.
    pub ci: Vec<f64>,
    /// Resolution of each repetition, in meters.
    pub resolutions: Vec<f64>,
    /// Correlation curve of each repetition.
    pub curves: Vec<Vec<f64>>,
}

impl FrcEstimate {
    /// Mean resolution in nanometers.
    #[must_use]
    pub fn resolution_nm(&self) -> f64 {
        self.resolution * 1e9
    }
}

/// Estimates the resolution of the localizations `(x, y)` (nm) by
/// averaging `config.num_repetitions` Fourier ring correlations.
///
/// All splits are drawn up front from one generator, so a fixed seed gives
/// the same result however the repetitions are scheduled. Repetitions run
/// in parallel.
///
/// # Errors
/// Returns `InvalidParameter` for zero repetitions or invalid render/FRC
/// parameters, `LengthMismatch` when `x` and `y` differ in length, and
/// `EmptyInput` when there is no data to derive the extent from.
#[allow(clippy::cast_precision_loss)]
pub fn estimate_resolution(x: &[f64], y: &[f64], config: &FrcConfig) -> Result<FrcEstimate> {
    if config.num_repetitions == 0 {
        return Err(Error::InvalidParameter(
            "at least one repetition is required".into(),
        ));
    }
    if x.len() != y.len() {
        return Err(Error::LengthMismatch {
            expected: x.len(),
            actual: y.len(),
        });
    }
    let extent = match config.extent {
        Some(e) => e,
        None => Extent2D::from_data(x, y)?,
    };

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let splits: Vec<Vec<bool>> = (0..config.num_repetitions)
        .map(|_| x.iter().map(|_| rng.gen::<f64>() < 0.5).collect())
        .collect();

    let curves: Vec<FrcCurve> = splits
        .par_iter()
        .map(|split| {
            let half = |side: bool| -> (Vec<f64>, Vec<f64>) {
                x.iter()
                    .zip(y)
                    .zip(split)
                    .filter(|&(_, &s)| s == side)
                    .map(|((&xv, &yv), _)| (xv, yv))
                    .unzip()
            };
            let (x1, y1) = half(true);
            let (x2, y2) = half(false);
            let h1 = render_xy(&x1, &y1, config.sx, config.sy, Some(extent), config.mode)?;
            let h2 = render_xy(&x2, &y2, config.sx, config.sy, Some(extent), config.mode)?;
            ring_correlation_curve(&h1.image, &h2.image, config.sx, config.sy, config.frc_bin_size)
        })
        .collect::<Result<_>>()?;

    let n = curves.len() as f64;
    let qi = curves[0].qi.clone();
    let mut ci = vec![0.0; qi.len()];
    for curve in &curves {
        for (acc, c) in ci.iter_mut().zip(&curve.ci) {
            *acc += c / n;
        }
    }
    let resolutions: Vec<f64> = curves.iter().map(|c| c.resolution).collect();
    let resolution = resolutions.iter().sum::<f64>() / n;
    log::debug!(
        "FRC over {} repetitions: {:.2} nm",
        config.num_repetitions,
        resolution * 1e9
    );

    Ok(FrcEstimate {
        resolution,
        qi,
        ci,
        resolutions,
        curves: curves.into_iter().map(|c| c.ci).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn blob_image(rows: usize, cols: usize, shift: f64) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(i, j)| {
            let di = i as f64 - rows as f64 / 2.0 - shift;
            let dj = j as f64 - cols as f64 / 2.0;
            (-(di * di + dj * dj) / 18.0).exp()
        })
    }

    #[test]
    fn test_fourier_grid_order() {
        assert_eq!(fourier_grid_1d(4), vec![0.0, 1.0, -2.0, -1.0]);
        assert_eq!(fourier_grid_1d(5), vec![0.0, 1.0, 2.0, -2.0, -1.0]);
        let (qx, qy) = fourier_grid_2d(3, 4);
        assert_relative_eq!(qx[[2, 0]], -1.0);
        assert_relative_eq!(qy[[0, 2]], -2.0);
    }

    #[test]
    fn test_fft2_of_constant() {
        let f = fft2(&Array2::from_elem((4, 6), 1.0));
        assert_relative_eq!(f[[0, 0]].re, 24.0, epsilon = 1e-9);
        assert_relative_eq!(f[[1, 3]].norm(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_identical_images_correlate_fully() {
        let image = blob_image(32, 32, 0.0);
        let curve = ring_correlation_curve(&image, &image, 1.0, 1.0, DEFAULT_FRC_BIN_SIZE).unwrap();
        assert_eq!(curve.qi.len(), curve.ci.len());
        for c in &curve.ci {
            assert_relative_eq!(*c, 1.0, epsilon = 1e-9);
        }
        // Never drops below the threshold: the last frequency is used.
        assert_relative_eq!(curve.resolution, 1.0 / curve.qi[curve.qi.len() - 1]);
    }

    #[test]
    fn test_correlation_map_shape() {
        let a = blob_image(24, 20, 0.0);
        let b = blob_image(24, 20, 1.5);
        let result = fourier_ring_correlation(&a, &b, 2.0, 2.0, None, 11.0).unwrap();
        assert_eq!(result.correlation_map.dim(), (24, 20));
        assert!(result.curve.resolution > 0.0);
    }

    #[test]
    fn test_invalid_images() {
        let a = Array2::<f64>::zeros((4, 4));
        let b = Array2::<f64>::zeros((4, 5));
        assert!(matches!(
            ring_correlation_curve(&a, &b, 1.0, 1.0, 11.0),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            ring_correlation_curve(&a, &a, 1.0, 1.0, 0.0),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_config_builders() {
        let config = FrcConfig::default()
            .with_repetitions(3)
            .with_pixel_size(2.0, 4.0)
            .with_seed(7)
            .with_frc_bin_size(5.0);
        assert_eq!(config.num_repetitions, 3);
        assert_relative_eq!(config.sy, 4.0);
        assert_eq!(config.seed, Some(7));
        assert!(matches!(
            estimate_resolution(&[1.0], &[1.0], &config.with_repetitions(0)),
            Err(Error::InvalidParameter(_))
        ));
    }
}
