//! minflux-algorithms: Analysis of decoded MINFLUX localizations.
//!
//! This crate provides the numerical stages that run on a decoded table:
//! - **Histograms** - Freedman-Diaconis, Scott and fixed-width binning, density maps
//! - **Robust statistics** - median/MAD thresholds, peak bounds, spatial limits
//! - **Rendering** - 2D/3D histogram and Gaussian splat images
//! - **FRC** - Fourier ring correlation resolution estimates
//! - **Processing** - global and range filtering of a dataset
//!
#![warn(missing_docs)]

mod frc;
mod histogram;
mod processing;
mod render;
mod robust;
pub mod signal;

pub use frc::{
    default_smoothing_kernel, estimate_resolution, fourier_grid_1d, fourier_grid_2d,
    fourier_ring_correlation, ring_correlation_curve, FrcConfig, FrcCurve, FrcEstimate,
    FrcResult, DEFAULT_FRC_BIN_SIZE, FRC_THRESHOLD, SMOOTHING_KERNEL_SIZE,
};
pub use histogram::{
    bins_for, density_map, histogram, histogram_2d, prepare_histogram, BinningMode, HistogramSpec,
    DEGENERATE_BIN_WIDTH, MAX_BINS,
};
pub use processing::{DatasetProcessor, FilterPhase, FilterState};
pub use render::{
    render_xy, render_xyz, Extent2D, Extent3D, RenderMode, RenderedImage, RenderedVolume,
    MAX_RENDER_CELLS,
};
pub use robust::{
    find_cutoff_near_value, find_peaks, first_peak_bounds, localization_boundaries,
    median_filter, robust_threshold, LocalizationBounds, RobustThreshold, MAD_TO_STD,
};
