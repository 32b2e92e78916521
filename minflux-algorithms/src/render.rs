//! Rendering of localizations onto regular pixel grids.
//!
//! Two modes are supported: a nearest-pixel histogram and a fixed-width
//! Gaussian splat with sub-pixel placement. Images are stored with the
//! first row at the maximum y edge.

use crate::signal::nan_min_max;
use minflux_core::{Error, Result};
use ndarray::{Array2, Array3};
use std::f64::consts::LN_2;

/// Upper limit on the number of cells of a rendered grid.
pub const MAX_RENDER_CELLS: usize = 1 << 28;

/// Per-point rendering strategy.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RenderMode {
    /// One count in the nearest pixel.
    #[default]
    Histogram,
    /// A unit-peak Gaussian patch centered at the sub-pixel position.
    /// The FWHM defaults to three times the pixel diagonal.
    FixedGaussian {
        /// Full width at half maximum, in coordinate units.
        fwhm: Option<f64>,
    },
}

/// Shared x/y ranges of a 2D render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent2D {
    /// `(min, max)` along x.
    pub x: (f64, f64),
    /// `(min, max)` along y.
    pub y: (f64, f64),
}

impl Extent2D {
    /// Creates an extent from explicit ranges.
    #[must_use]
    pub fn new(x: (f64, f64), y: (f64, f64)) -> Self {
        Self { x, y }
    }

    /// Tight extent around the non-NaN data.
    ///
    /// # Errors
    /// Returns `EmptyInput` if either axis has no non-NaN value.
    pub fn from_data(x: &[f64], y: &[f64]) -> Result<Self> {
        Ok(Self {
            x: nan_min_max(x).ok_or(Error::EmptyInput)?,
            y: nan_min_max(y).ok_or(Error::EmptyInput)?,
        })
    }
}

/// Shared x/y/z ranges of a 3D render.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent3D {
    /// `(min, max)` along x.
    pub x: (f64, f64),
    /// `(min, max)` along y.
    pub y: (f64, f64),
    /// `(min, max)` along z.
    pub z: (f64, f64),
}

impl Extent3D {
    /// Creates an extent from explicit ranges.
    #[must_use]
    pub fn new(x: (f64, f64), y: (f64, f64), z: (f64, f64)) -> Self {
        Self { x, y, z }
    }

    /// Tight extent around the non-NaN data.
    ///
    /// # Errors
    /// Returns `EmptyInput` if any axis has no non-NaN value.
    pub fn from_data(x: &[f64], y: &[f64], z: &[f64]) -> Result<Self> {
        Ok(Self {
            x: nan_min_max(x).ok_or(Error::EmptyInput)?,
            y: nan_min_max(y).ok_or(Error::EmptyInput)?,
            z: nan_min_max(z).ok_or(Error::EmptyInput)?,
        })
    }
}

/// A rendered 2D image.
#[derive(Debug, Clone)]
pub struct RenderedImage {
    /// Pixel values, `[row, col]` with row 0 at the maximum y.
    pub image: Array2<f64>,
    /// Pixel-center x coordinates, one per column.
    pub xi: Vec<f64>,
    /// Pixel-center y coordinates, one per row from the minimum y.
    pub yi: Vec<f64>,
    /// Whether each input point was rendered.
    pub mask: Vec<bool>,
}

impl RenderedImage {
    /// Number of rendered points.
    #[must_use]
    pub fn num_rendered(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// A rendered 3D volume.
#[derive(Debug, Clone)]
pub struct RenderedVolume {
    /// Voxel values, `[z, row, col]` with row 0 at the maximum y.
    pub volume: Array3<f64>,
    /// Voxel-center x coordinates.
    pub xi: Vec<f64>,
    /// Voxel-center y coordinates.
    pub yi: Vec<f64>,
    /// Voxel-center z coordinates.
    pub zi: Vec<f64>,
    /// Whether each input point was rendered.
    pub mask: Vec<bool>,
}

impl RenderedVolume {
    /// Number of rendered points.
    #[must_use]
    pub fn num_rendered(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }
}

/// One axis of the output grid.
#[derive(Debug, Clone, Copy)]
struct PixelAxis {
    origin: f64,
    step: f64,
    len: usize,
}

impl PixelAxis {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn new(range: (f64, f64), step: f64, name: &str) -> Result<Self> {
        if step.is_nan() || step <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "{name} pixel size must be positive, got {step}"
            )));
        }
        let cells = ((range.1 - range.0) / step).ceil();
        if !cells.is_finite() {
            return Err(Error::InvalidParameter(format!(
                "{name} range ({}, {}) is not finite",
                range.0, range.1
            )));
        }
        Ok(Self {
            origin: range.0,
            step,
            len: cells.max(0.0) as usize,
        })
    }

    fn position(&self, value: f64) -> f64 {
        (value - self.origin) / self.step
    }

    /// Nearest pixel, if it lies on the grid.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap,
        clippy::cast_precision_loss
    )]
    fn index(&self, value: f64) -> Option<isize> {
        let p = self.position(value);
        if !p.is_finite() {
            return None;
        }
        let i = p.round_ties_even();
        (i >= 0.0 && i < self.len as f64).then_some(i as isize)
    }

    /// Whether a kernel of half-width `half` fits around `index`.
    #[allow(clippy::cast_possible_wrap)]
    fn clear_of_border(&self, index: isize, half: isize, strict_low: bool) -> bool {
        let low_ok = if strict_low {
            index > half + 1
        } else {
            index > half
        };
        low_ok && index < self.len as isize - half - 1
    }

    #[allow(clippy::cast_precision_loss)]
    fn centers(&self) -> Vec<f64> {
        (0..self.len)
            .map(|k| self.origin + (k as f64 + 0.5) * self.step)
            .collect()
    }
}

fn check_cells(shape: &[usize]) -> Result<()> {
    let cells = shape
        .iter()
        .try_fold(1usize, |acc, &n| acc.checked_mul(n))
        .filter(|&c| c <= MAX_RENDER_CELLS);
    if cells.is_none() {
        return Err(Error::InvalidParameter(format!(
            "render grid {shape:?} exceeds {MAX_RENDER_CELLS} cells"
        )));
    }
    Ok(())
}

fn resolve_fwhm(fwhm: Option<f64>, steps: &[f64]) -> Result<f64> {
    let fwhm = fwhm.unwrap_or_else(|| 3.0 * steps.iter().map(|s| s * s).sum::<f64>().sqrt());
    if fwhm.is_nan() || fwhm <= 0.0 {
        return Err(Error::InvalidParameter(format!(
            "fwhm must be positive, got {fwhm}"
        )));
    }
    Ok(fwhm)
}

#[allow(clippy::cast_possible_truncation)]
fn kernel_half_width(widths: &[f64]) -> isize {
    (2.0 * widths.iter().copied().fold(0.0, f64::max)).ceil() as isize
}

#[allow(clippy::cast_possible_wrap)]
fn index_error(row: isize, col: isize, rows: usize, cols: usize) -> Error {
    Error::RenderIndex {
        row,
        col,
        rows,
        cols,
    }
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
fn to_cell(row: isize, col: isize, rows: usize, cols: usize) -> Result<(usize, usize)> {
    if row < 0 || col < 0 || row >= rows as isize || col >= cols as isize {
        return Err(index_error(row, col, rows, cols));
    }
    Ok((row as usize, col as usize))
}

/// Renders `(x, y)` localizations on a grid of `sx` by `sy` pixels.
///
/// The grid covers `extent` (the data's own min/max when `None`) with
/// `ceil(range / s)` pixels per axis. Points whose nearest pixel is off the
/// grid are masked out; the Gaussian mode additionally drops points closer
/// than the kernel half-width to a border. A pixel write that would still
/// fall outside the image is logged and skipped.
///
/// # Errors
/// Returns `LengthMismatch` if `x` and `y` differ in length,
/// `InvalidParameter` for non-positive pixel sizes or FWHM, and
/// `EmptyInput` when no extent is given and there is no data.
#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
pub fn render_xy(
    x: &[f64],
    y: &[f64],
    sx: f64,
    sy: f64,
    extent: Option<Extent2D>,
    mode: RenderMode,
) -> Result<RenderedImage> {
    if x.len() != y.len() {
        return Err(Error::LengthMismatch {
            expected: x.len(),
            actual: y.len(),
        });
    }
    let extent = match extent {
        Some(e) => e,
        None => Extent2D::from_data(x, y)?,
    };
    let ax = PixelAxis::new(extent.x, sx, "x")?;
    let ay = PixelAxis::new(extent.y, sy, "y")?;
    let (rows, cols) = (ay.len, ax.len);
    check_cells(&[rows, cols])?;
    let mut image = Array2::<f64>::zeros((rows, cols));

    let mut mask: Vec<bool> = Vec::with_capacity(x.len());
    let gaussian = match mode {
        RenderMode::Histogram => None,
        RenderMode::FixedGaussian { fwhm } => {
            let fwhm = resolve_fwhm(fwhm, &[sx, sy])?;
            let (wx, wy) = (fwhm / sx, fwhm / sy);
            Some((wx, wy, kernel_half_width(&[wx, wy])))
        }
    };

    for (&xv, &yv) in x.iter().zip(y) {
        let (Some(ix), Some(iy)) = (ax.index(xv), ay.index(yv)) else {
            mask.push(false);
            continue;
        };
        let written = match gaussian {
            None => to_cell(rows as isize - iy - 1, ix, rows, cols).map(|cell| {
                image[cell] += 1.0;
            }),
            Some((wx, wy, half)) => {
                if !(ax.clear_of_border(ix, half, false) && ay.clear_of_border(iy, half, true)) {
                    mask.push(false);
                    continue;
                }
                let dx = ax.position(xv) - ix as f64;
                let dy = ay.position(yv) - iy as f64;
                splat_2d(&mut image, ix, iy, dx, dy, wx, wy, half)
            }
        };
        match written {
            Ok(()) => mask.push(true),
            Err(e) => {
                log::warn!("skipping localization ({xv}, {yv}): {e}");
                mask.push(false);
            }
        }
    }

    Ok(RenderedImage {
        image,
        xi: ax.centers(),
        yi: ay.centers(),
        mask,
    })
}

/// Adds a unit-peak Gaussian patch around pixel `(ix, iy)`. The patch is
/// bounds-checked as a whole before anything is written.
#[allow(clippy::too_many_arguments, clippy::cast_possible_wrap, clippy::cast_precision_loss)]
fn splat_2d(
    image: &mut Array2<f64>,
    ix: isize,
    iy: isize,
    dx: f64,
    dy: f64,
    wx: f64,
    wy: f64,
    half: isize,
) -> Result<()> {
    let (rows, cols) = image.dim();
    let top = rows as isize - 1 - (iy + half);
    let bottom = rows as isize - 1 - (iy - half);
    to_cell(top, ix - half, rows, cols)?;
    to_cell(bottom, ix + half, rows, cols)?;

    for ga in -half..=half {
        let ky = (ga as f64 - dy).powi(2) / (wy * wy);
        let row = rows as isize - 1 - (iy + ga);
        for gb in -half..=half {
            let kx = (gb as f64 - dx).powi(2) / (wx * wx);
            let cell = to_cell(row, ix + gb, rows, cols)?;
            image[cell] += (-4.0 * LN_2 * (kx + ky)).exp();
        }
    }
    Ok(())
}

/// Renders `(x, y, z)` localizations into a volume of `sx` by `sy` by `sz`
/// voxels, indexed `[z, row, col]` with rows flipped as in [`render_xy`].
///
/// # Errors
/// Same conditions as [`render_xy`].
#[allow(
    clippy::too_many_arguments,
    clippy::cast_possible_wrap,
    clippy::cast_precision_loss
)]
pub fn render_xyz(
    x: &[f64],
    y: &[f64],
    z: &[f64],
    sx: f64,
    sy: f64,
    sz: f64,
    extent: Option<Extent3D>,
    mode: RenderMode,
) -> Result<RenderedVolume> {
    for other in [y.len(), z.len()] {
        if other != x.len() {
            return Err(Error::LengthMismatch {
                expected: x.len(),
                actual: other,
            });
        }
    }
    let extent = match extent {
        Some(e) => e,
        None => Extent3D::from_data(x, y, z)?,
    };
    let ax = PixelAxis::new(extent.x, sx, "x")?;
    let ay = PixelAxis::new(extent.y, sy, "y")?;
    let az = PixelAxis::new(extent.z, sz, "z")?;
    let (depth, rows, cols) = (az.len, ay.len, ax.len);
    check_cells(&[depth, rows, cols])?;
    let mut volume = Array3::<f64>::zeros((depth, rows, cols));

    let gaussian = match mode {
        RenderMode::Histogram => None,
        RenderMode::FixedGaussian { fwhm } => {
            let fwhm = resolve_fwhm(fwhm, &[sx, sy, sz])?;
            let w = [fwhm / sx, fwhm / sy, fwhm / sz];
            Some((w, kernel_half_width(&w)))
        }
    };

    let mut mask = Vec::with_capacity(x.len());
    for ((&xv, &yv), &zv) in x.iter().zip(y).zip(z) {
        let (Some(ix), Some(iy), Some(iz)) = (ax.index(xv), ay.index(yv), az.index(zv)) else {
            mask.push(false);
            continue;
        };
        let written = match gaussian {
            None => to_voxel(iz, rows as isize - iy - 1, ix, volume.dim()).map(|voxel| {
                volume[voxel] += 1.0;
            }),
            Some((widths, half)) => {
                if !(ax.clear_of_border(ix, half, false)
                    && ay.clear_of_border(iy, half, true)
                    && az.clear_of_border(iz, half, true))
                {
                    mask.push(false);
                    continue;
                }
                let offsets = [
                    ax.position(xv) - ix as f64,
                    ay.position(yv) - iy as f64,
                    az.position(zv) - iz as f64,
                ];
                splat_3d(&mut volume, [ix, iy, iz], offsets, widths, half)
            }
        };
        match written {
            Ok(()) => mask.push(true),
            Err(e) => {
                log::warn!("skipping localization ({xv}, {yv}, {zv}): {e}");
                mask.push(false);
            }
        }
    }

    Ok(RenderedVolume {
        volume,
        xi: ax.centers(),
        yi: ay.centers(),
        zi: az.centers(),
        mask,
    })
}

#[allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]
fn to_voxel(
    k: isize,
    row: isize,
    col: isize,
    (depth, rows, cols): (usize, usize, usize),
) -> Result<(usize, usize, usize)> {
    if k < 0 || k >= depth as isize {
        return Err(index_error(row, col, rows, cols));
    }
    let (r, c) = to_cell(row, col, rows, cols)?;
    Ok((k as usize, r, c))
}

/// 3D counterpart of [`splat_2d`].
#[allow(clippy::cast_possible_wrap, clippy::cast_precision_loss)]
fn splat_3d(
    volume: &mut Array3<f64>,
    [ix, iy, iz]: [isize; 3],
    [dx, dy, dz]: [f64; 3],
    [wx, wy, wz]: [f64; 3],
    half: isize,
) -> Result<()> {
    let dim = volume.dim();
    let rows = dim.1 as isize;
    to_voxel(iz - half, rows - 1 - (iy + half), ix - half, dim)?;
    to_voxel(iz + half, rows - 1 - (iy - half), ix + half, dim)?;

    for gc in -half..=half {
        let kz = (gc as f64 - dz).powi(2) / (wz * wz);
        for ga in -half..=half {
            let ky = (ga as f64 - dy).powi(2) / (wy * wy);
            let row = rows - 1 - (iy + ga);
            for gb in -half..=half {
                let kx = (gb as f64 - dx).powi(2) / (wx * wx);
                let voxel = to_voxel(iz + gc, row, ix + gb, dim)?;
                volume[voxel] += (-4.0 * LN_2 * (kx + ky + kz)).exp();
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_histogram_render_flips_rows() {
        let x = [0.5, 2.4, 9.6];
        let y = [0.5, 0.4, 3.9];
        let extent = Extent2D::new((0.0, 10.0), (0.0, 4.0));
        let r = render_xy(&x, &y, 1.0, 1.0, Some(extent), RenderMode::Histogram).unwrap();
        assert_eq!(r.image.dim(), (4, 10));
        // 0.5 rounds to 0 (ties to even); row 0 is the top.
        assert_relative_eq!(r.image[[3, 0]], 1.0);
        assert_relative_eq!(r.image[[3, 2]], 1.0);
        // 9.6 rounds to 10, outside the 10 columns.
        assert_eq!(r.mask, vec![true, true, false]);
        assert_relative_eq!(r.image.sum(), 2.0);
        assert_relative_eq!(r.xi[0], 0.5);
        assert_relative_eq!(r.yi[3], 3.5);
    }

    #[test]
    fn test_default_extent_and_nan() {
        let x = [0.0, 4.0, f64::NAN];
        let y = [0.0, 2.0, 1.0];
        let r = render_xy(&x, &y, 1.0, 1.0, None, RenderMode::Histogram).unwrap();
        assert_eq!(r.image.dim(), (2, 4));
        // x = 4.0 sits on the max edge, index 4 is outside.
        assert_eq!(r.mask, vec![true, false, false]);
        assert_eq!(r.num_rendered(), 1);
    }

    #[test]
    fn test_gaussian_border_exclusion() {
        let extent = Extent2D::new((0.0, 40.0), (0.0, 40.0));
        let mode = RenderMode::FixedGaussian { fwhm: Some(1.0) };
        let x = [20.0, 1.0, 20.0];
        let y = [20.0, 20.0, 3.0];
        let r = render_xy(&x, &y, 1.0, 1.0, Some(extent), mode).unwrap();
        // L = 2: x needs 3 <= ix < 37, y needs 3 < iy < 37.
        assert_eq!(r.mask, vec![true, false, false]);
        assert_relative_eq!(r.image[[19, 20]], 1.0);
        assert_relative_eq!(r.image[[19, 21]], 0.0625);
        assert_relative_eq!(r.image[[18, 20]], 0.0625);
    }

    #[test]
    fn test_invalid_parameters() {
        let extent = Some(Extent2D::new((0.0, 1.0), (0.0, 1.0)));
        assert!(matches!(
            render_xy(&[0.0], &[0.0], 0.0, 1.0, extent, RenderMode::Histogram),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            render_xy(&[0.0, 1.0], &[0.0], 1.0, 1.0, extent, RenderMode::Histogram),
            Err(Error::LengthMismatch { .. })
        ));
        assert!(matches!(
            render_xy(&[], &[], 1.0, 1.0, None, RenderMode::Histogram),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn test_splat_out_of_bounds_is_reported() {
        let mut image = Array2::<f64>::zeros((5, 5));
        let err = splat_2d(&mut image, 1, 2, 0.0, 0.0, 1.0, 1.0, 2).unwrap_err();
        assert!(matches!(err, Error::RenderIndex { .. }));
        assert_relative_eq!(image.sum(), 0.0);
    }

    #[test]
    fn test_render_xyz_histogram() {
        let x = [1.0, 2.0, 2.0];
        let y = [1.0, 1.0, 1.0];
        let z = [0.0, 0.0, 3.0];
        let extent = Extent3D::new((0.0, 4.0), (0.0, 4.0), (0.0, 4.0));
        let v = render_xyz(&x, &y, &z, 1.0, 1.0, 1.0, Some(extent), RenderMode::Histogram).unwrap();
        assert_eq!(v.volume.dim(), (4, 4, 4));
        assert_relative_eq!(v.volume[[0, 2, 1]], 1.0);
        assert_relative_eq!(v.volume[[0, 2, 2]], 1.0);
        assert_relative_eq!(v.volume[[3, 2, 2]], 1.0);
        assert_eq!(v.num_rendered(), 3);
        assert_eq!(v.zi.len(), 4);
    }

    #[test]
    fn test_render_xyz_gaussian_peak() {
        let extent = Extent3D::new((0.0, 20.0), (0.0, 20.0), (0.0, 20.0));
        let mode = RenderMode::FixedGaussian { fwhm: Some(1.0) };
        let v = render_xyz(&[10.0], &[10.0], &[10.0], 1.0, 1.0, 1.0, Some(extent), mode).unwrap();
        assert_eq!(v.mask, vec![true]);
        assert_relative_eq!(v.volume[[10, 9, 10]], 1.0);
        assert_relative_eq!(v.volume[[11, 9, 10]], 0.0625);
    }
}
