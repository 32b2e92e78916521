//! Single decoded localization.

use serde::{Deserialize, Serialize};

/// One row of the decoded localization table.
///
/// Positions are in nanometers. `dwell` is never stored on its own: it is
/// derived from `eco` and `efo` whenever a record is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocalizationRecord {
    /// Trace identifier.
    pub tid: i64,
    /// Acquisition time (s).
    pub tim: f64,
    /// Position x (nm).
    pub x: f64,
    /// Position y (nm).
    pub y: f64,
    /// Position z (nm), scaled.
    pub z: f64,
    /// Emission frequency (Hz).
    pub efo: f64,
    /// Center-frequency ratio.
    pub cfr: f64,
    /// Effective photon count.
    pub eco: f64,
    /// Detector count ratio.
    pub dcr: f64,
    /// Derived dwell time (ms).
    pub dwell: f64,
    /// Fluorophore id (1-based).
    pub fluo: i32,
}

impl LocalizationRecord {
    /// Builds a record, deriving `dwell` from `eco` and `efo`.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        tid: i64,
        tim: f64,
        position: [f64; 3],
        efo: f64,
        cfr: f64,
        eco: f64,
        dcr: f64,
        fluo: i32,
    ) -> Self {
        Self {
            tid,
            tim,
            x: position[0],
            y: position[1],
            z: position[2],
            efo,
            cfr,
            eco,
            dcr,
            dwell: dwell_time(eco, efo),
            fluo,
        }
    }
}

/// Dwell time in milliseconds, rounded half to even.
///
/// Non-finite when `efo` is zero or either input is NaN.
#[inline]
#[must_use]
pub fn dwell_time(eco: f64, efo: f64) -> f64 {
    (eco / (efo / 1000.0)).round_ties_even()
}
