//! Acquisition metadata resolved once per loaded file.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Meters to nanometers.
pub const UNIT_SCALING_FACTOR: f64 = 1e9;

/// Kind of MINFLUX acquisition stored in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionKind {
    /// Multi-iteration 2D localization.
    Localization2D,
    /// Multi-iteration 3D localization.
    Localization3D,
    /// 2D tracking.
    Tracking2D,
    /// 3D tracking.
    Tracking3D,
    /// Single-iteration records; iteration depth is not searched.
    Aggregated {
        /// Records carry a z position.
        is_3d: bool,
    },
}

impl AcquisitionKind {
    /// Resolves the kind from the three load-time flags.
    #[must_use]
    pub fn from_flags(is_3d: bool, is_aggregated: bool, is_tracking: bool) -> Self {
        match (is_aggregated, is_tracking, is_3d) {
            (true, _, is_3d) => AcquisitionKind::Aggregated { is_3d },
            (false, true, true) => AcquisitionKind::Tracking3D,
            (false, true, false) => AcquisitionKind::Tracking2D,
            (false, false, true) => AcquisitionKind::Localization3D,
            (false, false, false) => AcquisitionKind::Localization2D,
        }
    }

    /// True for 3D acquisitions.
    #[must_use]
    pub fn is_3d(self) -> bool {
        matches!(
            self,
            AcquisitionKind::Localization3D
                | AcquisitionKind::Tracking3D
                | AcquisitionKind::Aggregated { is_3d: true }
        )
    }

    /// True for single-iteration records.
    #[must_use]
    pub fn is_aggregated(self) -> bool {
        matches!(self, AcquisitionKind::Aggregated { .. })
    }

    /// True for tracking acquisitions.
    #[must_use]
    pub fn is_tracking(self) -> bool {
        matches!(self, AcquisitionKind::Tracking2D | AcquisitionKind::Tracking3D)
    }
}

impl fmt::Display for AcquisitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dim = if self.is_3d() { "3D" } else { "2D" };
        let mode = match self {
            AcquisitionKind::Aggregated { .. } => "aggregated",
            AcquisitionKind::Tracking2D | AcquisitionKind::Tracking3D => "tracking",
            _ => "normal",
        };
        write!(f, "{dim} {mode}")
    }
}

/// Immutable per-file acquisition metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionInfo {
    /// Acquisition kind.
    pub kind: AcquisitionKind,
    /// Iterations stored per event.
    pub num_iterations: usize,
    /// Refractive-index correction applied to z.
    pub z_scaling_factor: f64,
    /// Meters to output units, [`UNIT_SCALING_FACTOR`].
    pub unit_scaling_factor: f64,
}

impl AcquisitionInfo {
    /// Metadata in nanometers.
    #[must_use]
    pub fn new(kind: AcquisitionKind, num_iterations: usize, z_scaling_factor: f64) -> Self {
        Self {
            kind,
            num_iterations,
            z_scaling_factor,
            unit_scaling_factor: UNIT_SCALING_FACTOR,
        }
    }

    /// See [`AcquisitionKind::is_3d`].
    #[must_use]
    pub fn is_3d(&self) -> bool {
        self.kind.is_3d()
    }

    /// See [`AcquisitionKind::is_aggregated`].
    #[must_use]
    pub fn is_aggregated(&self) -> bool {
        self.kind.is_aggregated()
    }

    /// See [`AcquisitionKind::is_tracking`].
    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.kind.is_tracking()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_flags() {
        assert_eq!(
            AcquisitionKind::from_flags(true, true, false),
            AcquisitionKind::Aggregated { is_3d: true }
        );
        assert_eq!(
            AcquisitionKind::from_flags(false, false, true),
            AcquisitionKind::Tracking2D
        );
        let kind = AcquisitionKind::from_flags(true, false, false);
        assert!(kind.is_3d());
        assert!(!kind.is_aggregated());
        assert_eq!(kind.to_string(), "3D normal");
    }

    #[test]
    fn test_info_defaults_unit_scale() {
        let info = AcquisitionInfo::new(AcquisitionKind::Localization2D, 5, 0.7);
        assert_eq!(info.unit_scaling_factor, 1e9);
        assert!(!info.is_tracking());
    }
}
