//! Analysis configuration.
//!
//! One `AnalysisConfig` is built at startup (from defaults or a JSON file)
//! and handed to every component that needs it. Nothing in the analysis
//! crates writes to it.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Filtering and thresholding parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Traces with fewer localizations are dropped by the global filter.
    pub min_num_loc_per_trace: usize,
    /// Current EFO range `(lower, upper)`, if one has been set.
    pub efo_thresholds: Option<(f64, f64)>,
    /// Current CFR range `(lower, upper)`, if one has been set.
    pub cfr_thresholds: Option<(f64, f64)>,
    /// Auto EFO threshold computes a lower bound.
    pub enable_efo_lower_threshold: bool,
    /// Auto EFO threshold computes an upper bound.
    pub enable_efo_upper_threshold: bool,
    /// Auto CFR threshold computes a lower bound.
    pub enable_cfr_lower_threshold: bool,
    /// Auto CFR threshold computes an upper bound.
    pub enable_cfr_upper_threshold: bool,
    /// Multiplier of the scaled MAD for the CFR robust threshold.
    pub cfr_threshold_factor: f64,
    /// Mixture components for EFO clustering.
    pub gmm_efo_num_clusters: usize,
    /// Use a Bayesian mixture for EFO clustering.
    pub gmm_efo_use_bayesian: bool,
    /// Minimum peak prominence relative to the EFO histogram range.
    pub min_efo_relative_peak_prominence: f64,
    /// Median filter window applied before EFO peak detection.
    pub median_efo_filter_support: usize,
    /// Refractive-index correction for z.
    pub z_scaling_factor: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_num_loc_per_trace: 1,
            efo_thresholds: None,
            cfr_thresholds: None,
            enable_efo_lower_threshold: false,
            enable_efo_upper_threshold: true,
            enable_cfr_lower_threshold: false,
            enable_cfr_upper_threshold: true,
            cfr_threshold_factor: 2.0,
            gmm_efo_num_clusters: 3,
            gmm_efo_use_bayesian: false,
            min_efo_relative_peak_prominence: 0.01,
            median_efo_filter_support: 5,
            z_scaling_factor: 1.0,
        }
    }
}

impl AnalysisConfig {
    /// Load configuration from a JSON file. Missing keys take their defaults.
    ///
    /// # Errors
    /// Returns `Config` if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("cannot open {}: {e}", path.display())))?;
        let config: Self = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string.
    ///
    /// # Errors
    /// Returns `Config` if the string cannot be parsed or validated.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    /// Returns `Config` if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Checks parameter domains.
    ///
    /// # Errors
    /// Returns `Config` describing the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.median_efo_filter_support == 0 {
            return Err(Error::Config(
                "median_efo_filter_support must be at least 1".into(),
            ));
        }
        if self.cfr_threshold_factor.is_nan() || self.cfr_threshold_factor <= 0.0 {
            return Err(Error::Config("cfr_threshold_factor must be positive".into()));
        }
        if self.min_efo_relative_peak_prominence.is_nan() || self.min_efo_relative_peak_prominence < 0.0 {
            return Err(Error::Config(
                "min_efo_relative_peak_prominence must be non-negative".into(),
            ));
        }
        if !(self.z_scaling_factor.is_finite() && self.z_scaling_factor > 0.0) {
            return Err(Error::Config("z_scaling_factor must be positive".into()));
        }
        for (name, range) in [
            ("efo_thresholds", self.efo_thresholds),
            ("cfr_thresholds", self.cfr_thresholds),
        ] {
            if let Some((lo, hi)) = range {
                if lo > hi {
                    return Err(Error::Config(format!("{name}: lower {lo} > upper {hi}")));
                }
            }
        }
        Ok(())
    }

    /// Clears the data-dependent thresholds, keeping all parameters.
    pub fn reset(&mut self) {
        self.efo_thresholds = None;
        self.cfr_thresholds = None;
    }

    /// Restores every field to its default.
    pub fn full_reset(&mut self) {
        *self = Self::default();
    }

    /// Sets the per-trace minimum.
    #[must_use]
    pub fn with_min_num_loc_per_trace(mut self, n: usize) -> Self {
        self.min_num_loc_per_trace = n;
        self
    }

    /// Sets the EFO range.
    #[must_use]
    pub fn with_efo_thresholds(mut self, lower: f64, upper: f64) -> Self {
        self.efo_thresholds = Some((lower, upper));
        self
    }

    /// Sets the CFR range.
    #[must_use]
    pub fn with_cfr_thresholds(mut self, lower: f64, upper: f64) -> Self {
        self.cfr_thresholds = Some((lower, upper));
        self
    }

    /// Enables the lower and upper auto EFO bounds.
    #[must_use]
    pub fn with_efo_bounds_enabled(mut self, lower: bool, upper: bool) -> Self {
        self.enable_efo_lower_threshold = lower;
        self.enable_efo_upper_threshold = upper;
        self
    }

    /// Enables the lower and upper auto CFR bounds.
    #[must_use]
    pub fn with_cfr_bounds_enabled(mut self, lower: bool, upper: bool) -> Self {
        self.enable_cfr_lower_threshold = lower;
        self.enable_cfr_upper_threshold = upper;
        self
    }

    /// Sets the CFR MAD multiplier.
    #[must_use]
    pub fn with_cfr_threshold_factor(mut self, factor: f64) -> Self {
        self.cfr_threshold_factor = factor;
        self
    }

    /// Sets the EFO peak prominence and median filter window.
    #[must_use]
    pub fn with_peak_detection(mut self, min_relative_prominence: f64, filter_support: usize) -> Self {
        self.min_efo_relative_peak_prominence = min_relative_prominence;
        self.median_efo_filter_support = filter_support;
        self
    }

    /// Sets the refractive-index correction for z.
    #[must_use]
    pub fn with_z_scaling_factor(mut self, factor: f64) -> Self {
        self.z_scaling_factor = factor;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = AnalysisConfig::default();
        assert_eq!(config.min_num_loc_per_trace, 1);
        assert!(config.enable_efo_upper_threshold);
        assert!(!config.enable_efo_lower_threshold);
        assert_eq!(config.cfr_threshold_factor, 2.0);
        assert_eq!(config.median_efo_filter_support, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_loading_partial() {
        let json = r#"{
            "min_num_loc_per_trace": 4,
            "efo_thresholds": [10000.0, 90000.0],
            "cfr_threshold_factor": 1.5
        }"#;
        let config = AnalysisConfig::from_json(json).unwrap();
        assert_eq!(config.min_num_loc_per_trace, 4);
        assert_eq!(config.efo_thresholds, Some((10_000.0, 90_000.0)));
        assert_eq!(config.cfr_threshold_factor, 1.5);
        assert_eq!(config.gmm_efo_num_clusters, 3);
    }

    #[test]
    fn test_json_rejects_invalid() {
        assert!(AnalysisConfig::from_json(r#"{"median_efo_filter_support": 0}"#).is_err());
        assert!(AnalysisConfig::from_json(r#"{"cfr_thresholds": [2.0, 1.0]}"#).is_err());
        assert!(AnalysisConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"z_scaling_factor": 0.7}}"#).unwrap();
        let config = AnalysisConfig::from_file(file.path()).unwrap();
        assert_eq!(config.z_scaling_factor, 0.7);
    }

    #[test]
    fn test_reset_and_full_reset() {
        let mut config = AnalysisConfig::default()
            .with_min_num_loc_per_trace(3)
            .with_efo_thresholds(1.0, 2.0)
            .with_cfr_thresholds(0.1, 0.8);
        config.reset();
        assert_eq!(config.efo_thresholds, None);
        assert_eq!(config.cfr_thresholds, None);
        assert_eq!(config.min_num_loc_per_trace, 3);

        config.full_reset();
        assert_eq!(config, AnalysisConfig::default());
    }

    #[test]
    fn test_json_round_trip_via_to_json() {
        let config = AnalysisConfig::default().with_cfr_bounds_enabled(true, false);
        let back = AnalysisConfig::from_json(&config.to_json().unwrap()).unwrap();
        assert_eq!(back, config);
    }
}
