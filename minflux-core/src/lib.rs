//! minflux-core: Core types for MINFLUX localization analysis.
//!
//! This crate provides the decoded localization table, acquisition
//! metadata, per-trace statistics and the analysis configuration shared
//! by the decoding and analysis crates.

#![warn(missing_docs)]

pub mod acquisition;
pub mod config;
pub mod error;
pub mod record;
pub mod stats;
pub mod table;

pub use acquisition::{AcquisitionInfo, AcquisitionKind, UNIT_SCALING_FACTOR};
pub use config::AnalysisConfig;
pub use error::{Error, Result};
pub use record::{dwell_time, LocalizationRecord};
pub use stats::TraceStatistics;
pub use table::{Column, LocalizationTable};
