//! Columnar localization table.
//!
//! `LocalizationTable` stores decoded localizations in parallel vectors
//! (structure of arrays). Filters, renderers and histograms all work on
//! whole columns, so this layout avoids gathering fields row by row.

use crate::error::{Error, Result};
use crate::record::{dwell_time, LocalizationRecord};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Column of the processed localization table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Column {
    /// Trace id.
    Tid,
    /// Acquisition time (s).
    Tim,
    /// Position x (nm).
    X,
    /// Position y (nm).
    Y,
    /// Position z (nm).
    Z,
    /// Emission frequency (Hz).
    Efo,
    /// Center-frequency ratio.
    Cfr,
    /// Effective photon count.
    Eco,
    /// Detector count ratio.
    Dcr,
    /// Dwell time (ms).
    Dwell,
    /// Fluorophore id.
    Fluo,
}

impl Column {
    /// Processed column order.
    pub const ALL: [Column; 11] = [
        Column::Tid,
        Column::Tim,
        Column::X,
        Column::Y,
        Column::Z,
        Column::Efo,
        Column::Cfr,
        Column::Eco,
        Column::Dcr,
        Column::Dwell,
        Column::Fluo,
    ];

    /// Column name as used in exported tables.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Column::Tid => "tid",
            Column::Tim => "tim",
            Column::X => "x",
            Column::Y => "y",
            Column::Z => "z",
            Column::Efo => "efo",
            Column::Cfr => "cfr",
            Column::Eco => "eco",
            Column::Dcr => "dcr",
            Column::Dwell => "dwell",
            Column::Fluo => "fluo",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Column::ALL
            .into_iter()
            .find(|c| c.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::UnknownColumn(s.to_string()))
    }
}

/// Decoded localizations in structure-of-arrays layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalizationTable {
    /// Trace id.
    pub tid: Vec<i64>,
    /// Acquisition time (s).
    pub tim: Vec<f64>,
    /// Position x (nm).
    pub x: Vec<f64>,
    /// Position y (nm).
    pub y: Vec<f64>,
    /// Position z (nm).
    pub z: Vec<f64>,
    /// Emission frequency (Hz).
    pub efo: Vec<f64>,
    /// Center-frequency ratio.
    pub cfr: Vec<f64>,
    /// Effective photon count.
    pub eco: Vec<f64>,
    /// Detector count ratio.
    pub dcr: Vec<f64>,
    /// Dwell time (ms).
    pub dwell: Vec<f64>,
    /// Fluorophore id.
    pub fluo: Vec<i32>,
}

impl LocalizationTable {
    /// Creates an empty table with the given row capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tid: Vec::with_capacity(capacity),
            tim: Vec::with_capacity(capacity),
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            efo: Vec::with_capacity(capacity),
            cfr: Vec::with_capacity(capacity),
            eco: Vec::with_capacity(capacity),
            dcr: Vec::with_capacity(capacity),
            dwell: Vec::with_capacity(capacity),
            fluo: Vec::with_capacity(capacity),
        }
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tid.len()
    }

    /// True if the table has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tid.is_empty()
    }

    /// Removes every row.
    pub fn clear(&mut self) {
        self.tid.clear();
        self.tim.clear();
        self.x.clear();
        self.y.clear();
        self.z.clear();
        self.efo.clear();
        self.cfr.clear();
        self.eco.clear();
        self.dcr.clear();
        self.dwell.clear();
        self.fluo.clear();
    }

    /// Appends a record. `dwell` is recomputed from `eco` and `efo`.
    pub fn push(&mut self, record: &LocalizationRecord) {
        self.tid.push(record.tid);
        self.tim.push(record.tim);
        self.x.push(record.x);
        self.y.push(record.y);
        self.z.push(record.z);
        self.efo.push(record.efo);
        self.cfr.push(record.cfr);
        self.eco.push(record.eco);
        self.dcr.push(record.dcr);
        self.dwell.push(dwell_time(record.eco, record.efo));
        self.fluo.push(record.fluo);
    }

    /// Appends all rows of another table.
    pub fn append(&mut self, other: &LocalizationTable) {
        self.tid.extend_from_slice(&other.tid);
        self.tim.extend_from_slice(&other.tim);
        self.x.extend_from_slice(&other.x);
        self.y.extend_from_slice(&other.y);
        self.z.extend_from_slice(&other.z);
        self.efo.extend_from_slice(&other.efo);
        self.cfr.extend_from_slice(&other.cfr);
        self.eco.extend_from_slice(&other.eco);
        self.dcr.extend_from_slice(&other.dcr);
        self.dwell.extend_from_slice(&other.dwell);
        self.fluo.extend_from_slice(&other.fluo);
    }

    /// Returns row `index` as a record.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<LocalizationRecord> {
        if index >= self.len() {
            return None;
        }
        Some(LocalizationRecord {
            tid: self.tid[index],
            tim: self.tim[index],
            x: self.x[index],
            y: self.y[index],
            z: self.z[index],
            efo: self.efo[index],
            cfr: self.cfr[index],
            eco: self.eco[index],
            dcr: self.dcr[index],
            dwell: self.dwell[index],
            fluo: self.fluo[index],
        })
    }

    /// Iterates over rows as records.
    pub fn records(&self) -> impl Iterator<Item = LocalizationRecord> + '_ {
        (0..self.len()).filter_map(|i| self.get(i))
    }

    /// Borrow a floating point column. `Tid` and `Fluo` are integer columns
    /// and return `None`; use [`Self::values`] for a converted copy.
    #[must_use]
    pub fn f64_column(&self, column: Column) -> Option<&[f64]> {
        match column {
            Column::Tim => Some(&self.tim),
            Column::X => Some(&self.x),
            Column::Y => Some(&self.y),
            Column::Z => Some(&self.z),
            Column::Efo => Some(&self.efo),
            Column::Cfr => Some(&self.cfr),
            Column::Eco => Some(&self.eco),
            Column::Dcr => Some(&self.dcr),
            Column::Dwell => Some(&self.dwell),
            Column::Tid | Column::Fluo => None,
        }
    }

    /// Copy of any column as `f64`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn values(&self, column: Column) -> Vec<f64> {
        match column {
            Column::Tid => self.tid.iter().map(|&v| v as f64).collect(),
            Column::Fluo => self.fluo.iter().map(|&v| f64::from(v)).collect(),
            other => self.f64_column(other).map(<[f64]>::to_vec).unwrap_or_default(),
        }
    }

    /// Copies the rows at `indices`, in the given order.
    ///
    /// # Errors
    /// Returns `InvalidParameter` if any index is out of bounds.
    pub fn select(&self, indices: &[usize]) -> Result<Self> {
        let len = self.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(Error::InvalidParameter(format!(
                "row index {bad} out of bounds for table of {len} rows"
            )));
        }
        let mut out = Self::with_capacity(indices.len());
        for &i in indices {
            out.tid.push(self.tid[i]);
            out.tim.push(self.tim[i]);
            out.x.push(self.x[i]);
            out.y.push(self.y[i]);
            out.z.push(self.z[i]);
            out.efo.push(self.efo[i]);
            out.cfr.push(self.cfr[i]);
            out.eco.push(self.eco[i]);
            out.dcr.push(self.dcr[i]);
            out.dwell.push(self.dwell[i]);
            out.fluo.push(self.fluo[i]);
        }
        Ok(out)
    }

    /// Keeps the rows where `mask` is true.
    ///
    /// # Errors
    /// Returns `LengthMismatch` if the mask length differs from the table length.
    pub fn filter_mask(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.len() {
            return Err(Error::LengthMismatch {
                expected: self.len(),
                actual: mask.len(),
            });
        }
        let indices: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &keep)| keep.then_some(i))
            .collect();
        self.select(&indices)
    }
}

impl FromIterator<LocalizationRecord> for LocalizationTable {
    fn from_iter<I: IntoIterator<Item = LocalizationRecord>>(iter: I) -> Self {
        let mut table = Self::default();
        for record in iter {
            table.push(&record);
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> LocalizationTable {
        (0..4)
            .map(|i| {
                let v = f64::from(i);
                LocalizationRecord::new(i64::from(i / 2), v, [v, -v, 0.0], 10_000.0, 0.5, 20.0, 0.3, 1)
            })
            .collect()
    }

    #[test]
    fn test_table_operations() {
        let mut table = sample();
        assert_eq!(table.len(), 4);
        assert_eq!(table.dwell[0], 2.0);

        let other = sample();
        table.append(&other);
        assert_eq!(table.len(), 8);

        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_select_and_mask() {
        let table = sample();
        let picked = table.select(&[3, 1]).unwrap();
        assert_eq!(picked.x, vec![3.0, 1.0]);
        assert!(table.select(&[9]).is_err());

        let masked = table.filter_mask(&[true, false, false, true]).unwrap();
        assert_eq!(masked.tid, vec![0, 1]);
        assert!(matches!(
            table.filter_mask(&[true]),
            Err(Error::LengthMismatch { expected: 4, actual: 1 })
        ));
    }

    #[test]
    fn test_column_names_round_trip() {
        for column in Column::ALL {
            assert_eq!(column.name().parse::<Column>().unwrap(), column);
        }
        assert_eq!("EFO".parse::<Column>().unwrap(), Column::Efo);
        assert!("loc".parse::<Column>().is_err());
    }

    #[test]
    fn test_values_converts_integer_columns() {
        let table = sample();
        assert_eq!(table.values(Column::Tid), vec![0.0, 0.0, 1.0, 1.0]);
        assert!(table.f64_column(Column::Fluo).is_none());
        assert_eq!(table.f64_column(Column::Y).unwrap()[2], -2.0);
    }
}
