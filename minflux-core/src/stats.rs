//! Per-trace aggregate statistics.

use crate::table::LocalizationTable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean and sample standard deviation of the positions of each trace.
///
/// Rows are sorted by trace id. A trace with a single localization has a
/// standard deviation of 0.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceStatistics {
    /// Trace id.
    pub tid: Vec<i64>,
    /// Localizations in the trace.
    pub n: Vec<usize>,
    /// Mean x (nm).
    pub mx: Vec<f64>,
    /// Mean y (nm).
    pub my: Vec<f64>,
    /// Mean z (nm).
    pub mz: Vec<f64>,
    /// Standard deviation of x (nm).
    pub sx: Vec<f64>,
    /// Standard deviation of y (nm).
    pub sy: Vec<f64>,
    /// Standard deviation of z (nm).
    pub sz: Vec<f64>,
}

impl TraceStatistics {
    /// Groups `table` by trace id.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_table(table: &LocalizationTable) -> Self {
        let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, &tid) in table.tid.iter().enumerate() {
            groups.entry(tid).or_default().push(i);
        }

        let columns = [&table.x, &table.y, &table.z];
        let mut stats = Self::with_capacity(groups.len());
        for (tid, rows) in groups {
            let n = rows.len() as f64;
            let mean = columns.map(|c| rows.iter().map(|&i| c[i]).sum::<f64>() / n);
            let std = if rows.len() > 1 {
                let mut out = [0.0; 3];
                for (axis, c) in columns.iter().enumerate() {
                    let ss: f64 = rows.iter().map(|&i| (c[i] - mean[axis]).powi(2)).sum();
                    out[axis] = (ss / (n - 1.0)).sqrt();
                }
                out
            } else {
                [0.0; 3]
            };
            stats.tid.push(tid);
            stats.n.push(rows.len());
            stats.mx.push(mean[0]);
            stats.my.push(mean[1]);
            stats.mz.push(mean[2]);
            stats.sx.push(std[0]);
            stats.sy.push(std[1]);
            stats.sz.push(std[2]);
        }
        stats
    }

    fn with_capacity(capacity: usize) -> Self {
        Self {
            tid: Vec::with_capacity(capacity),
            n: Vec::with_capacity(capacity),
            mx: Vec::with_capacity(capacity),
            my: Vec::with_capacity(capacity),
            mz: Vec::with_capacity(capacity),
            sx: Vec::with_capacity(capacity),
            sy: Vec::with_capacity(capacity),
            sz: Vec::with_capacity(capacity),
        }
    }

    /// Number of traces.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tid.len()
    }

    /// True if there are no traces.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tid.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LocalizationRecord;
    use approx::assert_relative_eq;

    #[test]
    fn test_grouping_sorted_by_tid() {
        let table: LocalizationTable = [(7, 1.0), (2, 10.0), (7, 3.0), (2, 14.0), (2, 12.0)]
            .into_iter()
            .map(|(tid, x)| LocalizationRecord::new(tid, 0.0, [x, 2.0 * x, 0.0], 1.0, 0.0, 1.0, 0.0, 1))
            .collect();
        let stats = TraceStatistics::from_table(&table);
        assert_eq!(stats.tid, vec![2, 7]);
        assert_eq!(stats.n, vec![3, 2]);
        assert_relative_eq!(stats.mx[0], 12.0);
        assert_relative_eq!(stats.sx[0], 2.0);
        assert_relative_eq!(stats.sy[0], 4.0);
        assert_relative_eq!(stats.sx[1], std::f64::consts::SQRT_2);
        assert_eq!(stats.sz[1], 0.0);
    }

    #[test]
    fn test_single_localization_has_zero_spread() {
        let table: LocalizationTable =
            std::iter::once(LocalizationRecord::new(1, 0.0, [5.0, 5.0, 5.0], 1.0, 0.0, 1.0, 0.0, 1))
                .collect();
        let stats = TraceStatistics::from_table(&table);
        assert_eq!(stats.len(), 1);
        assert_eq!((stats.sx[0], stats.sy[0], stats.sz[0]), (0.0, 0.0, 0.0));
    }
}
