//! Filtering of a decoded acquisition.
//!
//! The processor keeps the decoded table untouched and re-derives the
//! filtered view from it on every change, so applying the same filters
//! twice yields the same table.

use crate::histogram::{prepare_histogram, BinningMode};
use crate::robust::{first_peak_bounds, robust_threshold};
use crate::signal::nan_min_max;
use minflux_core::{
    AcquisitionInfo, AnalysisConfig, Column, Error, LocalizationTable, Result, TraceStatistics,
};
use std::cell::OnceCell;
use std::collections::{BTreeMap, HashMap};

/// Where the processor stands in its filter life cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPhase {
    /// The filtered table equals the decoded table.
    Unfiltered,
    /// Only the minimum-localizations-per-trace filter is active.
    GlobalFiltered,
    /// At least one column range filter is active.
    RangeFiltered,
}

/// Active filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterState {
    /// Traces with fewer rows (after range filtering) are dropped.
    pub min_num_loc_per_trace: usize,
    /// Open `(min, max)` interval per column.
    pub range_filters: BTreeMap<Column, (f64, f64)>,
}

/// Applies global and range filters to a decoded table and caches the
/// per-trace statistics of the result.
#[derive(Debug)]
pub struct DatasetProcessor {
    processed: LocalizationTable,
    info: AcquisitionInfo,
    filtered: LocalizationTable,
    state: FilterState,
    phase: FilterPhase,
    stats: OnceCell<TraceStatistics>,
}

impl DatasetProcessor {
    /// Wraps a decoded table. No filter is active yet.
    #[must_use]
    pub fn new(processed: LocalizationTable, info: AcquisitionInfo) -> Self {
        Self {
            filtered: processed.clone(),
            processed,
            info,
            state: FilterState::default(),
            phase: FilterPhase::Unfiltered,
            stats: OnceCell::new(),
        }
    }

    /// Wraps a decoded table and applies the global filters of `config`.
    ///
    /// # Errors
    /// See [`Self::apply_global_filters`].
    pub fn with_config(
        processed: LocalizationTable,
        info: AcquisitionInfo,
        config: &AnalysisConfig,
    ) -> Result<Self> {
        let mut processor = Self::new(processed, info);
        processor.apply_global_filters(config)?;
        Ok(processor)
    }

    /// Whether the acquisition carries z positions.
    #[must_use]
    pub fn is_3d(&self) -> bool {
        self.info.is_3d()
    }

    /// Acquisition metadata of the wrapped table.
    #[must_use]
    pub fn info(&self) -> &AcquisitionInfo {
        &self.info
    }

    /// Number of rows left after filtering.
    #[must_use]
    pub fn num_values(&self) -> usize {
        self.filtered.len()
    }

    /// The decoded table, unfiltered.
    #[must_use]
    pub fn processed(&self) -> &LocalizationTable {
        &self.processed
    }

    /// The table with every active filter applied.
    #[must_use]
    pub fn filtered(&self) -> &LocalizationTable {
        &self.filtered
    }

    /// Filters currently applied.
    #[must_use]
    pub fn filter_state(&self) -> &FilterState {
        &self.state
    }

    /// Current filter phase.
    #[must_use]
    pub fn phase(&self) -> FilterPhase {
        self.phase
    }

    /// Per-trace statistics of the filtered table, computed on first use
    /// after each change.
    #[must_use]
    pub fn filtered_stats(&self) -> &TraceStatistics {
        self.stats
            .get_or_init(|| TraceStatistics::from_table(&self.filtered))
    }

    /// Sets the minimum number of localizations per trace from `config`
    /// and re-derives the filtered table. Active range filters are kept.
    ///
    /// # Errors
    /// Propagates table errors; the previous state is kept on failure.
    pub fn apply_global_filters(&mut self, config: &AnalysisConfig) -> Result<()> {
        let mut state = self.state.clone();
        state.min_num_loc_per_trace = config.min_num_loc_per_trace;
        let phase = if state.range_filters.is_empty() {
            FilterPhase::GlobalFiltered
        } else {
            FilterPhase::RangeFiltered
        };
        self.commit(state, phase)
    }

    /// Keeps rows whose `column` value lies strictly between `min` and
    /// `max`, replacing any earlier range on the same column.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for NaN or reversed bounds.
    pub fn apply_range_filter(&mut self, column: Column, min: f64, max: f64) -> Result<()> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(Error::InvalidParameter(format!(
                "invalid {column} range ({min}, {max})"
            )));
        }
        let mut state = self.state.clone();
        state.range_filters.insert(column, (min, max));
        self.commit(state, FilterPhase::RangeFiltered)
    }

    /// Drops every range filter; the global filter stays active.
    ///
    /// # Errors
    /// Propagates table errors; the previous state is kept on failure.
    pub fn reset(&mut self) -> Result<()> {
        let mut state = self.state.clone();
        state.range_filters.clear();
        let phase = match self.phase {
            FilterPhase::Unfiltered => FilterPhase::Unfiltered,
            FilterPhase::GlobalFiltered | FilterPhase::RangeFiltered => {
                FilterPhase::GlobalFiltered
            }
        };
        self.commit(state, phase)
    }

    /// Re-derives the filtered table from the decoded one and swaps it in
    /// together with the new state.
    fn commit(&mut self, state: FilterState, phase: FilterPhase) -> Result<()> {
        let filtered = derive(&self.processed, &state)?;
        log::debug!(
            "filters {:?}: {} of {} rows kept",
            phase,
            filtered.len(),
            self.processed.len()
        );
        self.filtered = filtered;
        self.state = state;
        self.phase = phase;
        self.stats = OnceCell::new();
        Ok(())
    }

    /// Copy of the filtered rows at `indices`.
    ///
    /// # Errors
    /// Returns `InvalidParameter` for out-of-bounds indices.
    pub fn subset_by_indices(&self, indices: &[usize]) -> Result<LocalizationTable> {
        self.filtered.select(indices)
    }

    /// Copy of the filtered rows with `x` in `[x0, x1)` and `y` in
    /// `[y0, y1)`. Reversed ranges are swapped.
    ///
    /// # Errors
    /// Propagates table errors.
    pub fn subset_by_xy_range(
        &self,
        x_range: (f64, f64),
        y_range: (f64, f64),
    ) -> Result<LocalizationTable> {
        let ordered = |(a, b): (f64, f64)| if b < a { (b, a) } else { (a, b) };
        let (x0, x1) = ordered(x_range);
        let (y0, y1) = ordered(y_range);
        let mask: Vec<bool> = self
            .filtered
            .x
            .iter()
            .zip(&self.filtered.y)
            .map(|(&x, &y)| x >= x0 && x < x1 && y >= y0 && y < y1)
            .collect();
        self.filtered.filter_mask(&mask)
    }

    /// EFO thresholds from the first peak of the filtered EFO histogram.
    ///
    /// Bounds that are not enabled in `config` keep the current thresholds,
    /// or the data range when none are set. Returns `Ok(None)` when both
    /// bounds are disabled or the histogram has no qualifying peak. The
    /// thresholds are not applied.
    ///
    /// # Errors
    /// Returns `EmptyInput` when no EFO values are left.
    pub fn auto_efo_thresholds(&self, config: &AnalysisConfig) -> Result<Option<(f64, f64)>> {
        if !config.enable_efo_lower_threshold && !config.enable_efo_upper_threshold {
            return Ok(None);
        }
        let efo = &self.filtered.efo;
        let current = match config.efo_thresholds {
            Some(t) => t,
            None => nan_min_max(efo).ok_or(Error::EmptyInput)?,
        };
        let (counts, spec) = prepare_histogram(efo, BinningMode::FreedmanDiaconis, true)?;
        let bounds = first_peak_bounds(
            &counts,
            &spec.centers,
            config.min_efo_relative_peak_prominence,
            config.median_efo_filter_support,
        )?;
        Ok(bounds.map(|(lower, upper)| {
            (
                if config.enable_efo_lower_threshold { lower } else { current.0 },
                if config.enable_efo_upper_threshold { upper } else { current.1 },
            )
        }))
    }

    /// CFR thresholds from the median/MAD band of the filtered CFR values
    /// at `config.cfr_threshold_factor`.
    ///
    /// Bound selection follows [`Self::auto_efo_thresholds`]. Returns
    /// `Ok(None)` when both bounds are disabled or no CFR values are left.
    ///
    /// # Errors
    /// Currently infallible; the signature matches the EFO variant.
    pub fn auto_cfr_thresholds(&self, config: &AnalysisConfig) -> Result<Option<(f64, f64)>> {
        if !config.enable_cfr_lower_threshold && !config.enable_cfr_upper_threshold {
            return Ok(None);
        }
        let cfr = &self.filtered.cfr;
        let Some(band) = robust_threshold(cfr, config.cfr_threshold_factor) else {
            return Ok(None);
        };
        let current = config
            .cfr_thresholds
            .or_else(|| nan_min_max(cfr))
            .unwrap_or((band.lower, band.upper));
        Ok(Some((
            if config.enable_cfr_lower_threshold { band.lower } else { current.0 },
            if config.enable_cfr_upper_threshold { band.upper } else { current.1 },
        )))
    }
}

/// Applies `state` to `table`: range filters first, then the per-trace
/// minimum over the rows that survived them.
fn derive(table: &LocalizationTable, state: &FilterState) -> Result<LocalizationTable> {
    let mut keep = vec![true; table.len()];
    for (&column, &(min, max)) in &state.range_filters {
        for (k, v) in keep.iter_mut().zip(table.values(column)) {
            *k &= v > min && v < max;
        }
    }

    if state.min_num_loc_per_trace > 1 {
        let mut counts: HashMap<i64, usize> = HashMap::new();
        for (&tid, &kept) in table.tid.iter().zip(&keep) {
            if kept {
                *counts.entry(tid).or_default() += 1;
            }
        }
        for (k, tid) in keep.iter_mut().zip(&table.tid) {
            *k &= counts.get(tid).copied().unwrap_or(0) >= state.min_num_loc_per_trace;
        }
    }
    table.filter_mask(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use minflux_core::{AcquisitionKind, LocalizationRecord};

    fn info() -> AcquisitionInfo {
        AcquisitionInfo::new(AcquisitionKind::Localization2D, 5, 1.0)
    }

    /// Traces 1..=3 with 1, 2 and 3 rows; `efo` and `cfr` grow with the row.
    fn sample() -> LocalizationTable {
        let mut rows = Vec::new();
        let mut k = 0.0;
        for (tid, len) in [(1, 1), (2, 2), (3, 3)] {
            for _ in 0..len {
                k += 1.0;
                rows.push(LocalizationRecord::new(
                    tid,
                    k,
                    [k * 10.0, k * 20.0, 0.0],
                    1000.0 * k,
                    0.1 * k,
                    100.0,
                    0.5,
                    1,
                ));
            }
        }
        rows.into_iter().collect()
    }

    #[test]
    fn test_global_filter_is_idempotent() {
        let config = AnalysisConfig::default().with_min_num_loc_per_trace(2);
        let mut p = DatasetProcessor::new(sample(), info());
        assert_eq!(p.phase(), FilterPhase::Unfiltered);
        assert_eq!(p.num_values(), 6);

        p.apply_global_filters(&config).unwrap();
        let first = p.filtered().clone();
        p.apply_global_filters(&config).unwrap();
        assert_eq!(p.filtered(), &first);
        assert_eq!(p.num_values(), 5);
        assert_eq!(p.phase(), FilterPhase::GlobalFiltered);
        assert_eq!(p.filtered_stats().n, vec![2, 3]);
    }

    #[test]
    fn test_range_filter_then_min_locs() {
        let config = AnalysisConfig::default().with_min_num_loc_per_trace(2);
        let mut p = DatasetProcessor::with_config(sample(), info(), &config).unwrap();
        // efo = 1000..6000; keep 2500 < efo < 5500 -> rows 3, 4, 5.
        p.apply_range_filter(Column::Efo, 2500.0, 5500.0).unwrap();
        assert_eq!(p.phase(), FilterPhase::RangeFiltered);
        // Trace 2 keeps a single row and falls below the minimum.
        assert_eq!(p.filtered().tid, vec![3, 3]);
        assert_eq!(p.filtered_stats().tid, vec![3]);

        // Replacing the range re-derives from the decoded table.
        p.apply_range_filter(Column::Efo, 0.0, 10_000.0).unwrap();
        assert_eq!(p.num_values(), 5);
        assert_eq!(p.filter_state().range_filters.len(), 1);
    }

    #[test]
    fn test_reset_keeps_global_filter() {
        let config = AnalysisConfig::default().with_min_num_loc_per_trace(3);
        let mut p = DatasetProcessor::with_config(sample(), info(), &config).unwrap();
        p.apply_range_filter(Column::Cfr, 0.0, 0.45).unwrap();
        assert_eq!(p.num_values(), 0);
        p.reset().unwrap();
        assert_eq!(p.phase(), FilterPhase::GlobalFiltered);
        assert!(p.filter_state().range_filters.is_empty());
        assert_eq!(p.filtered().tid, vec![3, 3, 3]);
    }

    #[test]
    fn test_invalid_range_is_rejected() {
        let mut p = DatasetProcessor::new(sample(), info());
        assert!(matches!(
            p.apply_range_filter(Column::Efo, 5.0, 1.0),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            p.apply_range_filter(Column::Cfr, f64::NAN, 1.0),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(p.phase(), FilterPhase::Unfiltered);
        assert_eq!(p.num_values(), 6);
    }

    #[test]
    fn test_subsets() {
        let p = DatasetProcessor::new(sample(), info());
        let subset = p.subset_by_indices(&[5, 0]).unwrap();
        assert_eq!(subset.tid, vec![3, 1]);
        assert!(p.subset_by_indices(&[6]).is_err());

        // x = 10..60, y = 20..120; reversed x range is swapped.
        let region = p.subset_by_xy_range((40.0, 20.0), (0.0, 100.0)).unwrap();
        assert_eq!(region.x, vec![20.0, 30.0]);
    }

    #[test]
    fn test_auto_cfr_thresholds() {
        let p = DatasetProcessor::new(sample(), info());
        let config = AnalysisConfig::default();
        let (lower, upper) = p.auto_cfr_thresholds(&config).unwrap().unwrap();
        // Lower bound disabled by default: the data minimum is kept.
        assert_relative_eq!(lower, 0.1);
        let band = robust_threshold(&p.filtered().cfr, 2.0).unwrap();
        assert_relative_eq!(upper, band.upper);

        let disabled = config.with_cfr_bounds_enabled(false, false);
        assert_eq!(p.auto_cfr_thresholds(&disabled).unwrap(), None);
    }

    #[test]
    fn test_auto_efo_thresholds_disabled() {
        let p = DatasetProcessor::new(sample(), info());
        let config = AnalysisConfig::default().with_efo_bounds_enabled(false, false);
        assert_eq!(p.auto_efo_thresholds(&config).unwrap(), None);
        assert!(!p.is_3d());
    }
}
