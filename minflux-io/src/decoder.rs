//! Record decoding.
//!
//! [`RecordDecoder`] turns a [`RawIterationArray`] into a flat
//! [`LocalizationTable`]: it resolves the acquisition kind and the
//! per-field iteration indices, selects events by validity flag, and
//! applies unit and z scaling.

use crate::raw::{IterationField, RawIterationArray};
use crate::validity::{find_last_valid_iteration, IterationIndices, DEFAULT_MIN_VALID_FRACTION};
use crate::{Error, Result};
use minflux_core::{AcquisitionInfo, AcquisitionKind, LocalizationRecord, LocalizationTable};
use std::collections::HashMap;

/// Decoder options.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodeOptions {
    /// Keep events whose `vld` flag equals this value.
    pub keep_valid: bool,
    /// Refractive-index correction applied to z.
    pub z_scaling_factor: f64,
    /// The file holds a tracking acquisition.
    pub is_tracking: bool,
    /// Share of events that must be populated at a field's resolved iteration.
    pub min_valid_fraction: f64,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            keep_valid: true,
            z_scaling_factor: 1.0,
            is_tracking: false,
            min_valid_fraction: DEFAULT_MIN_VALID_FRACTION,
        }
    }
}

impl DecodeOptions {
    /// Selects valid (`true`) or invalid (`false`) events.
    #[must_use]
    pub fn with_keep_valid(mut self, keep_valid: bool) -> Self {
        self.keep_valid = keep_valid;
        self
    }

    /// Sets the refractive-index correction for z.
    #[must_use]
    pub fn with_z_scaling_factor(mut self, factor: f64) -> Self {
        self.z_scaling_factor = factor;
        self
    }

    /// Marks the file as a tracking acquisition.
    #[must_use]
    pub fn with_tracking(mut self, is_tracking: bool) -> Self {
        self.is_tracking = is_tracking;
        self
    }

    /// Sets the populated share required by the iteration scan.
    #[must_use]
    pub fn with_min_valid_fraction(mut self, fraction: f64) -> Self {
        self.min_valid_fraction = fraction;
        self
    }
}

/// Layout facts resolved once per file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedLayout {
    /// Acquisition kind and scaling.
    pub info: AcquisitionInfo,
    /// Iteration read for each field.
    pub indices: IterationIndices,
}

/// Every iteration of every event, one row per (event, iteration).
///
/// `aid` numbers the rows that share a trace id, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawIterationTable {
    /// Trace id.
    pub tid: Vec<i64>,
    /// Row number within the trace.
    pub aid: Vec<usize>,
    /// Validity flag of the event.
    pub vld: Vec<bool>,
    /// Event time (s).
    pub tim: Vec<f64>,
    /// Position x (nm).
    pub x: Vec<f64>,
    /// Position y (nm).
    pub y: Vec<f64>,
    /// Position z (nm), scaled.
    pub z: Vec<f64>,
    /// Emission frequency (Hz).
    pub efo: Vec<f64>,
    /// Center-frequency ratio.
    pub cfr: Vec<f64>,
    /// Effective photon count.
    pub eco: Vec<f64>,
    /// Detector count ratio.
    pub dcr: Vec<f64>,
}

impl RawIterationTable {
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
}

/// Decodes MINFLUX record arrays.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordDecoder {
    options: DecodeOptions,
}

impl RecordDecoder {
    /// Creates a decoder with `options`.
    #[must_use]
    pub fn new(options: DecodeOptions) -> Self {
        Self { options }
    }

    /// Options the decoder was built with.
    #[must_use]
    pub fn options(&self) -> &DecodeOptions {
        &self.options
    }

    /// Resolves the acquisition kind and the per-field iteration indices.
    ///
    /// Dimensionality comes from the mean z of the last iteration over all
    /// events (NaNs ignored); aggregation from a single stored iteration.
    /// Aggregated files read every field at iteration 0 without scanning.
    ///
    /// # Errors
    /// Returns `NoEntries` for an empty array and `NoValidIteration` when a
    /// field never validates.
    pub fn resolve(&self, raw: &RawIterationArray<'_>) -> Result<ResolvedLayout> {
        if raw.is_empty() {
            return Err(Error::NoEntries { valid: true });
        }
        let num_iterations = raw.num_iterations();
        let is_3d = mean_last_z(raw).is_some_and(|z| z != 0.0);
        let is_aggregated = num_iterations == 1;
        let kind = AcquisitionKind::from_flags(is_3d, is_aggregated, self.options.is_tracking);
        let info = AcquisitionInfo::new(kind, num_iterations, self.options.z_scaling_factor);

        let indices = if is_aggregated {
            IterationIndices::uniform(0)
        } else {
            let mut events = raw.events_with_validity(true);
            if events.is_empty() {
                events = (0..raw.len()).collect();
            }
            find_last_valid_iteration(raw, &events, self.options.min_valid_fraction)?
        };
        log::debug!("{kind} acquisition, {num_iterations} iterations, indices {indices:?}");
        Ok(ResolvedLayout { info, indices })
    }

    /// Decodes `raw` into a localization table.
    ///
    /// # Errors
    /// Any error from [`Self::resolve`], or `NoEntries` when no event matches
    /// the requested validity flag. Failures are logged before returning.
    pub fn decode(&self, raw: &RawIterationArray<'_>) -> Result<LocalizationTable> {
        self.resolve(raw)
            .and_then(|layout| self.decode_with(raw, &layout))
            .inspect_err(|e| log::error!("decoding failed: {e}"))
    }

    /// Decodes `raw` with an already resolved layout.
    ///
    /// # Errors
    /// Returns `NoEntries` when no event matches the requested validity flag.
    pub fn decode_with(
        &self,
        raw: &RawIterationArray<'_>,
        layout: &ResolvedLayout,
    ) -> Result<LocalizationTable> {
        let events = raw.events_with_validity(self.options.keep_valid);
        if events.is_empty() {
            return Err(Error::NoEntries {
                valid: self.options.keep_valid,
            });
        }

        let fluo_ids = fluorophore_ids(raw, &events);
        let scale = layout.info.unit_scaling_factor;
        let z_scale = scale * layout.info.z_scaling_factor;
        let idx = layout.indices;

        let mut table = LocalizationTable::with_capacity(events.len());
        for (row, &e) in events.iter().enumerate() {
            let loc = raw.loc(e, idx.loc);
            let z = if layout.info.is_3d() { loc[2] * z_scale } else { 0.0 };
            table.push(&LocalizationRecord::new(
                raw.tid(e),
                raw.tim(e),
                [loc[0] * scale, loc[1] * scale, z],
                raw.value(e, idx.efo, IterationField::Efo),
                raw.value(e, idx.cfr, IterationField::Cfr),
                raw.value(e, idx.eco, IterationField::Eco),
                raw.value(e, idx.dcr, IterationField::Dcr),
                fluo_ids[row],
            ));
        }
        log::info!(
            "decoded {} {} entries from {} events",
            table.len(),
            if self.options.keep_valid { "valid" } else { "invalid" },
            raw.len()
        );
        Ok(table)
    }

    /// Expands every event into one row per stored iteration.
    ///
    /// Positions are scaled as in [`Self::decode`]; z is kept for 2D files
    /// as stored (normally 0).
    #[must_use]
    pub fn raw_table(&self, raw: &RawIterationArray<'_>, info: &AcquisitionInfo) -> RawIterationTable {
        let n = raw.len() * raw.num_iterations();
        let mut table = RawIterationTable {
            tid: Vec::with_capacity(n),
            aid: Vec::with_capacity(n),
            vld: Vec::with_capacity(n),
            tim: Vec::with_capacity(n),
            x: Vec::with_capacity(n),
            y: Vec::with_capacity(n),
            z: Vec::with_capacity(n),
            efo: Vec::with_capacity(n),
            cfr: Vec::with_capacity(n),
            eco: Vec::with_capacity(n),
            dcr: Vec::with_capacity(n),
        };
        let scale = info.unit_scaling_factor;
        let z_scale = scale * info.z_scaling_factor;
        let mut seen: HashMap<i64, usize> = HashMap::new();

        for e in 0..raw.len() {
            let tid = raw.tid(e);
            let vld = raw.vld(e);
            let tim = raw.tim(e);
            for it in 0..raw.num_iterations() {
                let counter = seen.entry(tid).or_insert(0);
                table.aid.push(*counter);
                *counter += 1;

                let loc = raw.loc(e, it);
                table.tid.push(tid);
                table.vld.push(vld);
                table.tim.push(tim);
                table.x.push(loc[0] * scale);
                table.y.push(loc[1] * scale);
                table.z.push(loc[2] * z_scale);
                table.efo.push(raw.value(e, it, IterationField::Efo));
                table.cfr.push(raw.value(e, it, IterationField::Cfr));
                table.eco.push(raw.value(e, it, IterationField::Eco));
                table.dcr.push(raw.value(e, it, IterationField::Dcr));
            }
        }
        table
    }
}

/// Decodes `raw` with default options apart from the validity flag and z scaling.
///
/// # Errors
/// See [`RecordDecoder::decode`].
pub fn decode(
    raw: &RawIterationArray<'_>,
    keep_valid: bool,
    z_scaling_factor: f64,
) -> Result<LocalizationTable> {
    RecordDecoder::new(
        DecodeOptions::default()
            .with_keep_valid(keep_valid)
            .with_z_scaling_factor(z_scaling_factor),
    )
    .decode(raw)
}

#[allow(clippy::cast_precision_loss)]
fn mean_last_z(raw: &RawIterationArray<'_>) -> Option<f64> {
    let last = raw.num_iterations() - 1;
    let (sum, count) = (0..raw.len())
        .map(|e| raw.loc(e, last)[2])
        .filter(|z| z.is_finite())
        .fold((0.0, 0usize), |(s, n), z| (s + z, n + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Fluorophore ids of the selected events; all 1 when the field is absent
/// or zero everywhere.
fn fluorophore_ids(raw: &RawIterationArray<'_>, events: &[usize]) -> Vec<i32> {
    let ids: Option<Vec<i64>> = events.iter().map(|&e| raw.fluo(e)).collect();
    match ids {
        Some(ids) if ids.iter().any(|&v| v != 0) => ids
            .into_iter()
            .map(|v| i32::try_from(v).unwrap_or(1))
            .collect(),
        _ => vec![1; events.len()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticAcquisition;
    use approx::assert_relative_eq;

    fn decode_bytes(bytes: &[u8], options: DecodeOptions) -> Result<LocalizationTable> {
        let raw = RawIterationArray::from_npy(bytes)?;
        RecordDecoder::new(options).decode(&raw)
    }

    #[test]
    fn test_decode_2d() {
        let synth = SyntheticAcquisition::localization_2d(&[1, 2, 5]).seed(11);
        let bytes = synth.to_npy_bytes().unwrap();
        let table = decode_bytes(&bytes, DecodeOptions::default()).unwrap();
        assert_eq!(table.len(), 8);
        assert_eq!(table.tid, vec![1, 2, 2, 3, 3, 3, 3, 3]);
        assert!(table.z.iter().all(|&z| z == 0.0));
        // Positions are in nanometers after scaling.
        assert!(table.x.iter().all(|&x| x.abs() > 1.0 && x.abs() < 1e5));
        for i in 0..table.len() {
            assert_eq!(table.dwell[i], minflux_core::dwell_time(table.eco[i], table.efo[i]));
        }
    }

    #[test]
    fn test_resolve_kinds() {
        let decoder = RecordDecoder::default();
        let bytes = SyntheticAcquisition::localization_3d(&[4]).to_npy_bytes().unwrap();
        let raw = RawIterationArray::from_npy(&bytes).unwrap();
        let layout = decoder.resolve(&raw).unwrap();
        assert_eq!(layout.info.kind, AcquisitionKind::Localization3D);
        assert_eq!(layout.info.num_iterations, 10);

        let tracking = RecordDecoder::new(DecodeOptions::default().with_tracking(true));
        let bytes = SyntheticAcquisition::localization_2d(&[4]).to_npy_bytes().unwrap();
        let raw = RawIterationArray::from_npy(&bytes).unwrap();
        assert_eq!(
            tracking.resolve(&raw).unwrap().info.kind,
            AcquisitionKind::Tracking2D
        );
    }

    #[test]
    fn test_aggregated_3d_uses_iteration_zero() {
        let bytes = SyntheticAcquisition::aggregated(&[2, 3], true).to_npy_bytes().unwrap();
        let raw = RawIterationArray::from_npy(&bytes).unwrap();
        let decoder = RecordDecoder::default();
        let layout = decoder.resolve(&raw).unwrap();
        assert!(layout.info.is_aggregated());
        assert!(layout.info.is_3d());
        assert_eq!(layout.indices, IterationIndices::uniform(0));

        let table = decoder.decode_with(&raw, &layout).unwrap();
        assert_eq!(table.len(), 5);
        let loc = raw.loc(0, 0);
        assert_relative_eq!(table.x[0], loc[0] * 1e9);
        assert_relative_eq!(table.z[0], loc[2] * 1e9);
        assert_eq!(table.efo[0], raw.value(0, 0, IterationField::Efo));
    }

    #[test]
    fn test_z_scaling_applies_to_z_only() {
        let bytes = SyntheticAcquisition::localization_3d(&[3]).seed(5).to_npy_bytes().unwrap();
        let plain = decode_bytes(&bytes, DecodeOptions::default()).unwrap();
        let scaled =
            decode_bytes(&bytes, DecodeOptions::default().with_z_scaling_factor(0.5)).unwrap();
        assert_eq!(plain.x, scaled.x);
        for (a, b) in plain.z.iter().zip(&scaled.z) {
            assert_relative_eq!(*a * 0.5, *b);
        }
    }

    #[test]
    fn test_per_field_depths_are_used() {
        let bytes = SyntheticAcquisition::localization_3d(&[2])
            .field_depth(IterationField::Cfr, 6)
            .to_npy_bytes().unwrap();
        let raw = RawIterationArray::from_npy(&bytes).unwrap();
        let table = RecordDecoder::default().decode(&raw).unwrap();
        assert_eq!(table.cfr[0], raw.value(0, 6, IterationField::Cfr));
        assert!(table.cfr.iter().all(|v| v.is_finite()));
        assert_eq!(table.efo[0], raw.value(0, 9, IterationField::Efo));
    }

    #[test]
    fn test_validity_selection() {
        let bytes = SyntheticAcquisition::localization_2d(&[3])
            .invalid_events(2)
            .to_npy_bytes().unwrap();
        let valid = decode_bytes(&bytes, DecodeOptions::default()).unwrap();
        assert_eq!(valid.len(), 3);
        let invalid =
            decode_bytes(&bytes, DecodeOptions::default().with_keep_valid(false)).unwrap();
        assert_eq!(invalid.len(), 2);

        let clean = SyntheticAcquisition::localization_2d(&[3]).to_npy_bytes().unwrap();
        assert!(matches!(
            decode_bytes(&clean, DecodeOptions::default().with_keep_valid(false)),
            Err(Error::NoEntries { valid: false })
        ));
    }

    #[test]
    fn test_fluorophore_defaults() {
        let bytes = SyntheticAcquisition::localization_2d(&[2]).without_fluo().to_npy_bytes().unwrap();
        let table = decode_bytes(&bytes, DecodeOptions::default()).unwrap();
        assert_eq!(table.fluo, vec![1, 1]);

        let bytes = SyntheticAcquisition::localization_2d(&[2]).fluorophore(0).to_npy_bytes().unwrap();
        let table = decode_bytes(&bytes, DecodeOptions::default()).unwrap();
        assert_eq!(table.fluo, vec![1, 1]);

        let bytes = SyntheticAcquisition::localization_2d(&[2]).fluorophore(2).to_npy_bytes().unwrap();
        let table = decode_bytes(&bytes, DecodeOptions::default()).unwrap();
        assert_eq!(table.fluo, vec![2, 2]);
    }

    #[test]
    fn test_empty_array_fails() {
        let bytes = SyntheticAcquisition::localization_2d(&[]).to_npy_bytes().unwrap();
        assert!(matches!(
            decode_bytes(&bytes, DecodeOptions::default()),
            Err(Error::NoEntries { .. })
        ));
    }

    #[test]
    fn test_raw_table_expands_iterations() {
        let bytes = SyntheticAcquisition::localization_2d(&[2, 1]).to_npy_bytes().unwrap();
        let raw = RawIterationArray::from_npy(&bytes).unwrap();
        let decoder = RecordDecoder::default();
        let layout = decoder.resolve(&raw).unwrap();
        let table = decoder.raw_table(&raw, &layout.info);
        assert_eq!(table.len(), 15);
        assert_eq!(table.aid[..10], (0..10).collect::<Vec<_>>()[..]);
        assert_eq!(table.aid[10..], [0, 1, 2, 3, 4]);
        assert!(table.vld.iter().all(|&v| v));
    }
}
