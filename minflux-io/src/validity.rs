//! Last-valid-iteration scan.
//!
//! Fields of a MINFLUX iteration record are finalized at different depths
//! of the localization cycle (CFR, for instance, is often only measured up
//! to an intermediate iteration in 3D). The scan below finds, per field,
//! the deepest iteration at which the field is populated for most events.

use crate::raw::{IterationField, RawIterationArray};
use crate::{Error, Result};
use rayon::prelude::*;

/// Default share of events that must carry a value at an iteration.
pub const DEFAULT_MIN_VALID_FRACTION: f64 = 0.9;

/// Resolved iteration index per field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationIndices {
    /// Emission frequency.
    pub efo: usize,
    /// Center-frequency ratio.
    pub cfr: usize,
    /// Detector count ratio.
    pub dcr: usize,
    /// Effective photon count.
    pub eco: usize,
    /// Position.
    pub loc: usize,
}

impl IterationIndices {
    /// Same index for every field.
    #[must_use]
    pub fn uniform(index: usize) -> Self {
        Self {
            efo: index,
            cfr: index,
            dcr: index,
            eco: index,
            loc: index,
        }
    }

    /// Index resolved for `field`.
    #[must_use]
    pub fn get(&self, field: IterationField) -> usize {
        match field {
            IterationField::Efo => self.efo,
            IterationField::Cfr => self.cfr,
            IterationField::Dcr => self.dcr,
            IterationField::Eco => self.eco,
            IterationField::Loc => self.loc,
        }
    }

    pub(crate) fn set(&mut self, field: IterationField, index: usize) {
        match field {
            IterationField::Efo => self.efo = index,
            IterationField::Cfr => self.cfr = index,
            IterationField::Dcr => self.dcr = index,
            IterationField::Eco => self.eco = index,
            IterationField::Loc => self.loc = index,
        }
    }
}

/// A value counts as populated when it is finite and, under the strict
/// rule, non-zero. Positions need finite x and y, and under the strict
/// rule a point other than the origin.
fn is_populated(
    raw: &RawIterationArray<'_>,
    event: usize,
    iteration: usize,
    field: IterationField,
    strict: bool,
) -> bool {
    if field == IterationField::Loc {
        let [x, y, _] = raw.loc(event, iteration);
        x.is_finite() && y.is_finite() && (!strict || x != 0.0 || y != 0.0)
    } else {
        let v = raw.value(event, iteration, field);
        v.is_finite() && (!strict || v != 0.0)
    }
}

#[allow(clippy::cast_precision_loss)]
fn scan_field(
    raw: &RawIterationArray<'_>,
    events: &[usize],
    field: IterationField,
    min_fraction: f64,
) -> Result<usize> {
    let required = (min_fraction * events.len() as f64).max(1.0);
    for strict in [true, false] {
        for iteration in (0..raw.num_iterations()).rev() {
            let populated = events
                .iter()
                .filter(|&&e| is_populated(raw, e, iteration, field, strict))
                .count();
            if populated as f64 >= required {
                if !strict {
                    log::warn!(
                        "field '{}' has no iteration with mostly non-zero values; \
                         using last finite iteration {iteration}",
                        field.name()
                    );
                }
                return Ok(iteration);
            }
        }
    }
    Err(Error::NoValidIteration {
        field: field.name(),
    })
}

/// Finds the last valid iteration of every tracked field over `events`.
///
/// Fields are scanned independently (and in parallel). An iteration is
/// valid for a field when at least `min_fraction` of the events carry a
/// finite non-zero value there; if no iteration passes, the scan retries
/// with finiteness alone.
///
/// # Errors
/// Returns `NoValidIteration` naming the first field for which no
/// iteration qualifies, including when `events` is empty.
pub fn find_last_valid_iteration(
    raw: &RawIterationArray<'_>,
    events: &[usize],
    min_fraction: f64,
) -> Result<IterationIndices> {
    let resolved: Vec<(IterationField, usize)> = IterationField::ALL
        .par_iter()
        .map(|&field| scan_field(raw, events, field, min_fraction).map(|i| (field, i)))
        .collect::<Result<_>>()?;

    let mut indices = IterationIndices::uniform(0);
    for (field, index) in resolved {
        indices.set(field, index);
    }
    Ok(indices)
}
