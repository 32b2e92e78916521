//! Synthetic MINFLUX acquisitions.
//!
//! Produces genuine structured `.npy` streams with the MINFLUX record
//! layout: a fixed number of iterations per event, per-field finalization
//! depths, optional invalid events and an optional fluorophore field.
//! Values past a field's depth are NaN (or 0 for integer fields), the way
//! unfinished iterations appear in instrument exports.

use crate::npy::{array, field, plain, write_rows};
use crate::raw::IterationField;
use crate::validity::IterationIndices;
use npyz::DType;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// One localization iteration of a synthetic event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SyntheticIteration {
    itr: i32,
    tic: u64,
    loc: [f64; 3],
    eco: i32,
    efo: f64,
    cfr: f64,
    dcr: f64,
}

/// One record of a synthetic acquisition.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SyntheticEvent {
    iterations: Vec<SyntheticIteration>,
    tim: f64,
    tid: i32,
    vld: bool,
    fluo: Option<u8>,
}

/// Writes events in the field order of [`SyntheticAcquisition::dtype`].
pub(crate) struct EventWriter;

impl npyz::TypeWrite for EventWriter {
    type Value = SyntheticEvent;

    fn write_one<W: Write>(&self, mut writer: W, value: &SyntheticEvent) -> io::Result<()> {
        for it in &value.iterations {
            writer.write_all(&it.itr.to_le_bytes())?;
            writer.write_all(&it.tic.to_le_bytes())?;
            for v in it.loc {
                writer.write_all(&v.to_le_bytes())?;
            }
            writer.write_all(&it.eco.to_le_bytes())?;
            writer.write_all(&it.efo.to_le_bytes())?;
            writer.write_all(&it.cfr.to_le_bytes())?;
            writer.write_all(&it.dcr.to_le_bytes())?;
        }
        writer.write_all(&value.tim.to_le_bytes())?;
        writer.write_all(&value.tid.to_le_bytes())?;
        writer.write_all(&[u8::from(value.vld)])?;
        if let Some(id) = value.fluo {
            writer.write_all(&[id])?;
        }
        Ok(())
    }
}

impl npyz::Serialize for SyntheticEvent {
    type TypeWriter = EventWriter;

    fn writer(_dtype: &DType) -> Result<EventWriter, npyz::DTypeError> {
        Ok(EventWriter)
    }
}

/// Builder for synthetic acquisitions.
#[derive(Debug, Clone)]
pub struct SyntheticAcquisition {
    traces: Vec<usize>,
    num_iterations: usize,
    is_3d: bool,
    depths: IterationIndices,
    invalid_events: usize,
    fluorophore: Option<u8>,
    seed: u64,
    /// Final-iteration position jitter (m).
    precision: f64,
}

impl SyntheticAcquisition {
    fn new(traces: &[usize], num_iterations: usize, is_3d: bool) -> Self {
        Self {
            traces: traces.to_vec(),
            num_iterations,
            is_3d,
            depths: IterationIndices::uniform(num_iterations - 1),
            invalid_events: 0,
            fluorophore: Some(1),
            seed: 0,
            precision: 5e-9,
        }
    }

    /// 2D localization acquisition (5 iterations). `traces` lists the number
    /// of localizations per trace; trace ids start at 1.
    #[must_use]
    pub fn localization_2d(traces: &[usize]) -> Self {
        Self::new(traces, 5, false)
    }

    /// 3D localization acquisition (10 iterations).
    #[must_use]
    pub fn localization_3d(traces: &[usize]) -> Self {
        Self::new(traces, 10, true)
    }

    /// Aggregated acquisition (1 iteration).
    #[must_use]
    pub fn aggregated(traces: &[usize], is_3d: bool) -> Self {
        Self::new(traces, 1, is_3d)
    }

    /// Overrides the iteration count. Field depths reset to the last iteration.
    #[must_use]
    pub fn iterations(mut self, num_iterations: usize) -> Self {
        let num_iterations = num_iterations.max(1);
        self.num_iterations = num_iterations;
        self.depths = IterationIndices::uniform(num_iterations - 1);
        self
    }

    /// Seed of the random generator. Equal seeds give identical files.
    #[must_use]
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Last iteration at which `field` carries a value.
    #[must_use]
    pub fn field_depth(mut self, field: IterationField, depth: usize) -> Self {
        self.depths.set(field, depth.min(self.num_iterations - 1));
        self
    }

    /// Appends `count` events flagged invalid, each in its own trace.
    #[must_use]
    pub fn invalid_events(mut self, count: usize) -> Self {
        self.invalid_events = count;
        self
    }

    /// Fluorophore id written for every event.
    #[must_use]
    pub fn fluorophore(mut self, id: u8) -> Self {
        self.fluorophore = Some(id);
        self
    }

    /// Omits the `fluo` field from the record layout.
    #[must_use]
    pub fn without_fluo(mut self) -> Self {
        self.fluorophore = None;
        self
    }

    /// Final-iteration localization jitter in meters.
    #[must_use]
    pub fn precision(mut self, meters: f64) -> Self {
        self.precision = meters;
        self
    }

    /// Total number of events written.
    #[must_use]
    pub fn num_events(&self) -> usize {
        self.traces.iter().sum::<usize>() + self.invalid_events
    }

    /// Structured record dtype of the acquisition.
    ///
    /// # Errors
    /// Never fails for the fixed MINFLUX type strings; the `Result` comes
    /// from type-string parsing.
    pub fn dtype(&self) -> io::Result<DType> {
        let f8 = plain("<f8")?;
        let i4 = plain("<i4")?;
        let itr = DType::Record(vec![
            field("itr", i4.clone()),
            field("tic", plain("<u8")?),
            field("loc", array(3, f8.clone())),
            field("eco", i4.clone()),
            field("efo", f8.clone()),
            field("cfr", f8.clone()),
            field("dcr", f8.clone()),
        ]);
        let mut fields = vec![
            field("itr", array(self.num_iterations, itr)),
            field("tim", f8),
            field("tid", i4),
            field("vld", plain("|b1")?),
        ];
        if self.fluorophore.is_some() {
            fields.push(field("fluo", plain("|u1")?));
        }
        Ok(DType::Record(fields))
    }

    /// Draws the events. Invalid events get trace ids from 10000.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn events(&self) -> Vec<SyntheticEvent> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut events = Vec::with_capacity(self.num_events());
        let mut tic = 0u64;

        let trace_ids = (1..).zip(self.traces.iter().copied());
        let invalid_ids = (0..self.invalid_events).map(|i| (10_000 + i, 1));
        let valid_count = self.traces.len();
        for (n, (tid, len)) in trace_ids.chain(invalid_ids).enumerate() {
            let center = [
                rng.gen_range(500e-9..5_000e-9),
                rng.gen_range(500e-9..5_000e-9),
                if self.is_3d {
                    rng.gen_range(50e-9..400e-9)
                } else {
                    0.0
                },
            ];
            let efo = rng.gen_range(20_000.0..60_000.0);
            let cfr = rng.gen_range(0.1..0.6);
            let dcr = rng.gen_range(0.2..0.8);

            for _ in 0..len {
                let mut iterations = Vec::with_capacity(self.num_iterations);
                for it in 0..self.num_iterations {
                    // Earlier iterations are coarser.
                    let spread = self.precision * (self.num_iterations - it) as f64;
                    let mut loc = [f64::NAN; 3];
                    if it <= self.depths.loc {
                        for (axis, value) in loc.iter_mut().enumerate() {
                            *value = if axis == 2 && !self.is_3d {
                                0.0
                            } else if spread > 0.0 {
                                center[axis] + rng.gen_range(-spread..spread)
                            } else {
                                center[axis]
                            };
                        }
                    }
                    let eco = if it <= self.depths.eco {
                        rng.gen_range(50..200)
                    } else {
                        0
                    };
                    let depth = |d: usize, v: f64| if it <= d { v } else { f64::NAN };
                    let efo_it = depth(self.depths.efo, efo * rng.gen_range(0.9..1.1));
                    iterations.push(SyntheticIteration {
                        itr: i32::try_from(it).unwrap_or(i32::MAX),
                        tic,
                        loc,
                        eco,
                        efo: efo_it,
                        cfr: depth(self.depths.cfr, cfr),
                        dcr: depth(self.depths.dcr, dcr),
                    });
                    tic += 1;
                }
                events.push(SyntheticEvent {
                    iterations,
                    tim: events.len() as f64 * 0.01,
                    tid: i32::try_from(tid).unwrap_or(i32::MAX),
                    vld: n < valid_count,
                    fluo: self.fluorophore,
                });
            }
        }
        events
    }

    /// Serializes the acquisition to `.npy` bytes.
    ///
    /// # Errors
    /// Returns an I/O error if `npyz` rejects the record layout.
    pub fn to_npy_bytes(&self) -> io::Result<Vec<u8>> {
        let mut out = Vec::new();
        write_rows(&mut out, self.dtype()?, &self.events())?;
        Ok(out)
    }

    /// Writes the acquisition to `path`.
    ///
    /// # Errors
    /// Returns an I/O error if the file cannot be written.
    pub fn write_to<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        write_rows(&mut writer, self.dtype()?, &self.events())?;
        writer.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::npy::ArrayHeader;

    #[test]
    fn test_layout_matches_payload() {
        let synth = SyntheticAcquisition::localization_3d(&[2, 3]).invalid_events(1);
        let bytes = synth.to_npy_bytes().unwrap();
        let header = ArrayHeader::read(&bytes).unwrap();
        assert_eq!(header.shape, vec![6]);
        let itemsize = header.element.itemsize();
        assert_eq!(itemsize, 10 * 64 + 8 + 4 + 1 + 1);
        assert_eq!(bytes.len() - header.data_offset, 6 * itemsize);
    }

    #[test]
    fn test_without_fluo_drops_field() {
        let synth = SyntheticAcquisition::aggregated(&[2], false).without_fluo();
        let header = ArrayHeader::read(&synth.to_npy_bytes().unwrap()).unwrap();
        let record = header.element.as_record().unwrap();
        assert!(record.field("fluo").is_none());
        assert_eq!(record.itemsize, 64 + 8 + 4 + 1);
    }

    #[test]
    fn test_seed_is_reproducible() {
        let bytes = |seed| {
            SyntheticAcquisition::localization_2d(&[4])
                .seed(seed)
                .to_npy_bytes()
                .unwrap()
        };
        assert_eq!(bytes(9), bytes(9));
        assert_ne!(bytes(9), bytes(10));
    }

    #[test]
    fn test_write_to_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let synth = SyntheticAcquisition::aggregated(&[3], false);
        synth.write_to(file.path()).unwrap();
        let bytes = std::fs::read(file.path()).unwrap();
        assert_eq!(ArrayHeader::read(&bytes).unwrap().shape, vec![3]);
        assert_eq!(bytes, synth.to_npy_bytes().unwrap());
    }
}
