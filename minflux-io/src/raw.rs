//! Borrowed view over a MINFLUX structured record array.
//!
//! Each record holds per-event scalars (`tid`, `tim`, `vld`, optional
//! `fluo`) and an `itr` sub-array with one entry per localization
//! iteration. Offsets are resolved once into a [`RawLayout`]; reads go
//! straight to the underlying bytes.

use crate::npy::{ArrayHeader, FieldType, RecordField, RecordType, ScalarType};
use crate::{Error, Result};

/// Per-iteration fields whose last valid iteration is resolved separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IterationField {
    /// Emission frequency.
    Efo,
    /// Center-frequency ratio.
    Cfr,
    /// Detector count ratio.
    Dcr,
    /// Effective photon count.
    Eco,
    /// Position.
    Loc,
}

impl IterationField {
    /// Every field, in scan order.
    pub const ALL: [IterationField; 5] = [
        IterationField::Efo,
        IterationField::Cfr,
        IterationField::Dcr,
        IterationField::Eco,
        IterationField::Loc,
    ];

    /// Field name inside the `itr` record.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            IterationField::Efo => "efo",
            IterationField::Cfr => "cfr",
            IterationField::Dcr => "dcr",
            IterationField::Eco => "eco",
            IterationField::Loc => "loc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Accessor {
    offset: usize,
    scalar: ScalarType,
}

impl Accessor {
    fn resolve(record: &RecordType, name: &str) -> Result<Self> {
        let field = record
            .field(name)
            .ok_or_else(|| Error::MissingField(name.to_string()))?;
        Self::from_field(field, 1)
    }

    fn from_field(field: &RecordField, expected_count: usize) -> Result<Self> {
        let scalar = match &field.element {
            FieldType::Scalar(s) if s.is_numeric() => *s,
            _ => {
                return Err(Error::InvalidFormat(format!(
                    "field '{}' is not numeric",
                    field.name
                )))
            }
        };
        if field.count() != expected_count {
            return Err(Error::UnsupportedShape(format!(
                "field '{}' has shape {:?}",
                field.name, field.shape
            )));
        }
        Ok(Self {
            offset: field.offset,
            scalar,
        })
    }

    #[inline]
    fn f64_at(&self, bytes: &[u8], base: usize) -> f64 {
        bytes
            .get(base + self.offset..)
            .and_then(|b| self.scalar.read_f64(b))
            .unwrap_or(f64::NAN)
    }

    #[inline]
    fn i64_at(&self, bytes: &[u8], base: usize) -> Option<i64> {
        bytes
            .get(base + self.offset..)
            .and_then(|b| self.scalar.read_i64(b))
    }
}

/// Resolved byte layout of one MINFLUX record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawLayout {
    itemsize: usize,
    num_iterations: usize,
    itr_offset: usize,
    itr_stride: usize,
    tid: Accessor,
    tim: Accessor,
    vld: Accessor,
    fluo: Option<Accessor>,
    loc: Accessor,
    loc_components: usize,
    efo: Accessor,
    cfr: Accessor,
    eco: Accessor,
    dcr: Accessor,
}

impl RawLayout {
    /// Resolves field offsets from a record element type.
    ///
    /// # Errors
    /// Returns `MissingField` when a required field is absent and
    /// `UnsupportedShape` when `itr` is not a one-dimensional record sub-array
    /// with at least one iteration.
    pub fn from_element(element: &FieldType) -> Result<Self> {
        let record = element
            .as_record()
            .ok_or_else(|| Error::InvalidFormat("array dtype is not structured".into()))?;

        let itr = record
            .field("itr")
            .ok_or_else(|| Error::MissingField("itr".into()))?;
        let inner = itr.element.as_record().ok_or_else(|| {
            Error::UnsupportedShape("'itr' is not a structured sub-array".into())
        })?;
        let num_iterations = match itr.shape.as_slice() {
            [] => 1,
            [n] => *n,
            shape => {
                return Err(Error::UnsupportedShape(format!(
                    "'itr' has multi-dimensional shape {shape:?}"
                )))
            }
        };
        if num_iterations == 0 {
            return Err(Error::UnsupportedShape("'itr' has zero iterations".into()));
        }

        let loc_field = inner
            .field("loc")
            .ok_or_else(|| Error::MissingField("itr.loc".into()))?;
        let loc_components = match loc_field.shape.as_slice() {
            [n @ (2 | 3)] => *n,
            shape => {
                return Err(Error::UnsupportedShape(format!(
                    "'loc' has shape {shape:?}, expected (3,)"
                )))
            }
        };
        let loc = Accessor::from_field(loc_field, loc_components)?;
        let itr_field = |name: &str| {
            Accessor::resolve(inner, name).map_err(|e| match e {
                Error::MissingField(f) => Error::MissingField(format!("itr.{f}")),
                other => other,
            })
        };

        Ok(Self {
            itemsize: record.itemsize,
            num_iterations,
            itr_offset: itr.offset,
            itr_stride: inner.itemsize,
            tid: Accessor::resolve(record, "tid")?,
            tim: Accessor::resolve(record, "tim")?,
            vld: Accessor::resolve(record, "vld")?,
            fluo: record
                .field("fluo")
                .map(|f| Accessor::from_field(f, 1))
                .transpose()?,
            loc,
            loc_components,
            efo: itr_field("efo")?,
            cfr: itr_field("cfr")?,
            eco: itr_field("eco")?,
            dcr: itr_field("dcr")?,
        })
    }

    /// Record size in bytes.
    #[must_use]
    pub fn itemsize(&self) -> usize {
        self.itemsize
    }

    /// Iterations stored per event.
    #[must_use]
    pub fn num_iterations(&self) -> usize {
        self.num_iterations
    }

    /// True if records carry a fluorophore id.
    #[must_use]
    pub fn has_fluo(&self) -> bool {
        self.fluo.is_some()
    }
}

/// Read-only view over the records of a MINFLUX array.
#[derive(Debug, Clone, Copy)]
pub struct RawIterationArray<'a> {
    layout: RawLayout,
    data: &'a [u8],
    len: usize,
}

impl<'a> RawIterationArray<'a> {
    /// Wraps `data` holding `len` records laid out as `layout`.
    ///
    /// # Errors
    /// Returns `InvalidFormat` if `data` is shorter than `len` records.
    pub fn new(layout: RawLayout, data: &'a [u8], len: usize) -> Result<Self> {
        let needed = len
            .checked_mul(layout.itemsize)
            .ok_or_else(|| Error::InvalidFormat("record count overflow".into()))?;
        if data.len() < needed {
            return Err(Error::InvalidFormat(format!(
                "payload holds {} bytes, {len} records need {needed}",
                data.len()
            )));
        }
        Ok(Self {
            layout,
            data: &data[..needed],
            len,
        })
    }

    /// Parses an in-memory `.npy` byte stream.
    ///
    /// # Errors
    /// Returns a header error, `UnsupportedShape` for arrays that are not
    /// one-dimensional, or a layout error.
    pub fn from_npy(bytes: &'a [u8]) -> Result<Self> {
        let header = ArrayHeader::read(bytes)?;
        Self::from_header(&header, bytes)
    }

    /// Builds a view from an already parsed header over the full file bytes.
    ///
    /// # Errors
    /// See [`Self::from_npy`].
    pub fn from_header(header: &ArrayHeader, bytes: &'a [u8]) -> Result<Self> {
        if header.shape.len() != 1 {
            return Err(Error::UnsupportedShape(format!(
                "record array has shape {:?}, expected one dimension",
                header.shape
            )));
        }
        let layout = RawLayout::from_element(&header.element)?;
        Self::new(layout, &bytes[header.data_offset..], header.shape[0])
    }

    /// Wraps a payload that [`Self::new`] has already accepted.
    pub(crate) fn from_validated(layout: RawLayout, data: &'a [u8], len: usize) -> Self {
        Self { layout, data, len }
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if there are no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterations stored per event.
    #[must_use]
    pub fn num_iterations(&self) -> usize {
        self.layout.num_iterations
    }

    /// Resolved record layout.
    #[must_use]
    pub fn layout(&self) -> &RawLayout {
        &self.layout
    }

    #[inline]
    fn base(&self, event: usize) -> usize {
        event * self.layout.itemsize
    }

    #[inline]
    fn itr_base(&self, event: usize, iteration: usize) -> usize {
        self.base(event) + self.layout.itr_offset + iteration * self.layout.itr_stride
    }

    /// Trace id of `event`. Unreadable values map to -1.
    #[must_use]
    pub fn tid(&self, event: usize) -> i64 {
        self.layout.tid.i64_at(self.data, self.base(event)).unwrap_or(-1)
    }

    /// Event time in seconds, NaN if unreadable.
    #[must_use]
    pub fn tim(&self, event: usize) -> f64 {
        self.layout.tim.f64_at(self.data, self.base(event))
    }

    /// Validity flag of `event`.
    #[must_use]
    pub fn vld(&self, event: usize) -> bool {
        self.layout
            .vld
            .i64_at(self.data, self.base(event))
            .is_some_and(|v| v != 0)
    }

    /// Fluorophore id, when the layout has one.
    #[must_use]
    pub fn fluo(&self, event: usize) -> Option<i64> {
        self.layout
            .fluo
            .and_then(|f| f.i64_at(self.data, self.base(event)))
    }

    /// Position in meters at `iteration`. Two-component layouts report z = 0.
    #[must_use]
    pub fn loc(&self, event: usize, iteration: usize) -> [f64; 3] {
        let base = self.itr_base(event, iteration);
        let step = self.layout.loc.scalar.size;
        let mut out = [0.0; 3];
        for (axis, value) in out.iter_mut().enumerate().take(self.layout.loc_components) {
            *value = self.layout.loc.f64_at(self.data, base + axis * step);
        }
        out
    }

    /// Scalar value of `field` at `iteration`. `Loc` reports the x component.
    #[must_use]
    pub fn value(&self, event: usize, iteration: usize, field: IterationField) -> f64 {
        let base = self.itr_base(event, iteration);
        let accessor = match field {
            IterationField::Efo => self.layout.efo,
            IterationField::Cfr => self.layout.cfr,
            IterationField::Dcr => self.layout.dcr,
            IterationField::Eco => self.layout.eco,
            IterationField::Loc => self.layout.loc,
        };
        accessor.f64_at(self.data, base)
    }

    /// Indices of events whose validity flag equals `valid`.
    #[must_use]
    pub fn events_with_validity(&self, valid: bool) -> Vec<usize> {
        (0..self.len).filter(|&e| self.vld(e) == valid).collect()
    }
}
