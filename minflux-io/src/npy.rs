//! Record layouts of `.npy` structured arrays.
//!
//! Headers are read and written with `npyz`. MINFLUX exports store a
//! one-dimensional array of nested records; this module flattens the
//! `npyz` dtype into byte offsets so records can be read in place from a
//! memory map instead of being deserialized row by row.

use crate::{Error, Result};
use npyz::{DType, Endianness, Field, TypeChar, TypeStr, WriterBuilder};
use std::io::{self, Cursor};

/// Byte order of a scalar field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
    /// Single-byte or opaque types.
    NotApplicable,
}

/// Scalar element kinds. Kinds the decoder never reads are kept only for
/// their size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    /// IEEE floating point.
    Float,
    /// Signed integer.
    Int,
    /// Unsigned integer.
    UInt,
    /// One-byte boolean.
    Bool,
    /// Strings, complex, datetimes and raw bytes.
    Other,
}

/// A scalar element such as `<f8` or `|b1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarType {
    /// Element kind.
    pub kind: ScalarKind,
    /// Element size in bytes.
    pub size: usize,
    /// Byte order.
    pub endian: Endian,
}

impl ScalarType {
    /// Converts an `npyz` type string.
    ///
    /// # Errors
    /// Returns `InvalidFormat` if the element size does not fit in memory.
    pub fn from_type_str(ty: &TypeStr) -> Result<Self> {
        let size = ty
            .num_bytes()
            .ok_or_else(|| Error::InvalidFormat(format!("type '{ty}' is too large")))?;
        let kind = match ty.type_char() {
            TypeChar::Float => ScalarKind::Float,
            TypeChar::Int => ScalarKind::Int,
            TypeChar::Uint => ScalarKind::UInt,
            TypeChar::Bool => ScalarKind::Bool,
            _ => ScalarKind::Other,
        };
        let endian = match ty.endianness() {
            Endianness::Little => Endian::Little,
            Endianness::Big => Endian::Big,
            Endianness::Irrelevant => Endian::NotApplicable,
        };
        Ok(Self { kind, size, endian })
    }

    fn word<const N: usize>(&self, bytes: &[u8]) -> Option<[u8; N]> {
        let mut word: [u8; N] = bytes.get(..N)?.try_into().ok()?;
        if self.endian == Endian::Big {
            word.reverse();
        }
        Some(word)
    }

    /// Reads one element as `f64`. Returns `None` for kinds that have no
    /// numeric reading or when `bytes` is too short.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn read_f64(&self, bytes: &[u8]) -> Option<f64> {
        match (self.kind, self.size) {
            (ScalarKind::Float, 4) => Some(f64::from(f32::from_le_bytes(self.word(bytes)?))),
            (ScalarKind::Float, 8) => Some(f64::from_le_bytes(self.word(bytes)?)),
            (ScalarKind::UInt, 8) => Some(u64::from_le_bytes(self.word(bytes)?) as f64),
            (ScalarKind::Int | ScalarKind::UInt | ScalarKind::Bool, _) => {
                self.read_i64(bytes).map(|v| v as f64)
            }
            _ => None,
        }
    }

    /// Reads one integer or boolean element. Floats are truncated toward zero.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    #[must_use]
    pub fn read_i64(&self, bytes: &[u8]) -> Option<i64> {
        match (self.kind, self.size) {
            (ScalarKind::Bool, 1) => bytes.first().map(|&b| i64::from(b != 0)),
            (ScalarKind::Int, 1) => Some(i64::from(i8::from_le_bytes(self.word(bytes)?))),
            (ScalarKind::Int, 2) => Some(i64::from(i16::from_le_bytes(self.word(bytes)?))),
            (ScalarKind::Int, 4) => Some(i64::from(i32::from_le_bytes(self.word(bytes)?))),
            (ScalarKind::Int, 8) => Some(i64::from_le_bytes(self.word(bytes)?)),
            (ScalarKind::UInt, 1) => bytes.first().map(|&b| i64::from(b)),
            (ScalarKind::UInt, 2) => Some(i64::from(u16::from_le_bytes(self.word(bytes)?))),
            (ScalarKind::UInt, 4) => Some(i64::from(u32::from_le_bytes(self.word(bytes)?))),
            (ScalarKind::UInt, 8) => Some(u64::from_le_bytes(self.word(bytes)?) as i64),
            (ScalarKind::Float, _) => self.read_f64(bytes).map(|v| v as i64),
            _ => None,
        }
    }

    /// True if the element can be read as a number.
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            (self.kind, self.size),
            (ScalarKind::Float, 4 | 8)
                | (ScalarKind::Int | ScalarKind::UInt, 1 | 2 | 4 | 8)
                | (ScalarKind::Bool, 1)
        )
    }
}

/// Element type of a record field, with offsets resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldType {
    /// Plain element.
    Scalar(ScalarType),
    /// Structured element.
    Record(RecordType),
}

impl FieldType {
    /// Size of one element in bytes.
    #[must_use]
    pub fn itemsize(&self) -> usize {
        match self {
            FieldType::Scalar(s) => s.size,
            FieldType::Record(r) => r.itemsize,
        }
    }

    /// The record layout, if this is a structured type.
    #[must_use]
    pub fn as_record(&self) -> Option<&RecordType> {
        match self {
            FieldType::Record(r) => Some(r),
            FieldType::Scalar(_) => None,
        }
    }

    /// Splits `dtype` into its base element and the sub-array shape that
    /// `npyz` expresses as nested `DType::Array` layers.
    ///
    /// # Errors
    /// Returns `InvalidFormat` for sizes that overflow.
    pub fn resolve(dtype: &DType) -> Result<(Self, Vec<usize>)> {
        let mut shape = Vec::new();
        let mut current = dtype;
        let element = loop {
            match current {
                DType::Array(len, inner) => {
                    shape.push(usize::try_from(*len).map_err(|_| {
                        Error::InvalidFormat(format!("sub-array length {len}"))
                    })?);
                    current = inner;
                }
                DType::Plain(ty) => break FieldType::Scalar(ScalarType::from_type_str(ty)?),
                DType::Record(fields) => break FieldType::Record(RecordType::from_fields(fields)?),
            }
        };
        Ok((element, shape))
    }
}

/// Named field of a record, with its sub-array shape and byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    /// Field name.
    pub name: String,
    /// Element type.
    pub element: FieldType,
    /// Sub-array shape; empty for a single element.
    pub shape: Vec<usize>,
    /// Byte offset from the start of the record.
    pub offset: usize,
}

impl RecordField {
    /// Elements stored in this field.
    #[must_use]
    pub fn count(&self) -> usize {
        self.shape.iter().product()
    }

    /// Bytes occupied by this field.
    #[must_use]
    pub fn size(&self) -> usize {
        self.element.itemsize() * self.count()
    }
}

/// Packed structured record layout.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordType {
    /// Fields in storage order.
    pub fields: Vec<RecordField>,
    /// Record size in bytes.
    pub itemsize: usize,
}

impl RecordType {
    fn from_fields(fields: &[Field]) -> Result<Self> {
        let mut resolved = Vec::with_capacity(fields.len());
        let mut offset = 0usize;
        for field in fields {
            let (element, shape) = FieldType::resolve(&field.dtype)?;
            let resolved_field = RecordField {
                name: field.name.clone(),
                element,
                shape,
                offset,
            };
            offset = offset
                .checked_add(resolved_field.size())
                .ok_or_else(|| Error::InvalidFormat("record size overflow".into()))?;
            resolved.push(resolved_field);
        }
        Ok(Self {
            fields: resolved,
            itemsize: offset,
        })
    }

    /// Field called `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&RecordField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Header of an `.npy` stream with the record layout resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayHeader {
    /// Element type.
    pub element: FieldType,
    /// Array shape.
    pub shape: Vec<usize>,
    /// Offset of the first data byte.
    pub data_offset: usize,
}

impl ArrayHeader {
    /// Reads the header at the start of `bytes`.
    ///
    /// # Errors
    /// Returns `InvalidFormat` when `npyz` rejects the header or the layout
    /// cannot be resolved.
    pub fn read(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let npy = npyz::NpyFile::new(&mut cursor)
            .map_err(|e| Error::InvalidFormat(format!("bad npy header: {e}")))?;
        let dtype = npy.dtype();
        let shape = npy
            .shape()
            .iter()
            .map(|&d| {
                usize::try_from(d).map_err(|_| Error::InvalidFormat(format!("dimension {d}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let (element, sub_shape) = FieldType::resolve(&dtype)?;
        drop(npy);
        if !sub_shape.is_empty() {
            return Err(Error::UnsupportedShape(format!(
                "array element has sub-array shape {sub_shape:?}"
            )));
        }
        let data_offset = usize::try_from(cursor.position())
            .map_err(|_| Error::InvalidFormat("header offset overflow".into()))?;
        Ok(Self {
            element,
            shape,
            data_offset,
        })
    }

    /// Number of array elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    /// True if the array has no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Scalar dtype from a numpy type string such as `<f8`.
///
/// # Errors
/// Returns `InvalidInput` for malformed type strings.
pub fn plain(ty: &str) -> io::Result<DType> {
    ty.parse::<TypeStr>()
        .map(DType::Plain)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, format!("'{ty}': {e}")))
}

/// Sub-array of `len` elements of `dtype`.
#[must_use]
pub fn array(len: usize, dtype: DType) -> DType {
    DType::Array(len as u64, Box::new(dtype))
}

/// Named record field.
#[must_use]
pub fn field(name: &str, dtype: DType) -> Field {
    Field {
        name: name.to_string(),
        dtype,
    }
}

/// Writes `rows` as a one-dimensional `.npy` array of `dtype`.
///
/// # Errors
/// Returns an I/O error if `dtype` does not fit `T` or writing fails.
pub fn write_rows<T, W>(writer: W, dtype: DType, rows: &[T]) -> io::Result<()>
where
    T: npyz::Serialize,
    W: io::Write,
{
    let mut out = npyz::WriteOptions::new()
        .dtype(dtype)
        .shape(&[rows.len() as u64])
        .writer(writer)
        .begin_nd()?;
    for row in rows {
        out.push(row)?;
    }
    out.finish()
}
