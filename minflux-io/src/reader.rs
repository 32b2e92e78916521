//! Memory-mapped MINFLUX file readers.

use crate::decoder::{DecodeOptions, RawIterationTable, RecordDecoder, ResolvedLayout};
use crate::npy::ArrayHeader;
use crate::raw::{RawIterationArray, RawLayout};
use crate::validity::IterationIndices;
use crate::{Error, Result};
use memmap2::Mmap;
use minflux_core::{AcquisitionInfo, LocalizationTable};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Bytes backing a [`MinfluxReader`].
enum Source {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Source {
    /// Maps `path` read-only. Empty files are rejected before mapping since
    /// they cannot hold an `.npy` header.
    fn map(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Err(Error::InvalidFormat(format!("{} is empty", path.display())));
        }
        // SAFETY: the mapping is read-only and lives as long as the reader.
        // Truncating the file while it is open is undefined behavior, as with
        // any shared mapping.
        #[allow(unsafe_code)]
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| Error::MmapError(format!("{}: {e}", path.display())))?;
        Ok(Source::Mapped(mmap))
    }
}

impl AsRef<[u8]> for Source {
    fn as_ref(&self) -> &[u8] {
        match self {
            Source::Mapped(m) => &m[..],
            Source::Owned(v) => v,
        }
    }
}

/// Supported container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    /// NumPy `.npy` array.
    Npy,
    /// Project `.pmx` container.
    Pmx,
    /// MATLAB `.mat` file.
    Mat,
}

impl FileFormat {
    /// Detects the format from a path's extension.
    ///
    /// # Errors
    /// Returns `UnsupportedExtension` for unknown extensions.
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "npy" => Ok(FileFormat::Npy),
            "pmx" => Ok(FileFormat::Pmx),
            "mat" => Ok(FileFormat::Mat),
            _ => Err(Error::UnsupportedExtension(ext)),
        }
    }
}

/// A loaded MINFLUX acquisition.
///
/// Opening resolves the acquisition kind and per-field iteration indices
/// once and decodes the processed table; later calls reuse both.
pub struct MinfluxReader {
    source: Source,
    path: Option<PathBuf>,
    layout: RawLayout,
    data_offset: usize,
    len: usize,
    decoder: RecordDecoder,
    resolved: ResolvedLayout,
    processed: LocalizationTable,
    num_valid: usize,
}

impl MinfluxReader {
    /// Opens and decodes a MINFLUX file.
    ///
    /// Only `.npy` is decoded natively; `.pmx` and `.mat` containers return
    /// `UnsupportedExtension`.
    ///
    /// # Errors
    /// Returns I/O, format and decode errors. No partial reader is returned.
    pub fn open<P: AsRef<Path>>(path: P, options: DecodeOptions) -> Result<Self> {
        let path = path.as_ref();
        match FileFormat::from_path(path)? {
            FileFormat::Npy => {}
            FileFormat::Pmx | FileFormat::Mat => {
                let ext = path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default();
                return Err(Error::UnsupportedExtension(ext));
            }
        }
        let source = Source::map(path)?;
        log::info!("reading {} ({} bytes)", path.display(), source.as_ref().len());
        Self::from_source(source, Some(path.to_path_buf()), options)
            .inspect_err(|e| log::error!("failed to load {}: {e}", path.display()))
    }

    /// Decodes an in-memory `.npy` byte stream.
    ///
    /// # Errors
    /// Returns format and decode errors.
    pub fn from_bytes(bytes: Vec<u8>, options: DecodeOptions) -> Result<Self> {
        Self::from_source(Source::Owned(bytes), None, options)
    }

    fn from_source(source: Source, path: Option<PathBuf>, options: DecodeOptions) -> Result<Self> {
        let decoder = RecordDecoder::new(options);
        let (layout, data_offset, len, resolved, processed, num_valid) = {
            let bytes = source.as_ref();
            let header = ArrayHeader::read(bytes)?;
            let raw = RawIterationArray::from_header(&header, bytes)?;
            let resolved = decoder.resolve(&raw)?;
            let processed = decoder.decode_with(&raw, &resolved)?;
            let num_valid = raw.events_with_validity(true).len();
            (
                *raw.layout(),
                header.data_offset,
                raw.len(),
                resolved,
                processed,
                num_valid,
            )
        };
        Ok(Self {
            source,
            path,
            layout,
            data_offset,
            len,
            decoder,
            resolved,
            processed,
            num_valid,
        })
    }

    /// Borrowed view of the records.
    #[must_use]
    pub fn raw(&self) -> RawIterationArray<'_> {
        let data = &self.source.as_ref()[self.data_offset..];
        RawIterationArray::from_validated(self.layout, data, self.len)
    }

    /// File path, when read from disk.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Acquisition kind and scaling.
    #[must_use]
    pub fn info(&self) -> &AcquisitionInfo {
        &self.resolved.info
    }

    /// Iteration index used for each field.
    #[must_use]
    pub fn iteration_indices(&self) -> &IterationIndices {
        &self.resolved.indices
    }

    /// The decoded table.
    #[must_use]
    pub fn processed(&self) -> &LocalizationTable {
        &self.processed
    }

    /// Consumes the reader, returning the decoded table.
    #[must_use]
    pub fn into_processed(self) -> LocalizationTable {
        self.processed
    }

    /// Every iteration of every event.
    #[must_use]
    pub fn raw_table(&self) -> RawIterationTable {
        self.decoder.raw_table(&self.raw(), &self.resolved.info)
    }

    /// Number of events in the file.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the file holds no events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Events flagged valid.
    #[must_use]
    pub fn num_valid_entries(&self) -> usize {
        self.num_valid
    }

    /// Events flagged invalid.
    #[must_use]
    pub fn num_invalid_entries(&self) -> usize {
        self.len - self.num_valid
    }
}

impl fmt::Display for MinfluxReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} acquisition with {} entries",
            self.resolved.info.kind, self.len
        )?;
        if self.num_invalid_entries() == 0 {
            write!(f, " (all valid)")
        } else {
            write!(
                f,
                " ({} valid, {} invalid)",
                self.num_valid,
                self.num_invalid_entries()
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synthetic::SyntheticAcquisition;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_mapped_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[1, 2, 3, 4]).unwrap();
        file.flush().unwrap();
        let source = Source::map(file.path()).unwrap();
        assert_eq!(source.as_ref(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_empty_and_garbage_files() {
        let empty = Builder::new().suffix(".npy").tempfile().unwrap();
        assert!(matches!(
            MinfluxReader::open(empty.path(), DecodeOptions::default()),
            Err(Error::InvalidFormat(_))
        ));

        let mut garbage = Builder::new().suffix(".npy").tempfile().unwrap();
        garbage.write_all(b"definitely not numpy").unwrap();
        garbage.flush().unwrap();
        assert!(matches!(
            MinfluxReader::open(garbage.path(), DecodeOptions::default()),
            Err(Error::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_open_npy_file() {
        let file = Builder::new().suffix(".npy").tempfile().unwrap();
        SyntheticAcquisition::localization_2d(&[2, 3])
            .invalid_events(1)
            .write_to(file.path())
            .unwrap();
        let reader = MinfluxReader::open(file.path(), DecodeOptions::default()).unwrap();
        assert_eq!(reader.len(), 6);
        assert_eq!(reader.num_valid_entries(), 5);
        assert_eq!(reader.num_invalid_entries(), 1);
        assert_eq!(reader.processed().len(), 5);
        assert_eq!(*reader.iteration_indices(), IterationIndices::uniform(4));
        assert_eq!(
            reader.to_string(),
            "2D normal acquisition with 6 entries (5 valid, 1 invalid)"
        );
        assert_eq!(reader.raw_table().len(), 30);
        assert_eq!(reader.path(), Some(file.path()));
    }

    #[test]
    fn test_unsupported_extensions() {
        for suffix in [".pmx", ".mat", ".csv"] {
            let file = Builder::new().suffix(suffix).tempfile().unwrap();
            assert!(matches!(
                MinfluxReader::open(file.path(), DecodeOptions::default()),
                Err(Error::UnsupportedExtension(_))
            ));
        }
    }

    #[test]
    fn test_from_bytes_summary() {
        let bytes = SyntheticAcquisition::aggregated(&[4], true).to_npy_bytes().unwrap();
        let reader = MinfluxReader::from_bytes(bytes, DecodeOptions::default()).unwrap();
        assert!(reader.info().is_aggregated());
        assert_eq!(
            reader.to_string(),
            "3D aggregated acquisition with 4 entries (all valid)"
        );
        assert!(reader.path().is_none());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MinfluxReader::open("/nonexistent/acquisition.npy", DecodeOptions::default()),
            Err(Error::Io(_))
        ));
    }
}
