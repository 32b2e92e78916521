//! minflux-io: Decoding of MINFLUX structured record arrays.
//!
//! This crate memory-maps MINFLUX `.npy` exports, parses their nested
//! structured dtype, resolves the last valid iteration of every field and
//! decodes the records into a [`minflux_core::LocalizationTable`].

#![warn(missing_docs)]

mod decoder;
mod error;
pub mod npy;
pub mod raw;
mod reader;
pub mod synthetic;
pub mod validity;

pub use decoder::{decode, DecodeOptions, RawIterationTable, RecordDecoder, ResolvedLayout};
pub use error::{Error, Result};
pub use raw::{IterationField, RawIterationArray, RawLayout};
pub use reader::{FileFormat, MinfluxReader};
pub use synthetic::SyntheticAcquisition;
pub use validity::{find_last_valid_iteration, IterationIndices, DEFAULT_MIN_VALID_FRACTION};
