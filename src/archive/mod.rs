//! Keyed-archive decoding.
//!
//! Rich message bodies are stored as attributed strings serialized with a
//! keyed archiver into a binary property list. [`decode`] turns such a blob
//! into a [`DecodedArchive`]: an object table plus the top object, with
//! class wrappers reduced to plain strings, sequences and mappings.

mod bplist;
mod error;
mod keyed;
mod value;

#[cfg(test)]
pub(crate) mod fixture;

pub use error::DecodeError;
pub use value::{DecodedArchive, DecodedValue, Mapping, ObjectTable};

/// Decode a binary keyed archive (or any binary property list).
///
/// Pure function of `bytes`: identical input always yields an identical graph.
pub fn decode(bytes: &[u8]) -> Result<DecodedArchive, DecodeError> {
    let container = bplist::parse(bytes)?;
    keyed::reconstruct(&container)
}

/// Cheap check for the container magic, used to decide whether a blob is
/// worth decoding at all.
pub fn looks_like_archive(bytes: &[u8]) -> bool {
    bytes.starts_with(bplist::MAGIC)
}
