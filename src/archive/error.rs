use thiserror::Error;

/// Reasons a blob could not be decoded. All of them are row-local: the
/// caller skips the blob and keeps going.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed container: {0}")]
    MalformedContainer(String),
    #[error("unknown object tag 0x{tag:02x} at offset {offset}")]
    UnknownTag { tag: u8, offset: usize },
    #[error("truncated record at offset {offset}: needs {needed} bytes, {available} available")]
    TruncatedRecord {
        offset: usize,
        needed: usize,
        available: usize,
    },
}

impl DecodeError {
    pub(crate) fn malformed(msg: impl Into<String>) -> Self {
        DecodeError::MalformedContainer(msg.into())
    }
}
