//! The error taxonomy for cabinet parsing, mutation, and Save.
//!
//! Structural/invariant failures get their own variant so callers can match
//! on *kind* instead of parsing a message; anything coming up from the OS
//! (permission denied, disk full, file not found) passes through as
//! [`CabError::Io`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the cabinet codec and the higher-level `Cabinet` API.
#[derive(Debug, Error)]
pub enum CabError {
    /// Bad signature, or a format/version this core doesn't support.
    #[error("{}: not a supported cabinet file: {reason}", path.display())]
    UnsupportedFormat { path: PathBuf, reason: String },

    /// The header references a next cabinet in a multi-cabinet set.
    #[error("{}: multi-cabinet sets are not supported", path.display())]
    MultiCabinetUnsupported { path: PathBuf },

    /// A folder declares a compression scheme this core cannot decode or
    /// encode (anything but Store/None).
    #[error("folder {folder_index}: unsupported compression type {ctype:?}")]
    UnsupportedCompression { folder_index: u16, ctype: String },

    /// Fewer bytes were available than a header or payload required.
    #[error("{context}: truncated stream (expected {expected} more byte(s))")]
    TruncatedStream { context: String, expected: usize },

    /// A decompressed block's length disagreed with its declared
    /// uncompressed length.
    #[error(
        "folder {folder_index} data block {block_index}: corrupted data \
         (expected {expected} uncompressed bytes, got {actual})"
    )]
    CorruptedData { folder_index: u16, block_index: usize, expected: usize, actual: usize },

    /// An emitted name (including its trailing NUL) reached the 256-byte
    /// cap.
    #[error("name {name:?} is too long to store ({len} bytes with NUL, max 255)")]
    NameTooLong { name: String, len: usize },

    /// `Save` would produce a cabinet bigger than the 31-bit size cap.
    #[error("cabinet would be {size} bytes, exceeding the {max} byte limit")]
    CabinetTooLarge { size: u64, max: u32 },

    /// An external file being added is too large to fit in a folder.
    #[error("{}: file is {size} bytes, exceeding the {max} byte limit", path.display())]
    FileTooLarge { path: PathBuf, size: u64, max: u32 },

    /// The cabinet would exceed 65535 total files.
    #[error("cabinet already has the maximum of {max} files")]
    TooManyFiles { max: usize },

    /// A folder would exceed 65535 data blocks.
    #[error("folder {folder_index} would exceed the maximum of {max} data blocks")]
    TooManyDataBlocks { folder_index: u16, max: usize },

    /// The reader ran out of data blocks before satisfying a read.
    #[error("{rel_path}: truncated data (fewer bytes available than expected)")]
    TruncatedData { rel_path: String },

    /// An external source file promised at `add_file` time was not present
    /// when `save` ran.
    #[error("{}: source file for {rel_path:?} is missing", path.display())]
    MissingSource { path: PathBuf, rel_path: String },

    /// A cancellation token fired mid-operation.
    #[error("operation cancelled")]
    Cancelled,

    /// Everything else: filesystem and other I/O failures.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CabError {
    pub(crate) fn invalid_data(context: impl Into<String>) -> CabError {
        CabError::Io(io::Error::new(io::ErrorKind::InvalidData, context.into()))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CabError>;
