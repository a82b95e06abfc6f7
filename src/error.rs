//! Error types for the binpatch crate.
//!
//! Component-level errors (`PeError`, `DisassemblerError`, `EncodeError`,
//! `IoError`) are folded into `BinpatchError`, which is what the `Session`
//! and every public entry point return.

use thiserror::Error;

use crate::core::disassembler::EncodeError;
use crate::formats::pe::PeError;
use crate::io::error::IoError;

/// Main error type for binpatch operations.
#[derive(Debug, Error)]
pub enum BinpatchError {
    /// Missing or incorrect signature, or an unsupported optional-header magic.
    #[error("Invalid container format: {0}")]
    Format(String),

    /// A header, section table or patch range reaches past the end of the buffer.
    #[error("Out of bounds: range {offset:#x}+{len} exceeds buffer of {limit} bytes")]
    Bounds {
        offset: usize,
        len: usize,
        limit: usize,
    },

    /// The image has no section flagged executable.
    #[error("No executable section found")]
    NoExecutableSection,

    /// A replayed patch found different bytes than it captured when first applied.
    #[error("Patch conflict at {offset:#x}: expected {expected}, found {found}")]
    PatchConflict {
        offset: usize,
        expected: String,
        found: String,
    },

    /// Caller input rejected before any state changed.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Encode capability failure.
    #[error("Encode error: {0}")]
    Encode(#[from] EncodeError),

    /// File loading errors
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    /// Configuration parsing errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Ledger export/import errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Rebuild took longer than its deadline
    #[error("Analysis timeout after {seconds}s")]
    Timeout { seconds: u64 },

    /// Rebuild was cancelled between instructions
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<PeError> for BinpatchError {
    fn from(err: PeError) -> Self {
        match err {
            PeError::TruncatedHeader { expected, actual } => BinpatchError::Bounds {
                offset: 0,
                len: expected,
                limit: actual,
            },
            other => BinpatchError::Format(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for BinpatchError {
    fn from(err: serde_json::Error) -> Self {
        BinpatchError::Serialization(err.to_string())
    }
}

/// Result type alias for binpatch operations
pub type Result<T> = std::result::Result<T, BinpatchError>;
