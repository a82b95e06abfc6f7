//! Byte buffer and patch ledger.

pub mod buffer;
pub mod ledger;

pub use buffer::{ByteBuffer, ModifiedByte};
pub use ledger::{Patch, PatchLedger};
