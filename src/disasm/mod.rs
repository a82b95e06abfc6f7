//! Decoder backends and the instruction stream builder.
//!
//! - iced-x86 for x86/x64 (default)
//! - capstone for x86/x64 as an alternative backend

pub mod capstone;
pub mod iced;
pub mod registry;
pub mod stream;

pub use stream::{build_stream, build_with_cancel, BuildStats, InstructionStream, StreamBuilder};
