//! binpatch: load a PE image, decode its code sections into an instruction
//! stream, apply audited byte patches and rebuild cross-references.
//!
//! The usual entry point is [`session::Session`]:
//!
//! ```no_run
//! use binpatch::config::AnalysisConfig;
//! use binpatch::session::Session;
//!
//! # fn main() -> binpatch::error::Result<()> {
//! let mut session = Session::open("app.exe", AnalysisConfig::default())?;
//! let entry = session.image().entry_va();
//! if let Some(offset) = session.address_to_offset(entry) {
//!     session.apply_patch(offset, &[0xC3], "return immediately")?;
//! }
//! let xrefs = session.rebuild_xrefs();
//! println!("{} instructions, {} xrefs", session.instructions().len(), xrefs.len());
//! # Ok(())
//! # }
//! ```

pub mod analysis;
pub mod config;
pub mod core;
pub mod disasm;
pub mod error;
pub mod formats;
pub mod io;
pub mod logging;
pub mod patch;
pub mod session;
pub mod timeout;

pub use error::{BinpatchError, Result};
