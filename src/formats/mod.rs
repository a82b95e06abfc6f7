//! Executable container formats.

pub mod pe;
