//! Queries over a decoded stream: address/offset index, cross-references
//! and byte/instruction search.

pub mod index;
pub mod search;
pub mod xrefs;
