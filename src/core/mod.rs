//! Core data types: sections, instructions, cross-references and the
//! decode/encode capability traits.

pub mod disassembler;
pub mod instruction;
pub mod reference;
pub mod section;
