//! Cross-reference type.
//!
//! A `CrossReference` is a directed edge from an instruction address to a
//! code or data address, tagged with the pattern that produced it.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::instruction::FlowClass;

/// Pattern that produced a cross-reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum XrefKind {
    /// Direct near call
    Call,
    /// Direct unconditional jump
    Jump,
    /// Direct conditional jump
    CondJump,
    /// 64-bit move-immediate of an address-like value
    MovImm64,
    /// RIP-relative effective address computation
    LeaRip,
    /// RIP-relative memory read or write
    MovRip,
}

impl XrefKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            XrefKind::Call => "call",
            XrefKind::Jump => "jump",
            XrefKind::CondJump => "cond_jump",
            XrefKind::MovImm64 => "mov_imm64",
            XrefKind::LeaRip => "lea_rip",
            XrefKind::MovRip => "mov_rip",
        }
    }

    /// Control-flow kind for a branch class; `None` for non-branches and returns.
    pub fn from_flow(flow: FlowClass) -> Option<Self> {
        match flow {
            FlowClass::Call => Some(XrefKind::Call),
            FlowClass::Jump => Some(XrefKind::Jump),
            FlowClass::ConditionalJump => Some(XrefKind::CondJump),
            FlowClass::Return | FlowClass::None => None,
        }
    }

    pub fn is_code(&self) -> bool {
        matches!(self, XrefKind::Call | XrefKind::Jump | XrefKind::CondJump)
    }

    pub fn is_data(&self) -> bool {
        !self.is_code()
    }
}

impl fmt::Display for XrefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed reference between two addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CrossReference {
    /// Address of the referencing instruction
    pub source: u64,
    pub target: u64,
    pub kind: XrefKind,
    pub description: Option<String>,
}

impl CrossReference {
    pub fn new(source: u64, target: u64, kind: XrefKind) -> Self {
        Self {
            source,
            target,
            kind,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl fmt::Display for CrossReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x} -> {:#x} ({})", self.source, self.target, self.kind)?;
        if let Some(d) = &self.description {
            write!(f, " [{}]", d)?;
        }
        Ok(())
    }
}
