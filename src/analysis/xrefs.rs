//! Heuristic cross-reference extraction.
//!
//! Two families are recognised. Control flow: a call or jump whose operand
//! is a direct near-branch immediate. Data: a 64-bit move-immediate of an
//! address-like value, a RIP-relative `lea`, and a RIP-relative memory
//! access. Indirect targets and string literals are not followed. Coverage
//! is best-effort; the map is rebuilt wholesale on every pass.

use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::config::XrefConfig;
use crate::core::instruction::{Instruction, OperandKind};
use crate::core::reference::{CrossReference, XrefKind};

/// Whether `value` plausibly names a location in an image loaded at `image_base`.
///
/// Non-zero, above `min_address` and below `image_base + address_span`.
pub fn looks_like_address(value: u64, image_base: u64, config: &XrefConfig) -> bool {
    value != 0
        && value > config.min_address
        && value < image_base.saturating_add(config.address_span)
}

/// Source-keyed multimap of references.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct XrefMap {
    by_source: BTreeMap<u64, Vec<CrossReference>>,
    count: usize,
}

impl XrefMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, xref: CrossReference) {
        self.by_source.entry(xref.source).or_default().push(xref);
        self.count += 1;
    }

    /// References originating at `address`.
    pub fn outgoing(&self, address: u64) -> &[CrossReference] {
        self.by_source
            .get(&address)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// References targeting `address`. Unindexed; scans every entry.
    pub fn incoming(&self, address: u64) -> Vec<&CrossReference> {
        self.iter().filter(|x| x.target == address).collect()
    }

    pub fn by_kind(&self, kind: XrefKind) -> impl Iterator<Item = &CrossReference> + '_ {
        self.iter().filter(move |x| x.kind == kind)
    }

    /// All references in source-address order.
    pub fn iter(&self) -> impl Iterator<Item = &CrossReference> + '_ {
        self.by_source.values().flatten()
    }

    pub fn sources(&self) -> impl Iterator<Item = u64> + '_ {
        self.by_source.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

fn is_mov(mnemonic: &str) -> bool {
    mnemonic == "mov" || mnemonic == "movabs"
}

fn data_refs(ins: &Instruction, image_base: u64, config: &XrefConfig, out: &mut XrefMap) {
    if is_mov(&ins.mnemonic) {
        let imm64 = ins
            .operands
            .iter()
            .find(|op| op.kind == OperandKind::Immediate && op.size == 64)
            .and_then(|op| op.immediate);
        if let Some(value) = imm64 {
            if looks_like_address(value, image_base, config) {
                out.insert(CrossReference::new(ins.address, value, XrefKind::MovImm64));
            }
        }
    }

    let Some(op) = ins.rip_relative_operand() else {
        return;
    };
    let Some(target) = op.rip_target(ins.end_address()) else {
        return;
    };
    if ins.mnemonic == "lea" {
        out.insert(CrossReference::new(ins.address, target, XrefKind::LeaRip));
    } else {
        let direction = if op.access.is_write() { "write" } else { "read" };
        out.insert(
            CrossReference::new(ins.address, target, XrefKind::MovRip).with_description(direction),
        );
    }
}

/// Build the reference map for `instructions`.
pub fn build_xrefs(instructions: &[Instruction], image_base: u64, config: &XrefConfig) -> XrefMap {
    let mut map = XrefMap::new();
    for ins in instructions {
        if let Some(kind) = XrefKind::from_flow(ins.flow) {
            // Indirect branches carry no near-branch operand and are skipped.
            if let Some(target) = ins.near_branch_target() {
                map.insert(CrossReference::new(ins.address, target, kind));
            }
            continue;
        }
        data_refs(ins, image_base, config, &mut map);
    }
    debug!(
        instructions = instructions.len(),
        xrefs = map.len(),
        image_base,
        "Built cross-reference map"
    );
    map
}
