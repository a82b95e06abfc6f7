//! Address/offset index over a decoded instruction stream.
//!
//! Lookups are defined only over bytes covered by decoded instructions.
//! The cache is built once per stream in O(n): exact instruction starts go
//! through hash maps, interior bytes through an ordered map of starts.
//! Validity is all-or-nothing; a stale index answers every query with
//! `None` until it is rebuilt.
//!
//! When instruction ranges overlap (executable sections sharing raw bytes,
//! for instance) a byte can be covered by more than one instruction and the
//! nearest start is not necessarily the first cover. Lookups on that axis
//! then fall back to a front-to-back scan.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::ops::Range;
use tracing::debug;

use crate::core::instruction::Instruction;

/// Snapshot of the cache state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct IndexStats {
    pub entries: usize,
    pub valid: bool,
    /// Lowest cached instruction address
    pub span_start: u64,
    /// One past the highest cached instruction byte
    pub span_end: u64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    address: u64,
    offset: usize,
    length: usize,
}

#[derive(Debug, Clone, Default)]
pub struct AddressIndex {
    entries: Vec<Entry>,
    addr_starts: HashMap<u64, usize>,
    offset_starts: HashMap<usize, usize>,
    addr_ordered: BTreeMap<u64, usize>,
    offset_ordered: BTreeMap<usize, usize>,
    address_span: Range<u64>,
    offset_span: Range<usize>,
    /// No two cached address ranges overlap
    addr_disjoint: bool,
    /// No two cached offset ranges overlap
    offset_disjoint: bool,
    valid: bool,
}

/// Whether the ranges keyed by `ordered` are pairwise disjoint.
fn disjoint<K: Ord + Copy>(
    ordered: &BTreeMap<K, usize>,
    count: usize,
    end: impl Fn(usize) -> K,
) -> bool {
    if ordered.len() != count {
        return false;
    }
    let mut prev_end: Option<K> = None;
    for (&start, &i) in ordered {
        if prev_end.is_some_and(|e| start < e) {
            return false;
        }
        prev_end = Some(end(i));
    }
    true
}

impl AddressIndex {
    /// An empty, stale index.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_instructions(instructions: &[Instruction]) -> Self {
        let mut index = Self::new();
        index.build(instructions);
        index
    }

    /// Replace the cache contents with `instructions` and mark it valid.
    pub fn build(&mut self, instructions: &[Instruction]) {
        self.entries.clear();
        self.addr_starts.clear();
        self.offset_starts.clear();
        self.addr_ordered.clear();
        self.offset_ordered.clear();
        self.entries.reserve(instructions.len());
        self.addr_starts.reserve(instructions.len());
        self.offset_starts.reserve(instructions.len());

        let mut addr_lo = u64::MAX;
        let mut addr_hi = 0u64;
        let mut off_lo = usize::MAX;
        let mut off_hi = 0usize;

        for (i, ins) in instructions.iter().enumerate() {
            self.entries.push(Entry {
                address: ins.address,
                offset: ins.file_offset,
                length: ins.length,
            });
            // First instruction wins on duplicate keys, matching a front-to-back scan.
            self.addr_starts.entry(ins.address).or_insert(i);
            self.offset_starts.entry(ins.file_offset).or_insert(i);
            self.addr_ordered.entry(ins.address).or_insert(i);
            self.offset_ordered.entry(ins.file_offset).or_insert(i);

            addr_lo = addr_lo.min(ins.address);
            addr_hi = addr_hi.max(ins.end_address());
            off_lo = off_lo.min(ins.file_offset);
            off_hi = off_hi.max(ins.file_offset + ins.length);
        }

        if instructions.is_empty() {
            self.address_span = 0..0;
            self.offset_span = 0..0;
        } else {
            self.address_span = addr_lo..addr_hi;
            self.offset_span = off_lo..off_hi;
        }
        let entries = &self.entries;
        self.addr_disjoint = disjoint(&self.addr_ordered, entries.len(), |i| {
            entries[i].address.saturating_add(entries[i].length as u64)
        });
        self.offset_disjoint = disjoint(&self.offset_ordered, entries.len(), |i| {
            entries[i].offset + entries[i].length
        });
        self.valid = true;
        debug!(
            entries = self.entries.len(),
            addr_disjoint = self.addr_disjoint,
            offset_disjoint = self.offset_disjoint,
            span_start = self.address_span.start,
            span_end = self.address_span.end,
            "Built address index"
        );
    }

    /// Mark the whole cache stale.
    pub fn invalidate(&mut self) {
        if self.valid {
            debug!("Address index invalidated");
        }
        self.valid = false;
    }

    /// Mark the cache stale if the changed file-offset range overlaps the
    /// cached instructions. Returns whether the cache is now stale.
    pub fn invalidate_range(&mut self, changed: Range<usize>) -> bool {
        let overlaps = changed.start < self.offset_span.end && self.offset_span.start < changed.end;
        if overlaps {
            self.invalidate();
        }
        !self.valid
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            entries: self.entries.len(),
            valid: self.valid,
            span_start: self.address_span.start,
            span_end: self.address_span.end,
        }
    }

    /// Index of the instruction whose bytes cover `address`.
    pub fn instruction_index_at_address(&self, address: u64) -> Option<usize> {
        if !self.valid {
            return None;
        }
        if !self.addr_disjoint {
            return self
                .entries
                .iter()
                .position(|e| address >= e.address && address - e.address < e.length as u64);
        }
        if let Some(&i) = self.addr_starts.get(&address) {
            return Some(i);
        }
        let (_, &i) = self.addr_ordered.range(..=address).next_back()?;
        let e = &self.entries[i];
        (address - e.address < e.length as u64).then_some(i)
    }

    pub fn address_to_offset(&self, address: u64) -> Option<usize> {
        let i = self.instruction_index_at_address(address)?;
        let e = &self.entries[i];
        Some(e.offset + (address - e.address) as usize)
    }

    /// Index of the instruction whose bytes cover file offset `offset`.
    pub fn offset_to_instruction_index(&self, offset: usize) -> Option<usize> {
        if !self.valid {
            return None;
        }
        if !self.offset_disjoint {
            return self
                .entries
                .iter()
                .position(|e| offset >= e.offset && offset - e.offset < e.length);
        }
        if let Some(&i) = self.offset_starts.get(&offset) {
            return Some(i);
        }
        let (_, &i) = self.offset_ordered.range(..=offset).next_back()?;
        let e = &self.entries[i];
        (offset - e.offset < e.length).then_some(i)
    }

    pub fn offset_to_address(&self, offset: usize) -> Option<u64> {
        let i = self.offset_to_instruction_index(offset)?;
        let e = &self.entries[i];
        Some(e.address + (offset - e.offset) as u64)
    }
}

/// Uncached `address_to_offset`: first instruction covering `address`.
pub fn linear_address_to_offset(instructions: &[Instruction], address: u64) -> Option<usize> {
    instructions
        .iter()
        .find(|ins| ins.contains_address(address))
        .map(|ins| ins.file_offset + (address - ins.address) as usize)
}

/// Uncached `offset_to_instruction_index`.
pub fn linear_offset_to_instruction_index(
    instructions: &[Instruction],
    offset: usize,
) -> Option<usize> {
    instructions.iter().position(|ins| ins.contains_offset(offset))
}
