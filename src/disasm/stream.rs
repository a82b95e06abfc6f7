//! Instruction stream construction over every executable section.
//!
//! The builder walks executable sections in container order, decodes one
//! instruction at a time and skips `resync_step` bytes whenever the decoder
//! rejects an encoding. The result is a flat, address-ordered list that owns
//! copies of the bytes it was decoded from, so later buffer mutations cannot
//! alter it. A build is a pure function of (bytes, sections, base, bitness,
//! decoder): no partial list is ever returned.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace, warn};

use crate::config::DecodeConfig;
use crate::core::disassembler::{Bitness, Disassembler, DisassemblerError};
use crate::core::instruction::Instruction;
use crate::core::section::Section;
use crate::error::{BinpatchError, Result};

/// Counters collected while building a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub sections_decoded: usize,
    /// Raw bytes across all executable sections
    pub bytes_total: usize,
    pub bytes_processed: usize,
    pub instructions: usize,
    /// Undecodable positions skipped
    pub resyncs: usize,
    /// Positions where an instruction ran past the end of its section
    pub truncated_tails: usize,
    /// Decoding stopped at `max_instructions`
    pub budget_exhausted: bool,
}

/// Batch update for the analysis-extension fields of one instruction.
/// `None` fields leave the current value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataUpdate {
    pub address: u64,
    pub function_address: Option<u64>,
    pub symbol: Option<String>,
    pub comment: Option<String>,
    pub rip_target: Option<u64>,
    pub operand_type: Option<String>,
}

/// Decoded instructions of one build.
#[derive(Debug, Clone, Serialize)]
pub struct InstructionStream {
    instructions: Vec<Instruction>,
    stats: BuildStats,
    image_base: u64,
    bitness: Bitness,
}

impl InstructionStream {
    pub fn empty(image_base: u64, bitness: Bitness) -> Self {
        Self {
            instructions: Vec::new(),
            stats: BuildStats::default(),
            image_base,
            bitness,
        }
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Instruction> {
        self.instructions.get(index)
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn stats(&self) -> &BuildStats {
        &self.stats
    }

    pub fn image_base(&self) -> u64 {
        self.image_base
    }

    pub fn bitness(&self) -> Bitness {
        self.bitness
    }

    /// Patch analysis-extension fields in place. Returns how many updates matched
    /// an instruction start address.
    pub fn apply_metadata<I>(&mut self, updates: I) -> usize
    where
        I: IntoIterator<Item = MetadataUpdate>,
    {
        let by_address: HashMap<u64, usize> = self
            .instructions
            .iter()
            .enumerate()
            .map(|(i, ins)| (ins.address, i))
            .collect();

        let mut applied = 0;
        for update in updates {
            let Some(&i) = by_address.get(&update.address) else {
                continue;
            };
            let meta = &mut self.instructions[i].metadata;
            if update.function_address.is_some() {
                meta.function_address = update.function_address;
            }
            if update.symbol.is_some() {
                meta.symbol = update.symbol;
            }
            if update.comment.is_some() {
                meta.comment = update.comment;
            }
            if update.rip_target.is_some() {
                meta.rip_target = update.rip_target;
            }
            if update.operand_type.is_some() {
                meta.operand_type = update.operand_type;
            }
            applied += 1;
        }
        debug!(applied, "Applied instruction metadata");
        applied
    }

    /// Owning function of the instruction that starts at `address`.
    pub fn function_of(&self, address: u64) -> Option<u64> {
        self.instructions
            .iter()
            .find(|ins| ins.address == address)
            .and_then(|ins| ins.metadata.function_address)
    }
}

/// Builds an `InstructionStream` with a given decoder and mode.
pub struct StreamBuilder<'a, D: Disassembler + ?Sized> {
    decoder: &'a D,
    bitness: Bitness,
    image_base: u64,
    config: DecodeConfig,
    progress: Option<Box<dyn FnMut(u8) + 'a>>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a, D: Disassembler + ?Sized> StreamBuilder<'a, D> {
    pub fn new(decoder: &'a D, bitness: Bitness, image_base: u64) -> Self {
        Self {
            decoder,
            bitness,
            image_base,
            config: DecodeConfig::default(),
            progress: None,
            cancel: None,
        }
    }

    pub fn config(mut self, config: &DecodeConfig) -> Self {
        self.config = config.clone();
        self
    }

    /// Progress callback, called with a percentage at the configured cadence.
    /// Purely a notification: it may be called any number of times.
    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: FnMut(u8) + 'a,
    {
        self.progress = Some(Box::new(f));
        self
    }

    /// Flag checked between instructions; when set the build fails with `Cancelled`.
    pub fn cancel_flag(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    fn report(&mut self, percent: usize) {
        if let Some(cb) = self.progress.as_mut() {
            cb(percent.min(100) as u8);
        }
    }

    /// Decode every executable section of `data`.
    pub fn build(mut self, data: &[u8], sections: &[Section]) -> Result<InstructionStream> {
        let executable: Vec<&Section> = sections.iter().filter(|s| s.is_executable()).collect();
        if executable.is_empty() {
            return Err(BinpatchError::NoExecutableSection);
        }

        let total: usize = executable
            .iter()
            .map(|s| s.raw_range(data.len()).len())
            .sum();
        let step = usize::from(self.config.progress_step_percent.max(1));
        let resync = self.config.resync_step.max(1);
        let window = self.decoder.max_instruction_length().max(1);

        let mut instructions = Vec::new();
        let mut stats = BuildStats {
            bytes_total: total,
            ..BuildStats::default()
        };
        let mut done_before = 0usize;
        let mut next_report = step;
        let mut last_reported = None;

        'sections: for section in executable {
            let range = section.raw_range(data.len());
            let bytes = &data[range.clone()];
            let base_va = section.va(self.image_base);
            let mut pos = 0usize;

            while pos < bytes.len() {
                if self.cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
                    debug!(decoded = instructions.len(), "Instruction stream build cancelled");
                    return Err(BinpatchError::Cancelled);
                }
                if instructions.len() >= self.config.max_instructions {
                    warn!(
                        limit = self.config.max_instructions,
                        "Instruction budget exhausted; stream is incomplete"
                    );
                    stats.budget_exhausted = true;
                    break 'sections;
                }

                let address = base_va.wrapping_add(pos as u64);
                let end = (pos + window).min(bytes.len());
                match self.decoder.decode(&bytes[pos..end], address, self.bitness) {
                    Ok(decoded) if decoded.length > 0 && pos + decoded.length <= bytes.len() => {
                        let len = decoded.length;
                        instructions.push(Instruction::from_decoded(
                            address,
                            range.start + pos,
                            section.index,
                            &bytes[pos..pos + len],
                            decoded,
                        ));
                        pos += len;
                    }
                    Ok(_) | Err(DisassemblerError::InsufficientBytes) => {
                        trace!(address, "Truncated instruction at section tail");
                        stats.truncated_tails += 1;
                        pos += resync;
                    }
                    Err(err) => {
                        trace!(address, %err, "Resync past undecodable byte");
                        stats.resyncs += 1;
                        pos += resync;
                    }
                }

                let processed = done_before + pos.min(bytes.len());
                if total > 0 {
                    let percent = processed * 100 / total;
                    if percent >= next_report {
                        self.report(percent);
                        last_reported = Some(percent);
                        next_report = (percent / step + 1) * step;
                    }
                }
            }

            done_before += bytes.len();
            stats.sections_decoded += 1;
            debug!(
                section = %section.name,
                index = section.index,
                bytes = bytes.len(),
                decoded = instructions.len(),
                "Decoded executable section"
            );
        }

        if last_reported != Some(100) {
            self.report(100);
        }

        stats.bytes_processed = done_before.min(total);
        stats.instructions = instructions.len();
        debug!(
            instructions = stats.instructions,
            resyncs = stats.resyncs,
            sections = stats.sections_decoded,
            "Built instruction stream"
        );

        Ok(InstructionStream {
            instructions,
            stats,
            image_base: self.image_base,
            bitness: self.bitness,
        })
    }
}

/// Decode every executable section with `decoder`.
pub fn build_stream<D: Disassembler + ?Sized>(
    data: &[u8],
    sections: &[Section],
    image_base: u64,
    bitness: Bitness,
    decoder: &D,
    config: &DecodeConfig,
) -> Result<InstructionStream> {
    StreamBuilder::new(decoder, bitness, image_base)
        .config(config)
        .build(data, sections)
}

/// Like [`build_stream`], stopping with `Cancelled` once `cancel` is set.
pub fn build_with_cancel<D: Disassembler + ?Sized>(
    data: &[u8],
    sections: &[Section],
    image_base: u64,
    bitness: Bitness,
    decoder: &D,
    config: &DecodeConfig,
    cancel: &AtomicBool,
) -> Result<InstructionStream> {
    StreamBuilder::new(decoder, bitness, image_base)
        .config(config)
        .cancel_flag(cancel)
        .build(data, sections)
}
