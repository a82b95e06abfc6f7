//! Loaded-image session.
//!
//! A `Session` owns one image and keeps its derived state consistent:
//! load, parse, decode, index, then on each patch a full re-decode and
//! index rebuild. Cross-references are rebuilt on demand, or after every
//! rebuild when `auto_xrefs` is set.
//!
//! The instruction stream and the cross-reference map are held behind
//! `Arc` and replaced only once a new one is complete. A reader holding a
//! snapshot never observes a partially built list. A failed rebuild leaves
//! the previous stream and index in place and marks the session stale.

use std::ops::Range;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::analysis::index::AddressIndex;
use crate::analysis::search::{self, BytePattern};
use crate::analysis::xrefs::{build_xrefs, XrefMap};
use crate::config::{AnalysisConfig, DecodeConfig};
use crate::core::disassembler::{Assembler, Bitness, DisassemblerError};
use crate::core::instruction::Instruction;
use crate::core::section::Section;
use crate::disasm::registry::{self, Backend};
use crate::disasm::stream::{InstructionStream, MetadataUpdate, StreamBuilder};
use crate::error::{BinpatchError, Result};
use crate::formats::pe::PeImage;
use crate::patch::{ByteBuffer, Patch, PatchLedger};
use crate::timeout::{blocking_with_timeout, TimeoutConfig};
use crate::{log_error, span_trace};

fn backend_error(err: DisassemblerError) -> BinpatchError {
    BinpatchError::Config(format!("decoder backend unavailable: {err}"))
}

/// Everything needed to rebuild a stream away from the session.
#[derive(Debug, Clone)]
pub struct RebuildJob {
    /// Buffer generation the bytes were taken from
    pub generation: u64,
    pub bytes: Vec<u8>,
    pub sections: Vec<Section>,
    pub image_base: u64,
    pub bitness: Bitness,
    pub decode: DecodeConfig,
    pub timeout_secs: u64,
}

/// Output of [`rebuild_in_background`].
#[derive(Debug, Clone)]
pub struct RebuiltStream {
    pub generation: u64,
    pub stream: InstructionStream,
}

/// Decode `job` on a blocking task, bounded by `job.timeout_secs`.
///
/// On expiry `cancel` is raised and the builder stops at its next
/// instruction boundary. Callers may also raise `cancel` themselves.
pub async fn rebuild_in_background(
    job: RebuildJob,
    cancel: Arc<AtomicBool>,
) -> Result<RebuiltStream> {
    let config = TimeoutConfig::new(job.timeout_secs, "instruction stream rebuild");
    let flag = cancel.clone();
    blocking_with_timeout(config, cancel, move || {
        let decoder = registry::for_backend(job.decode.backend).map_err(backend_error)?;
        let stream = StreamBuilder::new(&decoder, job.bitness, job.image_base)
            .config(&job.decode)
            .cancel_flag(&flag)
            .build(&job.bytes, &job.sections)?;
        Ok(RebuiltStream {
            generation: job.generation,
            stream,
        })
    })
    .await
}

pub struct Session {
    config: AnalysisConfig,
    buffer: ByteBuffer,
    ledger: PatchLedger,
    image: PeImage,
    decoder: Backend,
    stream: Arc<InstructionStream>,
    index: AddressIndex,
    xrefs: Option<Arc<XrefMap>>,
    generation: u64,
    stale: bool,
}

impl Session {
    /// Load, parse and decode the image at `path`.
    pub fn open<P: AsRef<Path>>(path: P, config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        let buffer = ByteBuffer::from_file(path, &config.io)?;
        Self::from_buffer(buffer, config)
    }

    pub fn from_bytes(bytes: Vec<u8>, config: AnalysisConfig) -> Result<Self> {
        config.validate()?;
        Self::from_buffer(ByteBuffer::new(bytes), config)
    }

    fn from_buffer(buffer: ByteBuffer, config: AnalysisConfig) -> Result<Self> {
        let image = PeImage::parse(buffer.as_slice())?;
        if image.is_truncated() {
            warn!(status = ?image.status, "Section table truncated; continuing with readable sections");
        }
        if !image.has_executable_section() {
            return Err(BinpatchError::NoExecutableSection);
        }

        let decoder = registry::for_backend(config.decode.backend).map_err(backend_error)?;
        let stream = StreamBuilder::new(&decoder, image.bitness, image.image_base)
            .config(&config.decode)
            .build(buffer.as_slice(), &image.sections)?;
        let index = AddressIndex::from_instructions(stream.instructions());

        info!(
            path = ?buffer.path(),
            size = buffer.len(),
            bitness = %image.bitness,
            sections = image.sections.len(),
            instructions = stream.len(),
            "Session opened"
        );

        let mut session = Self {
            config,
            buffer,
            ledger: PatchLedger::new(),
            image,
            decoder,
            stream: Arc::new(stream),
            index,
            xrefs: None,
            generation: 0,
            stale: false,
        };
        if session.config.auto_xrefs {
            session.rebuild_xrefs();
        }
        Ok(session)
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn image(&self) -> &PeImage {
        &self.image
    }

    pub fn buffer(&self) -> &ByteBuffer {
        &self.buffer
    }

    pub fn ledger(&self) -> &PatchLedger {
        &self.ledger
    }

    pub fn patches(&self) -> &[Patch] {
        self.ledger.patches()
    }

    /// Current instruction stream.
    pub fn snapshot(&self) -> Arc<InstructionStream> {
        Arc::clone(&self.stream)
    }

    pub fn instructions(&self) -> &[Instruction] {
        self.stream.instructions()
    }

    pub fn index(&self) -> &AddressIndex {
        &self.index
    }

    /// Most recent cross-reference map, if one has been built for the current stream.
    pub fn xrefs(&self) -> Option<Arc<XrefMap>> {
        self.xrefs.clone()
    }

    /// The stream no longer reflects the buffer contents.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Counter bumped on every buffer mutation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn touched(&mut self, changed: Range<usize>) {
        self.generation += 1;
        self.stale = true;
        self.index.invalidate_range(changed);
        // The map was derived from the old bytes
        self.xrefs = None;
    }

    /// Raw single-byte write that bypasses the ledger. Out-of-range offsets
    /// are ignored. The stream is left stale until [`Session::rebuild`].
    pub fn write_byte(&mut self, offset: usize, value: u8) {
        if offset < self.buffer.len() {
            self.buffer.write_byte(offset, value);
            self.touched(offset..offset + 1);
        }
    }

    /// Raw multi-byte write that bypasses the ledger. Ignored unless the whole
    /// run fits in the buffer.
    pub fn write_bytes(&mut self, offset: usize, values: &[u8]) {
        let fits = offset
            .checked_add(values.len())
            .is_some_and(|end| !values.is_empty() && end <= self.buffer.len());
        if fits {
            self.buffer.write_bytes(offset, values);
            self.touched(offset..offset + values.len());
        }
    }

    /// Apply and record a patch, then rebuild the stream and index.
    ///
    /// Range errors are reported before anything changes. If the rebuild
    /// fails the patch stays applied and recorded, and the session is stale.
    pub fn apply_patch(
        &mut self,
        offset: usize,
        new_bytes: &[u8],
        description: impl Into<String>,
    ) -> Result<Patch> {
        let patch = self
            .ledger
            .apply(&mut self.buffer, offset, new_bytes, description)?
            .clone();
        self.touched(patch.range());
        self.rebuild()?;
        Ok(patch)
    }

    /// Encode `text` at the address of `offset` and apply the result as a patch.
    pub fn assemble_and_patch<A: Assembler + ?Sized>(
        &mut self,
        assembler: &A,
        text: &str,
        offset: usize,
        description: impl Into<String>,
    ) -> Result<Patch> {
        let rva = self.image.offset_to_rva(offset).ok_or_else(|| {
            BinpatchError::InvalidInput(format!("offset {offset:#x} is not inside any section"))
        })?;
        let origin = self.image.image_base.wrapping_add(u64::from(rva));
        let bytes = assembler.assemble(text, self.image.bitness, origin)?;
        debug!(text, origin, len = bytes.len(), "Assembled patch");
        self.apply_patch(offset, &bytes, description)
    }

    /// Restore the original bytes, drop the patch history and rebuild.
    /// Returns the discarded patches.
    pub fn revert_all(&mut self) -> Result<Vec<Patch>> {
        self.buffer.revert_to_original();
        let dropped = self.ledger.clear();
        self.touched(0..self.buffer.len());
        info!(patches = dropped.len(), "Reverted all patches");
        self.rebuild()?;
        Ok(dropped)
    }

    /// Re-decode every executable section from the current bytes.
    pub fn rebuild(&mut self) -> Result<()> {
        let span = span_trace!("rebuild", generation = self.generation);
        let _guard = span.enter();

        let built = StreamBuilder::new(&self.decoder, self.image.bitness, self.image.image_base)
            .config(&self.config.decode)
            .build(self.buffer.as_slice(), &self.image.sections);
        match built {
            Ok(stream) => {
                self.install(stream);
                Ok(())
            }
            Err(e) => {
                self.stale = true;
                Err(log_error!(e, "instruction stream rebuild"))
            }
        }
    }

    fn install(&mut self, stream: InstructionStream) {
        self.index.build(stream.instructions());
        self.stream = Arc::new(stream);
        self.stale = false;
        self.xrefs = None;
        if self.config.auto_xrefs {
            self.rebuild_xrefs();
        }
        debug!(
            instructions = self.stream.len(),
            generation = self.generation,
            "Installed instruction stream"
        );
    }

    /// Capture what a background rebuild needs.
    pub fn rebuild_job(&self) -> RebuildJob {
        RebuildJob {
            generation: self.generation,
            bytes: self.buffer.as_slice().to_vec(),
            sections: self.image.sections.clone(),
            image_base: self.image.image_base,
            bitness: self.image.bitness,
            decode: self.config.decode.clone(),
            timeout_secs: self.config.rebuild_timeout_secs,
        }
    }

    /// Swap in a stream built by [`rebuild_in_background`]. Returns `false`
    /// and keeps the current stream if the buffer changed since the job was
    /// captured.
    pub fn install_rebuilt(&mut self, rebuilt: RebuiltStream) -> bool {
        if rebuilt.generation != self.generation {
            debug!(
                job = rebuilt.generation,
                current = self.generation,
                "Discarding outdated rebuild"
            );
            return false;
        }
        self.install(rebuilt.stream);
        true
    }

    /// Rebuild the cross-reference map from the current stream.
    pub fn rebuild_xrefs(&mut self) -> Arc<XrefMap> {
        let base = self
            .config
            .xrefs
            .effective_image_base(Some(self.image.image_base));
        let map = Arc::new(build_xrefs(
            self.stream.instructions(),
            base,
            &self.config.xrefs,
        ));
        self.xrefs = Some(Arc::clone(&map));
        map
    }

    /// Patch analysis-extension fields. Existing snapshots are unaffected.
    pub fn apply_metadata<I>(&mut self, updates: I) -> usize
    where
        I: IntoIterator<Item = MetadataUpdate>,
    {
        Arc::make_mut(&mut self.stream).apply_metadata(updates)
    }

    pub fn address_to_offset(&self, address: u64) -> Option<usize> {
        self.index.address_to_offset(address)
    }

    pub fn offset_to_address(&self, offset: usize) -> Option<u64> {
        self.index.offset_to_address(offset)
    }

    pub fn offset_to_instruction_index(&self, offset: usize) -> Option<usize> {
        self.index.offset_to_instruction_index(offset)
    }

    /// Instruction covering `address`.
    pub fn instruction_at(&self, address: u64) -> Option<&Instruction> {
        let i = self.index.instruction_index_at_address(address)?;
        self.stream.get(i)
    }

    pub fn find_bytes(&self, needle: &[u8]) -> Vec<usize> {
        search::find_bytes(self.buffer.as_slice(), needle)
    }

    pub fn find_pattern(&self, pattern: &str) -> Result<Vec<usize>> {
        Ok(BytePattern::parse(pattern)?.find_all(self.buffer.as_slice()))
    }

    pub fn find_instructions(&self, pattern: &str) -> Result<Vec<&Instruction>> {
        search::find_instructions(self.stream.instructions(), pattern)
    }

    /// Write the current bytes to `path`.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.buffer.save_to(path.as_ref())?;
        info!(
            path = %path.as_ref().display(),
            patches = self.ledger.len(),
            digest = %self.buffer.digest(),
            "Saved patched image"
        );
        Ok(())
    }
}
