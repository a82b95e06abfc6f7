//! Configuration for loading, decoding and cross-reference analysis.
//!
//! Every component receives its configuration explicitly; there are no
//! process-wide settings. The whole tree round-trips through JSON.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::disasm::registry::BackendKind;
use crate::error::{BinpatchError, Result};
use crate::timeout::DEFAULT_TIMEOUT_SECONDS;

/// Master configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Instruction stream builder configuration.
    pub decode: DecodeConfig,
    /// Cross-reference engine configuration.
    pub xrefs: XrefConfig,
    /// File loading limits.
    pub io: IoConfig,
    /// Rebuild cross-references after every patch.
    pub auto_xrefs: bool,
    /// Deadline for background rebuilds.
    pub rebuild_timeout_secs: u64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            decode: DecodeConfig::default(),
            xrefs: XrefConfig::default(),
            io: IoConfig::default(),
            auto_xrefs: false,
            rebuild_timeout_secs: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl AnalysisConfig {
    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| BinpatchError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| BinpatchError::Config(e.to_string()))
    }

    /// Load a JSON configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BinpatchError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// Reject values the components cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.decode.resync_step == 0 {
            return Err(BinpatchError::Config(
                "decode.resync_step must be at least 1".into(),
            ));
        }
        if self.decode.progress_step_percent == 0 || self.decode.progress_step_percent > 100 {
            return Err(BinpatchError::Config(
                "decode.progress_step_percent must be in 1..=100".into(),
            ));
        }
        Ok(())
    }
}

/// Instruction stream builder configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Decoder backend
    pub backend: BackendKind,
    /// Bytes skipped after an undecodable instruction
    pub resync_step: usize,
    /// Progress is reported each time this many percent more bytes are processed
    pub progress_step_percent: u8,
    /// Hard cap on instructions produced by one build
    pub max_instructions: usize,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Iced,
            resync_step: 1,
            progress_step_percent: 5,
            max_instructions: 5_000_000,
        }
    }
}

/// Cross-reference engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XrefConfig {
    /// Image base assumed by the address-likelihood check
    pub assumed_image_base: u64,
    /// Values at or above `base + address_span` are not treated as addresses
    pub address_span: u64,
    /// Values at or below this are treated as plain constants
    pub min_address: u64,
    /// Prefer the image base from the parsed headers over `assumed_image_base`
    pub use_parsed_image_base: bool,
}

impl Default for XrefConfig {
    fn default() -> Self {
        Self {
            assumed_image_base: 0x1_4000_0000,
            address_span: 0x1000_0000,
            min_address: 0x1000,
            use_parsed_image_base: true,
        }
    }
}

impl XrefConfig {
    /// The image base the heuristic should use for an image parsed at `parsed_base`.
    pub fn effective_image_base(&self, parsed_base: Option<u64>) -> u64 {
        match parsed_base {
            Some(base) if self.use_parsed_image_base => base,
            _ => self.assumed_image_base,
        }
    }
}

/// File loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IoConfig {
    /// Largest image that will be loaded
    pub max_file_size: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            max_file_size: 512 * 1024 * 1024,
        }
    }
}
