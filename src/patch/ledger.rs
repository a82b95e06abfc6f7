//! Ordered, append-only history of applied patches.
//!
//! A `Patch` is recorded once, when its write succeeds, and never changes
//! afterwards. The ledger can be exported to JSON for auditing and replayed
//! onto a fresh copy of the same image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info, warn};

use super::buffer::ByteBuffer;
use crate::error::{BinpatchError, Result};

/// One applied patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub offset: usize,
    /// Bytes that were overwritten, captured at apply time
    #[serde(with = "hex_bytes")]
    pub original: Vec<u8>,
    #[serde(with = "hex_bytes")]
    pub new_bytes: Vec<u8>,
    pub description: String,
    pub applied_at: DateTime<Utc>,
}

impl Patch {
    pub fn len(&self) -> usize {
        self.new_bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.new_bytes.is_empty()
    }

    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.new_bytes.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchLedger {
    patches: Vec<Patch>,
}

impl PatchLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn patches(&self) -> &[Patch] {
        &self.patches
    }

    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn last(&self) -> Option<&Patch> {
        self.patches.last()
    }

    /// Drop all history, returning it.
    pub fn clear(&mut self) -> Vec<Patch> {
        std::mem::take(&mut self.patches)
    }

    /// Apply `new_bytes` at `offset` and record the patch.
    ///
    /// Empty input or a range that does not fit the buffer is rejected before
    /// any byte changes.
    pub fn apply(
        &mut self,
        buffer: &mut ByteBuffer,
        offset: usize,
        new_bytes: &[u8],
        description: impl Into<String>,
    ) -> Result<&Patch> {
        let original = buffer.checked_write(offset, new_bytes).inspect_err(|e| {
            warn!(offset, len = new_bytes.len(), error = %e, "Patch rejected");
        })?;
        let patch = Patch {
            offset,
            original,
            new_bytes: new_bytes.to_vec(),
            description: description.into(),
            applied_at: Utc::now(),
        };
        debug!(
            offset = patch.offset,
            len = patch.len(),
            description = %patch.description,
            "Applied patch"
        );
        self.patches.push(patch);
        Ok(&self.patches[self.patches.len() - 1])
    }

    /// Re-apply every patch in order onto `buffer`.
    ///
    /// Before each write the bytes under the patch must equal its captured
    /// original bytes; otherwise replay stops with `PatchConflict` and the
    /// patches already replayed stay applied. Returns the number replayed.
    pub fn replay_onto(&self, buffer: &mut ByteBuffer) -> Result<usize> {
        for (replayed, patch) in self.patches.iter().enumerate() {
            let found = buffer
                .read(patch.offset, patch.len())
                .ok_or(BinpatchError::Bounds {
                    offset: patch.offset,
                    len: patch.len(),
                    limit: buffer.len(),
                })?;
            if found != patch.original.as_slice() {
                warn!(offset = patch.offset, replayed, "Patch replay conflict");
                return Err(BinpatchError::PatchConflict {
                    offset: patch.offset,
                    expected: hex::encode(&patch.original),
                    found: hex::encode(found),
                });
            }
            buffer.checked_write(patch.offset, &patch.new_bytes)?;
        }
        info!(patches = self.patches.len(), "Replayed patch ledger");
        Ok(self.patches.len())
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(d)?;
        hex::decode(text).map_err(serde::de::Error::custom)
    }
}
