//! Byte and instruction search over a loaded image.

use memchr::memmem;
use regex::Regex;
use std::fmt;

use crate::core::instruction::Instruction;
use crate::error::{BinpatchError, Result};

/// Every start offset of `needle` in `haystack`, overlapping matches included.
pub fn find_bytes(haystack: &[u8], needle: &[u8]) -> Vec<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return Vec::new();
    }
    let finder = memmem::Finder::new(needle);
    let mut out = Vec::new();
    let mut pos = 0;
    while let Some(hit) = finder.find(&haystack[pos..]) {
        out.push(pos + hit);
        pos += hit + 1;
        if pos + needle.len() > haystack.len() {
            break;
        }
    }
    out
}

/// Hex byte pattern with single-byte wildcards, e.g. `48 8B ?? 05`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytePattern {
    tokens: Vec<Option<u8>>,
}

impl BytePattern {
    /// Parse whitespace separated hex bytes; `??` or `?` matches any byte.
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = text
            .split_whitespace()
            .map(|tok| match tok {
                "?" | "??" => Ok(None),
                _ if tok.len() == 2 && tok.bytes().all(|b| b.is_ascii_hexdigit()) => {
                    u8::from_str_radix(tok, 16)
                        .map(Some)
                        .map_err(|_| BinpatchError::InvalidInput(format!("bad pattern byte '{tok}'")))
                }
                _ => Err(BinpatchError::InvalidInput(format!(
                    "bad pattern byte '{tok}'"
                ))),
            })
            .collect::<Result<Vec<_>>>()?;
        if tokens.is_empty() {
            return Err(BinpatchError::InvalidInput("empty byte pattern".into()));
        }
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn matches_at(&self, haystack: &[u8], offset: usize) -> bool {
        let Some(window) = offset
            .checked_add(self.tokens.len())
            .and_then(|end| haystack.get(offset..end))
        else {
            return false;
        };
        window
            .iter()
            .zip(&self.tokens)
            .all(|(b, t)| t.map_or(true, |v| v == *b))
    }

    /// Longest run of literal bytes, as (position in pattern, bytes).
    fn anchor(&self) -> Option<(usize, Vec<u8>)> {
        let mut best: Option<(usize, Vec<u8>)> = None;
        let mut i = 0;
        while i < self.tokens.len() {
            if self.tokens[i].is_none() {
                i += 1;
                continue;
            }
            let start = i;
            let mut run = Vec::new();
            while let Some(Some(b)) = self.tokens.get(i) {
                run.push(*b);
                i += 1;
            }
            if best.as_ref().map_or(true, |(_, r)| run.len() > r.len()) {
                best = Some((start, run));
            }
        }
        best
    }

    /// Every offset in `haystack` where the pattern matches.
    pub fn find_all(&self, haystack: &[u8]) -> Vec<usize> {
        if self.tokens.len() > haystack.len() {
            return Vec::new();
        }
        let Some((at, literal)) = self.anchor() else {
            return (0..=haystack.len() - self.tokens.len()).collect();
        };
        find_bytes(haystack, &literal)
            .into_iter()
            .filter_map(|hit| hit.checked_sub(at))
            .filter(|&start| self.matches_at(haystack, start))
            .collect()
    }
}

impl fmt::Display for BytePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, t) in self.tokens.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            match t {
                Some(b) => write!(f, "{:02X}", b)?,
                None => f.write_str("??")?,
            }
        }
        Ok(())
    }
}

/// Instructions whose rendered text (`mnemonic op_str`) matches `pattern`.
pub fn find_instructions<'a>(
    instructions: &'a [Instruction],
    pattern: &str,
) -> Result<Vec<&'a Instruction>> {
    let re = Regex::new(pattern)
        .map_err(|e| BinpatchError::InvalidInput(format!("bad instruction regex: {e}")))?;
    Ok(instructions.iter().filter(|ins| re.is_match(&ins.text())).collect())
}
