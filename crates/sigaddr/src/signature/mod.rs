//! Signature compilation
//!
//! Turns an author-written pattern such as `"E8 ?? ?? ?? ?? 84 C0"` into a
//! word-packed, masked form the scanner can compare eight bytes at a time,
//! and decides how a match is turned into an address.

mod set;

use strum::Display;

use crate::error::{Error, Result};

pub use set::*;

/// Number of pattern bytes packed into one comparison word.
pub const WORD_SIZE: usize = 8;

/// x86-64 `CALL rel32` opcode.
pub const NEAR_CALL_OPCODE: u8 = 0xE8;

/// x86-64 `JMP rel32` opcode.
pub const NEAR_JMP_OPCODE: u8 = 0xE9;

/// Value of the trailing field carried by generated registrations.
///
/// Its meaning is unknown; it is kept and displayed but never interpreted.
pub const RESERVED_SENTINEL: u64 = 0;

/// Size of the relative displacement field read in `RelativeDisplacement` mode.
pub const DISPLACEMENT_SIZE: u64 = 4;

/// How a match location becomes the final address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Mode {
    /// The match (plus offset) is the address.
    Direct,
    /// A rel32 displacement at `match + offset` is applied to the address following it.
    RelativeDisplacement,
}

/// The addressing idiom that selected a signature's resolution offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Idiom {
    /// The pattern starts at the target itself.
    Direct,
    /// The pattern starts with a near CALL/JMP whose rel32 operand follows the opcode.
    NearCallOrJump,
    /// The author named the displacement offset (LEA/MOV with a RIP operand and the like).
    ExplicitRelative,
}

impl Idiom {
    /// Pick the idiom and resolution offset for a pattern.
    ///
    /// An explicit offset always wins; otherwise the pattern must open with a
    /// literal near CALL/JMP opcode. A leading wildcard means `Direct`.
    pub fn classify(first_token: Option<u8>, explicit_offset: Option<u32>) -> (Self, u32) {
        match explicit_offset {
            Some(0) => (Idiom::Direct, 0),
            Some(offset) => (Idiom::ExplicitRelative, offset),
            None if matches!(first_token, Some(NEAR_CALL_OPCODE | NEAR_JMP_OPCODE)) => {
                (Idiom::NearCallOrJump, 1)
            }
            None => (Idiom::Direct, 0),
        }
    }

    pub fn mode(self) -> Mode {
        match self {
            Idiom::Direct => Mode::Direct,
            Idiom::NearCallOrJump | Idiom::ExplicitRelative => Mode::RelativeDisplacement,
        }
    }
}

/// A pattern packed into masked 64-bit words.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CompiledSignature {
    pattern: String,
    data: Vec<u64>,
    mask: Vec<u64>,
    raw_len: usize,
    resolution_offset: u32,
    idiom: Idiom,
    anchor: (usize, u8),
    reserved: u64,
}

impl CompiledSignature {
    /// Pattern text as the author wrote it.
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn data(&self) -> &[u64] {
        &self.data
    }

    pub fn mask(&self) -> &[u64] {
        &self.mask
    }

    /// Number of tokens in the pattern text, before padding.
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    /// Length including wildcard padding, always a multiple of [`WORD_SIZE`].
    pub fn padded_len(&self) -> usize {
        self.data.len() * WORD_SIZE
    }

    pub fn resolution_offset(&self) -> u32 {
        self.resolution_offset
    }

    pub fn mode(&self) -> Mode {
        self.idiom.mode()
    }

    pub fn idiom(&self) -> Idiom {
        self.idiom
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    /// Index and value of the first literal byte.
    pub fn anchor(&self) -> (usize, u8) {
        self.anchor
    }

    /// Pattern byte at `index`, `None` for wildcards and padding.
    pub fn byte_at(&self, index: usize) -> Option<u8> {
        let word = index / WORD_SIZE;
        let shift = (index % WORD_SIZE) * 8;
        let mask = (*self.mask.get(word)? >> shift) & 0xFF;
        (mask != 0).then(|| ((self.data[word] >> shift) & 0xFF) as u8)
    }

    /// Pattern text including the wildcard padding.
    pub fn padded_pattern(&self) -> String {
        let bytes: Vec<Option<u8>> = (0..self.padded_len()).map(|i| self.byte_at(i)).collect();
        format_pattern(&bytes)
    }

    /// Compare the pattern against the start of `window`.
    ///
    /// `window` must hold at least [`padded_len`](Self::padded_len) bytes;
    /// shorter windows never match.
    #[inline]
    pub fn matches_at(&self, window: &[u8]) -> bool {
        if window.len() < self.padded_len() {
            return false;
        }
        window
            .chunks_exact(WORD_SIZE)
            .zip(self.data.iter().zip(&self.mask))
            .all(|(chunk, (&data, &mask))| {
                let mut word = [0u8; WORD_SIZE];
                word.copy_from_slice(chunk);
                (u64::from_le_bytes(word) ^ data) & mask == 0
            })
    }

    /// Two signatures are equivalent when they match the same bytes and
    /// resolve the same way, regardless of how the pattern text was spelled.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.data == other.data
            && self.mask == other.mask
            && self.raw_len == other.raw_len
            && self.resolution_offset == other.resolution_offset
            && self.idiom == other.idiom
    }
}

/// Compile a pattern.
///
/// `explicit_offset` overrides opcode detection: `Some(0)` means the match is
/// the address, any other value names where the rel32 displacement starts.
pub fn compile(raw: &str, explicit_offset: Option<u32>) -> Result<CompiledSignature> {
    let bytes = parse_pattern(raw)?;

    let anchor = bytes
        .iter()
        .enumerate()
        .find_map(|(i, b)| b.map(|value| (i, value)))
        .ok_or_else(|| Error::malformed(raw, "pattern has no literal bytes"))?;

    let words = bytes.len().div_ceil(WORD_SIZE);
    let mut data = vec![0u64; words];
    let mut mask = vec![0u64; words];
    for (i, byte) in bytes.iter().enumerate() {
        if let Some(value) = byte {
            let shift = (i % WORD_SIZE) * 8;
            data[i / WORD_SIZE] |= (*value as u64) << shift;
            mask[i / WORD_SIZE] |= 0xFF << shift;
        }
    }

    let (idiom, resolution_offset) = Idiom::classify(bytes[0], explicit_offset);

    Ok(CompiledSignature {
        pattern: raw.trim().to_string(),
        data,
        mask,
        raw_len: bytes.len(),
        resolution_offset,
        idiom,
        anchor,
        reserved: RESERVED_SENTINEL,
    })
}

/// Parse whitespace-separated hex bytes and `??`/`?` wildcards.
pub fn parse_pattern(pattern: &str) -> Result<Vec<Option<u8>>> {
    let mut bytes = Vec::new();
    for token in pattern.split_whitespace() {
        if token == "??" || token == "?" {
            bytes.push(None);
            continue;
        }

        if token.len() != 2 || !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(Error::malformed(
                pattern,
                format!("invalid token '{}', expected two hex digits or ??", token),
            ));
        }
        let value = u8::from_str_radix(token, 16).map_err(|e| {
            Error::malformed(pattern, format!("invalid token '{}': {}", token, e))
        })?;
        bytes.push(Some(value));
    }

    if bytes.is_empty() {
        return Err(Error::malformed(pattern, "pattern is empty"));
    }

    Ok(bytes)
}

pub fn format_pattern(bytes: &[Option<u8>]) -> String {
    bytes
        .iter()
        .map(|b| match b {
            Some(value) => format!("{:02X}", value),
            None => "??".to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ")
}
