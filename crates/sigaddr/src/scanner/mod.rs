//! Multi-pattern module scanner
//!
//! Walks the readable regions of a module once and matches every pending
//! signature in the same pass. Each memory byte is routed through a table
//! keyed by the first literal byte of each signature, so the cost of a pass
//! grows with the module size rather than with the number of signatures.
//!
//! Every occurrence is counted: a signature that matches more than once is
//! reported as ambiguous instead of resolving to whichever hit came first.

mod config;

pub use config::*;

use std::collections::HashMap;
use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::memory::{ModuleRegion, ReadMemory};
use crate::registry::EntryHandle;
use crate::signature::CompiledSignature;

/// A location where every literal byte of a signature matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Match {
    pub address: u64,
    /// Region the match was found in; bounds the displacement read.
    pub region: ModuleRegion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    UniqueMatch(Match),
    AmbiguousMatch(usize),
}

#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    count: usize,
    first: Option<Match>,
}

impl Tally {
    fn record(&mut self, found: Match) {
        self.count += 1;
        self.keep_lowest(Some(found));
    }

    fn keep_lowest(&mut self, found: Option<Match>) {
        if let Some(found) = found
            && self.first.is_none_or(|first| found.address < first.address)
        {
            self.first = Some(found);
        }
    }

    fn merge(mut self, other: Tally) -> Tally {
        self.count += other.count;
        self.keep_lowest(other.first);
        self
    }

    fn into_result(self) -> MatchResult {
        match (self.count, self.first) {
            (1, Some(found)) => MatchResult::UniqueMatch(found),
            (0, _) | (_, None) => MatchResult::NoMatch,
            (count, _) => MatchResult::AmbiguousMatch(count),
        }
    }
}

/// Signature indices grouped by the value of their first literal byte.
struct AnchorTable(Vec<Vec<usize>>);

impl AnchorTable {
    fn new(signatures: &[&CompiledSignature]) -> Self {
        let mut table = vec![Vec::new(); 256];
        for (index, signature) in signatures.iter().enumerate() {
            table[signature.anchor().1 as usize].push(index);
        }
        Self(table)
    }

    #[inline]
    fn get(&self, byte: u8) -> &[usize] {
        &self.0[byte as usize]
    }
}

pub struct ModuleScanner<'a, R: ReadMemory + ?Sized> {
    memory: &'a R,
    config: ScannerConfig,
}

impl<'a, R: ReadMemory + ?Sized> ModuleScanner<'a, R> {
    pub fn new(memory: &'a R) -> Self {
        Self::with_config(memory, ScannerConfig::default())
    }

    pub fn with_config(memory: &'a R, config: ScannerConfig) -> Self {
        Self { memory, config }
    }

    /// Match all `pending` entries in one pass, keyed by entry name.
    pub fn scan(
        &self,
        regions: &[ModuleRegion],
        pending: &[EntryHandle],
    ) -> HashMap<String, MatchResult> {
        let signatures: Vec<&CompiledSignature> = pending.iter().map(|e| e.signature()).collect();
        let results = self.scan_signatures(regions, &signatures);

        pending
            .iter()
            .zip(results)
            .map(|(entry, result)| {
                debug!("  {}: {:?}", entry.name(), result);
                (entry.name().to_string(), result)
            })
            .collect()
    }

    /// Match a single signature, using a `memchr` search for its first literal byte.
    pub fn scan_one(&self, regions: &[ModuleRegion], signature: &CompiledSignature) -> MatchResult {
        self.scan_signatures(regions, &[signature])
            .pop()
            .unwrap_or(MatchResult::NoMatch)
    }

    /// Match `signatures` in one pass; results are in the same order.
    pub fn scan_signatures(
        &self,
        regions: &[ModuleRegion],
        signatures: &[&CompiledSignature],
    ) -> Vec<MatchResult> {
        if signatures.is_empty() {
            return Vec::new();
        }

        let started = Instant::now();
        let anchors = AnchorTable::new(signatures);
        let scannable: Vec<&ModuleRegion> = regions
            .iter()
            .filter(|region| self.should_scan(region))
            .collect();
        let total_bytes: usize = scannable.iter().map(|region| region.len).sum();

        let tallies = scannable
            .par_iter()
            .map(|region| self.scan_region(region, signatures, &anchors))
            .reduce(
                || vec![Tally::default(); signatures.len()],
                |left, right| {
                    left.into_iter()
                        .zip(right)
                        .map(|(a, b)| a.merge(b))
                        .collect()
                },
            );

        info!(
            "Scanned {} regions ({:#x} bytes) for {} signatures in {:?}",
            scannable.len(),
            total_bytes,
            signatures.len(),
            started.elapsed()
        );

        tallies.into_iter().map(Tally::into_result).collect()
    }

    fn should_scan(&self, region: &ModuleRegion) -> bool {
        region.len > 0
            && region.flags.readable
            && (!self.config.executable_only || region.flags.executable)
    }

    fn scan_region(
        &self,
        region: &ModuleRegion,
        signatures: &[&CompiledSignature],
        anchors: &AnchorTable,
    ) -> Vec<Tally> {
        let mut tallies = vec![Tally::default(); signatures.len()];
        let max_raw = signatures.iter().map(|s| s.raw_len()).max().unwrap_or(1);
        let max_padded = signatures.iter().map(|s| s.padded_len()).max().unwrap_or(0);
        let chunk_size = self.config.chunk_size.max(1);
        // Bytes carried into the next chunk so matches across a boundary are seen.
        let overlap = max_raw - 1;

        let mut tail: Vec<u8> = Vec::new();
        let mut offset = 0usize;

        while offset < region.len {
            let read_size = chunk_size.min(region.len - offset);
            let address = region.base + offset as u64;
            offset += read_size;

            let chunk = match self.memory.read_bytes(address, read_size) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        "Skipping unreadable chunk at {:#x} ({:#x} bytes): {}",
                        address, read_size, e
                    );
                    tail.clear();
                    continue;
                }
            };

            let seen = tail.len();
            let data_base = address - seen as u64;
            let mut data = Vec::with_capacity(seen + chunk.len() + max_padded);
            data.extend_from_slice(&tail);
            data.extend_from_slice(&chunk);
            let len = data.len();
            // Zeroed slack only ever lines up with wildcard padding.
            data.resize(len + max_padded, 0);

            let mut try_match = |index: usize, anchor_pos: usize| {
                let signature = signatures[index];
                let Some(start) = anchor_pos.checked_sub(signature.anchor().0) else {
                    return;
                };
                let end = start + signature.raw_len();
                // Starts ending inside the carried tail were checked with the previous chunk.
                if end <= seen || end > len {
                    return;
                }
                if signature.matches_at(&data[start..]) {
                    tallies[index].record(Match {
                        address: data_base + start as u64,
                        region: *region,
                    });
                }
            };

            if signatures.len() == 1 {
                let anchor_byte = signatures[0].anchor().1;
                for pos in memchr::memchr_iter(anchor_byte, &data[..len]) {
                    try_match(0, pos);
                }
            } else {
                for (pos, &byte) in data[..len].iter().enumerate() {
                    for &index in anchors.get(byte) {
                        try_match(index, pos);
                    }
                }
            }

            tail = data[len.saturating_sub(overlap)..len].to_vec();
        }

        debug!(
            "Scanned region {:#x}..{:#x}",
            region.base,
            region.end()
        );
        tallies
    }
}
