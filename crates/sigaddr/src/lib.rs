//! # sigaddr
//!
//! Signature-based address resolution for native modules.
//!
//! This crate provides:
//! - A compiler that packs byte patterns with wildcards into masked 64-bit words
//! - A registry of named signatures shared across threads
//! - A single-pass scanner that searches module regions for many signatures at once
//! - x86-64 rel32 resolution for call sites and RIP-relative operands
//! - An access table that resolves each entry at most once and caches the outcome
//! - Memory sources for dump files, the current process and (on Windows) foreign processes
//! - Signature-set files and a version-keyed address cache

pub mod cache;
pub mod error;
pub mod memory;
pub mod prelude;
pub mod registry;
pub mod resolver;
pub mod scanner;
pub mod signature;
pub mod table;

pub use cache::{AddressCache, CACHE_FILE};
pub use error::{Error, FailureKind, ResolveFailure, Result};
#[cfg(target_os = "windows")]
pub use memory::ProcessHandle;
pub use memory::{
    CurrentProcess, ModuleRegion, ReadMemory, RegionFlags, SnapshotMemory, SnapshotMemoryBuilder,
};
pub use registry::{EntryHandle, EntryState, SignatureEntry, SignatureRegistry};
pub use resolver::{resolve, resolve_in_buffer};
pub use scanner::{Match, MatchResult, ModuleScanner, ScannerConfig, ScannerConfigBuilder};
pub use signature::{
    CompiledSignature, Idiom, Mode, SignatureDef, SignatureSet, compile, format_pattern,
    load_signatures, parse_pattern, save_signatures,
};
pub use table::{AddressTable, ResolveReport};
