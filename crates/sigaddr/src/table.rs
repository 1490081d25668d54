//! Cached, thread-safe address access
//!
//! `AddressTable` ties a registry to the memory and regions of one attached
//! module. The first access to any unresolved entry runs a single bulk pass
//! that scans for every pending entry at once; the outcome of each entry is
//! stored exactly once and served from the cache afterwards, including
//! failures.
//!
//! ## Example
//!
//! ```ignore
//! use sigaddr::{AddressTable, SignatureRegistry, SnapshotMemory};
//!
//! let memory = SnapshotMemory::from_dump_file("module.bin", 0x1_4000_0000)?;
//! let regions = memory.regions();
//! let table = AddressTable::new(SignatureRegistry::new(), memory, regions);
//!
//! table.registry().register_pattern("Achievement.IsComplete", "E8 ?? ?? ?? ?? 04 30 FF C3", None)?;
//! let address = table.value("Achievement.IsComplete")?;
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::error::{Error, FailureKind, ResolveFailure, Result};
use crate::memory::{ModuleRegion, ReadMemory};
use crate::registry::{EntryHandle, EntryState, Outcome, SignatureRegistry};
use crate::resolver::resolve;
use crate::scanner::{MatchResult, ModuleScanner, ScannerConfig};

/// Summary of a bulk resolution.
#[derive(Debug, Clone, Default)]
pub struct ResolveReport {
    /// `(name, address)` pairs, sorted by name
    pub resolved: Vec<(String, u64)>,
    pub failed: Vec<ResolveFailure>,
}

impl ResolveReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct AddressTable<R: ReadMemory> {
    registry: SignatureRegistry,
    memory: R,
    regions: Vec<ModuleRegion>,
    config: ScannerConfig,
    /// Held while scanning; entries are only settled under it.
    scan_gate: Mutex<()>,
    scans: AtomicUsize,
}

impl<R: ReadMemory> AddressTable<R> {
    pub fn new(registry: SignatureRegistry, memory: R, regions: Vec<ModuleRegion>) -> Self {
        Self::with_config(registry, memory, regions, ScannerConfig::default())
    }

    pub fn with_config(
        registry: SignatureRegistry,
        memory: R,
        regions: Vec<ModuleRegion>,
        config: ScannerConfig,
    ) -> Self {
        Self {
            registry,
            memory,
            regions,
            config,
            scan_gate: Mutex::new(()),
            scans: AtomicUsize::new(0),
        }
    }

    pub fn registry(&self) -> &SignatureRegistry {
        &self.registry
    }

    pub fn memory(&self) -> &R {
        &self.memory
    }

    pub fn regions(&self) -> &[ModuleRegion] {
        &self.regions
    }

    /// Number of bulk scan passes performed so far.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Acquire)
    }

    /// Resolved address of `name`, scanning on first access.
    pub fn value(&self, name: &str) -> Result<u64> {
        let entry = self
            .registry
            .lookup(name)
            .ok_or_else(|| Error::UnknownSignature(name.to_string()))?;
        self.value_of(&entry)
    }

    /// `entry` must come from this table's registry; only its entries are
    /// ever part of a pass.
    fn value_of(&self, entry: &EntryHandle) -> Result<u64> {
        if let Some(outcome) = entry.outcome() {
            return outcome.clone().map_err(Error::from);
        }

        let _gate = self.scan_gate.lock().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have finished a pass while we waited.
        if !entry.is_settled() {
            self.run_pass();
        }
        entry
            .settle(Err(entry.failure(FailureKind::NoMatch)))
            .clone()
            .map_err(Error::from)
    }

    /// Read the pointer stored at the resolved address of `name`.
    ///
    /// Only entries registered with `deref` hold a pointer. The address is
    /// cached; the pointer itself is read on every call.
    pub fn read_pointer(&self, name: &str) -> Result<u64> {
        let entry = self
            .registry
            .lookup(name)
            .ok_or_else(|| Error::UnknownSignature(name.to_string()))?;
        if !entry.deref() {
            return Err(Error::NotAPointer(name.to_string()));
        }
        let address = self.value_of(&entry)?;
        self.memory.read_u64(address)
    }

    /// Resolve every pending entry now and report all outcomes.
    pub fn resolve_all(&self) -> ResolveReport {
        {
            let _gate = self.scan_gate.lock().unwrap_or_else(PoisonError::into_inner);
            self.run_pass();
        }

        let mut report = ResolveReport::default();
        for entry in self.registry.entries() {
            match entry.state() {
                EntryState::Resolved(address) => {
                    report.resolved.push((entry.name().to_string(), address))
                }
                EntryState::Failed(failure) => report.failed.push(failure.clone()),
                EntryState::Unresolved => {}
            }
        }
        report
    }

    /// Record a known address (e.g. from the address cache) without scanning.
    ///
    /// Returns `false` if the entry was already settled.
    pub fn prime(&self, name: &str, address: u64) -> Result<bool> {
        let entry = self
            .registry
            .lookup(name)
            .ok_or_else(|| Error::UnknownSignature(name.to_string()))?;

        let _gate = self.scan_gate.lock().unwrap_or_else(PoisonError::into_inner);
        if entry.is_settled() {
            return Ok(false);
        }
        entry.settle(Ok(address));
        debug!("Primed {} at {:#x}", name, address);
        Ok(true)
    }

    /// Scan for all pending entries and settle each of them. Caller holds the gate.
    fn run_pass(&self) {
        let pending = self.registry.all_pending();
        if pending.is_empty() {
            return;
        }

        let pass = self.scans.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            "Resolving {} pending signatures (pass {})",
            pending.len(),
            pass
        );

        let scanner = ModuleScanner::with_config(&self.memory, self.config.clone());
        let results = scanner.scan(&self.regions, &pending);

        for entry in &pending {
            let outcome: Outcome = match results.get(entry.name()) {
                Some(MatchResult::UniqueMatch(found)) => {
                    resolve(&self.memory, found, entry.signature())
                        .map_err(|kind| entry.failure(kind))
                }
                Some(MatchResult::AmbiguousMatch(count)) => {
                    Err(entry.failure(FailureKind::AmbiguousMatch { count: *count }))
                }
                Some(MatchResult::NoMatch) | None => Err(entry.failure(FailureKind::NoMatch)),
            };

            match &outcome {
                Ok(address) => debug!("  {}: {:#x}", entry.name(), address),
                Err(failure) => warn!("{}", failure),
            }
            entry.settle(outcome);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    use crate::memory::SnapshotMemory;

    const PLAIN: &str = "AA BB CC DD ?? ?? ?? ?? AA BB ?? DD";

    fn table_with(memory: SnapshotMemory) -> AddressTable<SnapshotMemory> {
        let regions = memory.regions();
        AddressTable::new(SignatureRegistry::new(), memory, regions)
    }

    #[test]
    fn test_direct_signature_resolves_to_match() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0x90; 0x40])
            .patch(0x1000, &[0xAA, 0xBB, 0xCC, 0xDD, 0x12, 0x34, 0x56, 0x78, 0xAA, 0xBB, 0x9A, 0xDD])
            .build();
        let table = table_with(memory);
        table.registry().register_pattern("TestStruct.TestFunction", PLAIN, None).unwrap();

        assert_eq!(table.value("TestStruct.TestFunction").unwrap(), 0x1000);
    }

    #[test]
    fn test_call_signature_follows_displacement() {
        let memory = SnapshotMemory::builder()
            .code(0x2000, vec![0x90; 0x40])
            .patch(0x2000, &[0xE8, 0x00, 0x00, 0x00, 0x10, 0xAA, 0xBB, 0x00, 0xDD])
            .build();
        let table = table_with(memory);
        table
            .registry()
            .register_pattern("TestStruct.TestFunction", "E8 ?? ?? ?? ?? AA BB ?? DD", None)
            .unwrap();

        assert_eq!(
            table.value("TestStruct.TestFunction").unwrap(),
            0x2000 + 1 + 4 + 0x1000_0000
        );
    }

    #[test]
    fn test_call_opcode_after_leading_wildcard_is_direct() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0x90; 0x20])
            .patch(0x1000, &[0x55, 0xE8, 0x10, 0x00, 0x00, 0x00, 0xC3, 0xC3])
            .build();
        let table = table_with(memory);
        table
            .registry()
            .register_pattern("A.Call", "?? E8 ?? ?? ?? ?? C3 C3", None)
            .unwrap();
        table
            .registry()
            .register_pattern("A.CallTarget", "?? E8 ?? ?? ?? ?? C3 C3 90", Some(2))
            .unwrap();

        assert_eq!(table.value("A.Call").unwrap(), 0x1000);
        assert_eq!(table.value("A.CallTarget").unwrap(), 0x1000 + 2 + 4 + 0x10);
    }

    #[test]
    fn test_single_pass_resolves_all_pending() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0x90; 0x100])
            .patch(0x1010, &[0xAA, 0xBB, 0xCC, 0xDD, 0, 0, 0, 0, 0xAA, 0xBB, 0, 0xDD])
            .patch(0x1080, &[0x48, 0x8D, 0x0D, 0x00, 0x01, 0x00, 0x00])
            .build();
        let table = table_with(memory);
        table.registry().register_pattern("A.Plain", PLAIN, None).unwrap();
        table.registry().register_pattern("A.Instance", "48 8D 0D ?? ?? ?? ??", Some(3)).unwrap();

        assert_eq!(table.value("A.Plain").unwrap(), 0x1010);
        assert_eq!(table.value("A.Instance").unwrap(), 0x1080 + 3 + 4 + 0x100);
        assert_eq!(table.scan_count(), 1);
    }

    #[test]
    fn test_failures_are_cached_and_named() {
        let memory = SnapshotMemory::builder().code(0x1000, vec![0x90; 0x40]).build();
        let table = table_with(memory);
        table.registry().register_pattern("A.Missing", PLAIN, None).unwrap();

        for _ in 0..3 {
            let err = table.value("A.Missing").unwrap_err();
            match err {
                Error::Unresolved(failure) => {
                    assert_eq!(failure.name, "A.Missing");
                    assert_eq!(failure.pattern, PLAIN);
                    assert_eq!(failure.kind, FailureKind::NoMatch);
                }
                other => panic!("unexpected error: {:?}", other),
            }
        }
        assert_eq!(table.scan_count(), 1);
    }

    #[test]
    fn test_ambiguous_signature_fails() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0x90; 0x40])
            .patch(0x1004, &[0xCC, 0xC3])
            .patch(0x1020, &[0xCC, 0xC3])
            .build();
        let table = table_with(memory);
        table.registry().register_pattern("A.Ambiguous", "CC C3", None).unwrap();

        let err = table.value("A.Ambiguous").unwrap_err();
        assert!(matches!(
            err,
            Error::Unresolved(ResolveFailure {
                kind: FailureKind::AmbiguousMatch { count: 2 },
                ..
            })
        ));
    }

    #[test]
    fn test_out_of_bounds_displacement_fails() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0x90; 0x10])
            .patch(0x100C, &[0xE8, 0x01, 0x02, 0x03])
            .build();
        let table = table_with(memory);
        table.registry().register_pattern("A.Truncated", "E8 01 02 03", None).unwrap();

        let err = table.value("A.Truncated").unwrap_err();
        assert!(matches!(
            err,
            Error::Unresolved(ResolveFailure {
                kind: FailureKind::OutOfBounds { address: 0x100D },
                ..
            })
        ));
    }

    #[test]
    fn test_unknown_signature() {
        let table = table_with(SnapshotMemory::default());
        assert!(matches!(
            table.value("Nope"),
            Err(Error::UnknownSignature(name)) if name == "Nope"
        ));
        assert_eq!(table.scan_count(), 0);
    }

    #[test]
    fn test_late_registration_gets_its_own_pass() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0x90; 0x40])
            .patch(0x1000, &[0x11, 0x22])
            .patch(0x1020, &[0x33, 0x44])
            .build();
        let table = table_with(memory);
        table.registry().register_pattern("A.First", "11 22", None).unwrap();
        assert_eq!(table.value("A.First").unwrap(), 0x1000);

        table.registry().register_pattern("A.Second", "33 44", None).unwrap();
        assert_eq!(table.value("A.Second").unwrap(), 0x1020);
        assert_eq!(table.value("A.First").unwrap(), 0x1000);
        assert_eq!(table.scan_count(), 2);
    }

    #[test]
    fn test_concurrent_first_access_scans_once() {
        let memory = SnapshotMemory::builder()
            .code(0x2000, vec![0x90; 0x10000])
            .patch(0x8000, &[0xE8, 0x00, 0x01, 0x00, 0x00, 0xAA, 0xBB, 0xCC])
            .build();
        let table = Arc::new(table_with(memory));
        table.registry().register_pattern("A.Call", "E8 ?? ?? ?? ?? AA BB CC", None).unwrap();

        const THREADS: usize = 16;
        let barrier = Arc::new(Barrier::new(THREADS));
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                let table = Arc::clone(&table);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    table.value("A.Call").unwrap()
                })
            })
            .collect();

        let values: Vec<u64> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert!(values.iter().all(|&v| v == 0x8000 + 1 + 4 + 0x100));
        assert_eq!(table.scan_count(), 1);
    }

    #[test]
    fn test_concurrent_first_access_shares_failure() {
        let memory = SnapshotMemory::builder().code(0x2000, vec![0x90; 0x1000]).build();
        let table = Arc::new(table_with(memory));
        table.registry().register_pattern("A.Gone", "0F 0B", None).unwrap();

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || table.value("A.Gone").unwrap_err().to_string())
            })
            .collect();

        let messages: Vec<String> = workers.into_iter().map(|w| w.join().unwrap()).collect();
        assert!(messages.iter().all(|m| m == &messages[0]));
        assert!(messages[0].contains("A.Gone"));
        assert!(messages[0].contains("0F 0B"));
        assert_eq!(table.scan_count(), 1);
    }

    #[test]
    fn test_resolve_all_report() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0x90; 0x40])
            .patch(0x1008, &[0x55, 0x48, 0x89, 0xE5])
            .build();
        let table = table_with(memory);
        table.registry().register_pattern("A.Prologue", "55 48 89 E5", None).unwrap();
        table.registry().register_pattern("A.Missing", "0F 0B", None).unwrap();

        let report = table.resolve_all();
        assert_eq!(report.resolved, vec![("A.Prologue".to_string(), 0x1008)]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].name, "A.Missing");
        assert!(!report.is_complete());

        // Nothing pending: a second call does not scan again.
        table.resolve_all();
        assert_eq!(table.scan_count(), 1);
    }

    #[test]
    fn test_prime_skips_scan() {
        let table = table_with(SnapshotMemory::builder().code(0x1000, vec![0; 0x10]).build());
        table.registry().register_pattern("A.Cached", "0F 0B", None).unwrap();

        assert!(table.prime("A.Cached", 0xDEAD_0000).unwrap());
        assert!(!table.prime("A.Cached", 0xBEEF_0000).unwrap());
        assert_eq!(table.value("A.Cached").unwrap(), 0xDEAD_0000);
        assert_eq!(table.scan_count(), 0);
    }

    #[test]
    fn test_read_pointer_follows_static_address() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0x90; 0x20])
            .data(0x5000, vec![0; 0x10])
            .patch(0x1000, &[0x48, 0x8B, 0x1D, 0xF9, 0x3F, 0x00, 0x00])
            .patch(0x5000, &0x0000_7FF6_1234_5678u64.to_le_bytes())
            .build();
        let table = table_with(memory);
        let def = crate::signature::SignatureDef::new("Framework.Instance", "48 8B 1D ?? ?? ?? ??")
            .with_offset(3)
            .with_deref();
        table.registry().register_def(&def).unwrap();

        assert_eq!(table.value("Framework.Instance").unwrap(), 0x5000);
        assert_eq!(
            table.read_pointer("Framework.Instance").unwrap(),
            0x0000_7FF6_1234_5678
        );
    }

    #[test]
    fn test_read_pointer_requires_deref_entry() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0x90; 0x20])
            .patch(0x1000, &[0x55, 0x48, 0x89, 0xE5])
            .build();
        let table = table_with(memory);
        table.registry().register_pattern("A.Prologue", "55 48 89 E5", None).unwrap();

        assert!(matches!(
            table.read_pointer("A.Prologue"),
            Err(Error::NotAPointer(name)) if name == "A.Prologue"
        ));
        assert!(matches!(
            table.read_pointer("A.Nope"),
            Err(Error::UnknownSignature(_))
        ));
        // The address itself is still available.
        assert_eq!(table.value("A.Prologue").unwrap(), 0x1000);
    }

    #[test]
    fn test_entries_of_another_registry_are_unknown() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0x90; 0x20])
            .patch(0x1004, &[0x0F, 0x0B])
            .build();
        let table = table_with(memory);
        let other = SignatureRegistry::new();
        let foreign = other.register_pattern("A.Trap", "0F 0B", None).unwrap();

        assert!(matches!(
            table.value(foreign.name()),
            Err(Error::UnknownSignature(_))
        ));
        assert_eq!(foreign.state(), EntryState::Unresolved);

        table.registry().register_pattern("A.Trap", "0F 0B", None).unwrap();
        assert_eq!(table.value("A.Trap").unwrap(), 0x1004);
        assert_eq!(foreign.state(), EntryState::Unresolved);
    }
}
