//! Scan command implementation.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use owo_colors::OwoColorize;
use sigaddr::{
    AddressCache, AddressTable, EntryState, ReadMemory, ScannerConfig, SignatureRegistry,
    SnapshotMemory, load_signatures,
};
use tracing::{info, warn};

/// Where the module bytes come from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Dump { path: PathBuf, base: u64 },
    Process { pid: u32 },
}

/// Run the scan command
pub fn run(
    signatures: &Path,
    source: Source,
    cache: Option<&Path>,
    config: ScannerConfig,
) -> Result<()> {
    let set = load_signatures(signatures)
        .with_context(|| format!("Failed to load signatures from {}", signatures.display()))?;
    info!(
        "Loaded {} signatures (version: {})",
        set.signatures.len(),
        set.version
    );

    let registry = SignatureRegistry::new();
    registry
        .register_set(&set)
        .context("Invalid signature set")?;

    match source {
        Source::Dump { path, base } => {
            let memory = SnapshotMemory::from_dump_file(&path, base)
                .with_context(|| format!("Failed to read dump {}", path.display()))?;
            println!(
                "Loaded dump {} ({} bytes at 0x{:X})",
                path.display(),
                memory.size(),
                base
            );
            let regions = memory.regions();
            let table = AddressTable::with_config(registry, memory, regions, config);
            resolve_and_report(&table, base, &set.version, cache)
        }
        Source::Process { pid } => scan_process(pid, registry, config, &set.version, cache),
    }
}

#[cfg(target_os = "windows")]
fn scan_process(
    pid: u32,
    registry: SignatureRegistry,
    config: ScannerConfig,
    version: &str,
    cache: Option<&Path>,
) -> Result<()> {
    let process = sigaddr::ProcessHandle::open(pid)?;
    println!(
        "Found process (PID: {}, Base: 0x{:X}, Size: 0x{:X})",
        process.pid, process.base_address, process.module_size
    );

    let base = process.base_address;
    let regions = process.module_regions();
    let table = AddressTable::with_config(registry, process, regions, config);
    resolve_and_report(&table, base, version, cache)
}

#[cfg(not(target_os = "windows"))]
fn scan_process(
    pid: u32,
    _registry: SignatureRegistry,
    _config: ScannerConfig,
    _version: &str,
    _cache: Option<&Path>,
) -> Result<()> {
    bail!(
        "Attaching to a process (PID {}) is only supported on Windows; use --dump instead",
        pid
    )
}

fn resolve_and_report<R: ReadMemory>(
    table: &AddressTable<R>,
    base: u64,
    version: &str,
    cache: Option<&Path>,
) -> Result<()> {
    let mut applied = None;
    if let Some(path) = cache {
        match AddressCache::load_from_path(path) {
            Some(cached) if cached.is_valid_for(version) => {
                if cached.apply(table, base) > 0 {
                    applied = Some(cached);
                }
            }
            Some(_) => info!("Ignoring stale address cache {}", path.display()),
            None => {}
        }
    }

    let report = table.resolve_all();

    println!();
    for entry in table.registry().entries() {
        match entry.state() {
            EntryState::Resolved(address) => {
                let mut line = format!(
                    "{} {:<48} 0x{:X} (+0x{:X})",
                    "OK  ".green(),
                    entry.name(),
                    address,
                    address.wrapping_sub(base)
                );
                if entry.deref() {
                    match table.read_pointer(entry.name()) {
                        Ok(pointer) => line.push_str(&format!(" -> 0x{:X}", pointer)),
                        Err(e) => line.push_str(&format!(" -> {}", e.yellow())),
                    }
                }
                println!("{}", line);
            }
            EntryState::Failed(failure) => {
                println!("{} {:<48} {}", "FAIL".red(), entry.name(), failure.kind);
            }
            EntryState::Unresolved => {}
        }
    }

    let total = report.resolved.len() + report.failed.len();
    println!();
    println!(
        "Resolved {}/{} signatures ({} scan passes)",
        report.resolved.len(),
        total,
        table.scan_count()
    );

    if let Some(path) = cache {
        if table.scan_count() == 0 {
            info!("Every address came from {}, leaving it unchanged", path.display());
        } else if report.resolved.is_empty() {
            warn!("Nothing resolved, not writing address cache");
        } else {
            let mut refreshed = AddressCache::from_table(version, table, base);
            // Primed addresses keep the age of the cache they came from.
            if let Some(applied) = &applied {
                refreshed.created_at = applied.created_at;
            }
            refreshed
                .save_to_path(path)
                .with_context(|| format!("Failed to write address cache {}", path.display()))?;
        }
    }

    if !report.is_complete() {
        bail!("{} of {} signatures could not be resolved", report.failed.len(), total);
    }
    Ok(())
}
