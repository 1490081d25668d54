//! Address cache for faster attach
//!
//! Saves resolved addresses to a file and reuses them on the next attach to
//! the same module version, skipping the memory scan. Addresses are stored
//! relative to the module base so they survive ASLR relocation.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::memory::ReadMemory;
use crate::registry::EntryState;
use crate::table::AddressTable;

/// Default cache file name
pub const CACHE_FILE: &str = ".sigaddr-cache.json";

/// Maximum age for cache validity (24 hours)
const MAX_CACHE_AGE_HOURS: i64 = 24;

/// Cached module-relative addresses for one module version
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressCache {
    /// Module version the addresses were resolved against
    pub version: String,
    /// Cache creation time
    pub created_at: DateTime<Utc>,
    /// Signature name -> offset from the module base
    pub addresses: BTreeMap<String, u64>,
}

impl AddressCache {
    /// Create an empty cache entry
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            created_at: Utc::now(),
            addresses: BTreeMap::new(),
        }
    }

    /// Capture every resolved entry of `table` relative to `module_base`
    pub fn from_table<R: ReadMemory>(
        version: impl Into<String>,
        table: &AddressTable<R>,
        module_base: u64,
    ) -> Self {
        let mut cache = Self::new(version);
        for entry in table.registry().entries() {
            if let EntryState::Resolved(address) = entry.state() {
                if let Some(offset) = address.checked_sub(module_base) {
                    cache.addresses.insert(entry.name().to_string(), offset);
                }
            }
        }
        cache
    }

    /// Load cache from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();

        let content = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) => {
                debug!("Cache file not found or unreadable: {}", e);
                return None;
            }
        };

        match serde_json::from_str::<AddressCache>(&content) {
            Ok(cache) => {
                debug!(
                    "Loaded cache: version={}, created_at={}, entries={}",
                    cache.version,
                    cache.created_at,
                    cache.addresses.len()
                );
                Some(cache)
            }
            Err(e) => {
                warn!("Failed to parse cache file: {}", e);
                None
            }
        }
    }

    /// Save cache to a specific path
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(&path, content)?;
        info!("Saved address cache to {}", path.as_ref().display());
        Ok(())
    }

    /// Check if cache is valid for the given module version
    pub fn is_valid_for(&self, version: &str) -> bool {
        if self.version != version {
            debug!(
                "Cache version mismatch: cached={}, current={}",
                self.version, version
            );
            return false;
        }

        let age = Utc::now().signed_duration_since(self.created_at);
        if age > Duration::hours(MAX_CACHE_AGE_HOURS) {
            debug!("Cache expired: age={}s", age.num_seconds());
            return false;
        }

        if self.addresses.is_empty() {
            debug!("Cache holds no addresses");
            return false;
        }

        true
    }

    /// Prime `table` with cached addresses; returns how many entries were primed.
    ///
    /// Names no longer registered are skipped.
    pub fn apply<R: ReadMemory>(&self, table: &AddressTable<R>, module_base: u64) -> usize {
        let mut primed = 0;
        for (name, offset) in &self.addresses {
            match table.prime(name, module_base.wrapping_add(*offset)) {
                Ok(true) => primed += 1,
                Ok(false) => {}
                Err(e) => debug!("Skipping cached entry: {}", e),
            }
        }
        info!(
            "Primed {} of {} cached addresses (version: {})",
            primed,
            self.addresses.len(),
            self.version
        );
        primed
    }
}
