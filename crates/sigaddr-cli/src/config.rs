//! Scanner settings from a TOML file and command-line overrides.
//!
//! ```toml
//! chunk_size = 1048576
//! executable_only = true
//! ```

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use sigaddr::ScannerConfig;
use tracing::debug;

/// Load scanner settings from a TOML file. Missing keys keep their defaults.
pub fn load_scanner_config(path: &Path) -> Result<ScannerConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ScannerConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    debug!("Loaded scanner config from {}: {:?}", path.display(), config);
    Ok(config)
}

/// Combine the optional config file with command-line flags; flags win.
pub fn resolve_scanner_config(
    path: Option<&Path>,
    chunk_size: Option<usize>,
    executable_only: bool,
) -> Result<ScannerConfig> {
    let base = match path {
        Some(path) => load_scanner_config(path)?,
        None => ScannerConfig::default(),
    };

    Ok(ScannerConfig::builder()
        .chunk_size(chunk_size.unwrap_or(base.chunk_size))
        .executable_only(executable_only || base.executable_only)
        .build())
}
