use serde::{Deserialize, Serialize};

/// Default number of bytes read from the target per request (4 MiB).
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Scanner settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Bytes read from the target per request
    pub chunk_size: usize,
    /// Skip regions that are not executable
    pub executable_only: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            executable_only: false,
        }
    }
}

impl ScannerConfig {
    /// Create a new configuration builder
    pub fn builder() -> ScannerConfigBuilder {
        ScannerConfigBuilder::default()
    }
}

/// Builder for ScannerConfig
#[derive(Debug, Clone, Default)]
pub struct ScannerConfigBuilder {
    chunk_size: Option<usize>,
    executable_only: Option<bool>,
}

impl ScannerConfigBuilder {
    /// Set the read chunk size (at least one byte)
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = Some(size.max(1));
        self
    }

    /// Only scan executable regions
    pub fn executable_only(mut self, enabled: bool) -> Self {
        self.executable_only = Some(enabled);
        self
    }

    /// Build the configuration
    pub fn build(self) -> ScannerConfig {
        let default = ScannerConfig::default();
        ScannerConfig {
            chunk_size: self.chunk_size.unwrap_or(default.chunk_size),
            executable_only: self.executable_only.unwrap_or(default.executable_only),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = ScannerConfig::builder().build();
        assert_eq!(config, ScannerConfig::default());
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        assert!(!config.executable_only);
    }

    #[test]
    fn test_builder_overrides() {
        let config = ScannerConfig::builder()
            .chunk_size(0)
            .executable_only(true)
            .build();
        assert_eq!(config.chunk_size, 1);
        assert!(config.executable_only);
    }
}
