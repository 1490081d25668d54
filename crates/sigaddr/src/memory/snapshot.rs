//! In-memory copies of module regions
//!
//! Backs scans of dump files and the unit tests: each segment is a byte
//! buffer placed at a fixed virtual address.

use std::fs;
use std::path::Path;

use crate::error::{Error, Result};

use super::{ModuleRegion, ReadMemory, RegionFlags};

#[derive(Debug, Clone)]
struct Segment {
    region: ModuleRegion,
    bytes: Vec<u8>,
}

/// Memory made of byte buffers at fixed addresses.
#[derive(Debug, Clone, Default)]
pub struct SnapshotMemory {
    segments: Vec<Segment>,
}

impl SnapshotMemory {
    pub fn builder() -> SnapshotMemoryBuilder {
        SnapshotMemoryBuilder::default()
    }

    /// Load a raw dump of a module image as a single executable region at `base`.
    pub fn from_dump_file<P: AsRef<Path>>(path: P, base: u64) -> Result<Self> {
        let bytes = fs::read(path)?;
        Ok(Self::builder().code(base, bytes).build())
    }

    /// Regions covered by the snapshot, in insertion order.
    pub fn regions(&self) -> Vec<ModuleRegion> {
        self.segments.iter().map(|s| s.region).collect()
    }

    /// Total number of bytes held.
    pub fn size(&self) -> usize {
        self.segments.iter().map(|s| s.bytes.len()).sum()
    }
}

impl ReadMemory for SnapshotMemory {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        self.segments
            .iter()
            .find(|s| s.region.contains_range(address, size as u64))
            .map(|s| {
                let start = (address - s.region.base) as usize;
                s.bytes[start..start + size].to_vec()
            })
            .ok_or_else(|| Error::MemoryReadFailed {
                address,
                message: format!("{} bytes not mapped in snapshot", size),
            })
    }
}

/// Builder for [`SnapshotMemory`]
#[derive(Debug, Clone, Default)]
pub struct SnapshotMemoryBuilder {
    segments: Vec<Segment>,
}

impl SnapshotMemoryBuilder {
    pub fn segment(mut self, base: u64, bytes: Vec<u8>, flags: RegionFlags) -> Self {
        let region = ModuleRegion::new(base, bytes.len(), flags);
        self.segments.push(Segment { region, bytes });
        self
    }

    pub fn code(self, base: u64, bytes: Vec<u8>) -> Self {
        self.segment(base, bytes, RegionFlags::CODE)
    }

    pub fn data(self, base: u64, bytes: Vec<u8>) -> Self {
        self.segment(base, bytes, RegionFlags::DATA)
    }

    /// Write `bytes` at `address` inside an already added segment.
    ///
    /// Writes that fall outside every segment are ignored.
    pub fn patch(mut self, address: u64, bytes: &[u8]) -> Self {
        if let Some(segment) = self
            .segments
            .iter_mut()
            .find(|s| s.region.contains_range(address, bytes.len() as u64))
        {
            let start = (address - segment.region.base) as usize;
            segment.bytes[start..start + bytes.len()].copy_from_slice(bytes);
        }
        self
    }

    pub fn build(self) -> SnapshotMemory {
        SnapshotMemory {
            segments: self.segments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_read_within_segment() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0xCC; 0x20])
            .patch(0x1004, &[0x78, 0x56, 0x34, 0x12])
            .build();

        assert_eq!(memory.read_i32(0x1004).unwrap(), 0x12345678);
        assert_eq!(memory.read_bytes(0x101E, 2).unwrap(), vec![0xCC, 0xCC]);
        assert!(memory.read_bytes(0x101E, 4).is_err());
        assert!(memory.read_bytes(0x2000, 1).is_err());
    }

    #[test]
    fn test_regions_follow_segments() {
        let memory = SnapshotMemory::builder()
            .code(0x1000, vec![0; 0x10])
            .data(0x4000, vec![0; 0x20])
            .build();

        let regions = memory.regions();
        assert_eq!(regions.len(), 2);
        assert!(regions[0].flags.executable);
        assert!(!regions[1].flags.executable);
        assert_eq!(regions[1].end(), 0x4020);
        assert_eq!(memory.size(), 0x30);
    }

    #[test]
    fn test_from_dump_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(&[0x48, 0x8B, 0x05, 0x10]).unwrap();

        let memory = SnapshotMemory::from_dump_file(temp_file.path(), 0x1_4000_0000).unwrap();
        assert_eq!(memory.regions(), vec![ModuleRegion::code(0x1_4000_0000, 4)]);
        assert_eq!(memory.read_bytes(0x1_4000_0002, 2).unwrap(), vec![0x05, 0x10]);
    }
}
