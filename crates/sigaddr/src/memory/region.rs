/// Access flags of a module region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionFlags {
    pub readable: bool,
    pub executable: bool,
}

impl RegionFlags {
    pub const CODE: Self = Self {
        readable: true,
        executable: true,
    };

    pub const DATA: Self = Self {
        readable: true,
        executable: false,
    };
}

/// A contiguous span of the target module that may be scanned.
///
/// Regions are supplied by the host and treated as an immutable snapshot
/// for the duration of a scan pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleRegion {
    pub base: u64,
    pub len: usize,
    pub flags: RegionFlags,
}

impl ModuleRegion {
    pub fn new(base: u64, len: usize, flags: RegionFlags) -> Self {
        Self { base, len, flags }
    }

    pub fn code(base: u64, len: usize) -> Self {
        Self::new(base, len, RegionFlags::CODE)
    }

    pub fn data(base: u64, len: usize) -> Self {
        Self::new(base, len, RegionFlags::DATA)
    }

    /// One past the last address of the region.
    pub fn end(&self) -> u64 {
        self.base.saturating_add(self.len as u64)
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    /// Whether `[address, address + size)` lies inside the region.
    pub fn contains_range(&self, address: u64, size: u64) -> bool {
        address >= self.base
            && address
                .checked_add(size)
                .is_some_and(|end| end <= self.end())
    }
}
