use crate::error::{Error, Result};

use super::ReadMemory;

/// The address space of the running process itself.
///
/// Used when the scanner is loaded into the target (the usual setup for
/// generated accessors): reads are plain memory copies.
#[derive(Debug)]
pub struct CurrentProcess {
    _private: (),
}

impl CurrentProcess {
    /// # Safety
    ///
    /// Every range later passed to [`ReadMemory::read_bytes`] must be mapped
    /// and readable for the lifetime of this value. In practice this means
    /// only scanning regions taken from the loaded module's own headers.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl ReadMemory for CurrentProcess {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        if address == 0 || address.checked_add(size as u64).is_none() {
            return Err(Error::MemoryReadFailed {
                address,
                message: format!("invalid range of {} bytes", size),
            });
        }
        // SAFETY: the constructor's contract guarantees the range is mapped and readable.
        let bytes = unsafe { std::slice::from_raw_parts(address as usize as *const u8, size) };
        Ok(bytes.to_vec())
    }
}
