use crate::error::{Error, Result};

/// Read access to the memory of the process being scanned.
///
/// Implementations are shared across scanner threads, hence `Send + Sync`.
pub trait ReadMemory: Send + Sync {
    /// Read exactly `size` bytes starting at `address`.
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    fn read_i32(&self, address: u64) -> Result<i32> {
        let bytes = read_array::<4, _>(self, address)?;
        Ok(i32::from_le_bytes(bytes))
    }

    fn read_u64(&self, address: u64) -> Result<u64> {
        let bytes = read_array::<8, _>(self, address)?;
        Ok(u64::from_le_bytes(bytes))
    }
}

impl<R: ReadMemory + ?Sized> ReadMemory for &R {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        (**self).read_bytes(address, size)
    }
}

fn read_array<const N: usize, R: ReadMemory + ?Sized>(reader: &R, address: u64) -> Result<[u8; N]> {
    let bytes = reader.read_bytes(address, N)?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::MemoryReadFailed {
            address,
            message: format!("short read: expected {} bytes, got {}", N, bytes.len()),
        })
}
