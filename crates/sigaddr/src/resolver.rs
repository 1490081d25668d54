//! Turning matches into addresses
//!
//! x86-64 encodes near CALL/JMP targets and RIP-relative operands as a
//! signed 32-bit displacement from the address of the next byte after the
//! field. The same rule covers every relative idiom; only the offset of the
//! field inside the pattern differs.

use crate::error::FailureKind;
use crate::memory::{ModuleRegion, ReadMemory};
use crate::scanner::Match;
use crate::signature::{CompiledSignature, DISPLACEMENT_SIZE, Mode};

/// Resolve a match found by the scanner, reading the displacement from `memory`.
pub fn resolve<R: ReadMemory + ?Sized>(
    memory: &R,
    found: &Match,
    signature: &CompiledSignature,
) -> Result<u64, FailureKind> {
    apply(found.address, &found.region, signature, |field| {
        memory
            .read_i32(field)
            .map_err(|_| FailureKind::Unreadable { address: field })
    })
}

/// Resolve a match inside a byte buffer mapped at `base`.
pub fn resolve_in_buffer(
    buffer: &[u8],
    base: u64,
    address: u64,
    signature: &CompiledSignature,
) -> Result<u64, FailureKind> {
    let region = ModuleRegion::code(base, buffer.len());
    apply(address, &region, signature, |field| {
        let start = (field - base) as usize;
        let mut bytes = [0u8; DISPLACEMENT_SIZE as usize];
        bytes.copy_from_slice(&buffer[start..start + DISPLACEMENT_SIZE as usize]);
        Ok(i32::from_le_bytes(bytes))
    })
}

/// `read_displacement` is only called for fields that lie inside `region`.
fn apply<F>(
    address: u64,
    region: &ModuleRegion,
    signature: &CompiledSignature,
    read_displacement: F,
) -> Result<u64, FailureKind>
where
    F: FnOnce(u64) -> Result<i32, FailureKind>,
{
    let field = address.wrapping_add(signature.resolution_offset() as u64);

    match signature.mode() {
        Mode::Direct => Ok(field),
        Mode::RelativeDisplacement => {
            if !region.contains_range(field, DISPLACEMENT_SIZE) {
                return Err(FailureKind::OutOfBounds { address: field });
            }
            let displacement = read_displacement(field)?;
            let next = field + DISPLACEMENT_SIZE;
            Ok(next.wrapping_add_signed(displacement as i64))
        }
    }
}
