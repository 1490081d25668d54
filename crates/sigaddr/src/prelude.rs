//! Prelude module for convenient imports
//!
//! ```ignore
//! use sigaddr::prelude::*;
//! ```

// Signatures
pub use crate::signature::{CompiledSignature, SignatureDef, SignatureSet, compile};

// Registry and access
pub use crate::registry::{EntryState, SignatureRegistry};
pub use crate::table::{AddressTable, ResolveReport};

// Memory sources
pub use crate::memory::{ModuleRegion, ReadMemory, SnapshotMemory};

// Error handling
pub use crate::error::{Error, FailureKind, Result};
