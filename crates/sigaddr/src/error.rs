use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed signature '{pattern}': {reason}")]
    MalformedSignature { pattern: String, reason: String },

    #[error("Signature '{0}' is already registered with a different pattern")]
    DuplicateSignature(String),

    #[error("Signature '{0}' is not registered")]
    UnknownSignature(String),

    #[error("Signature '{0}' does not locate a pointer")]
    NotAPointer(String),

    #[error(transparent)]
    Unresolved(#[from] ResolveFailure),

    #[error("Failed to read process memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Failed to open process: {0}")]
    ProcessOpenFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is a "file not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound)
    }

    pub(crate) fn malformed(pattern: &str, reason: impl Into<String>) -> Self {
        Error::MalformedSignature {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}

/// Why a registered signature could not be turned into an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The pattern does not occur in any scanned region.
    NoMatch,
    /// The pattern occurs more than once.
    AmbiguousMatch { count: usize },
    /// The displacement field at `address` extends past the end of its region.
    OutOfBounds { address: u64 },
    /// The displacement field at `address` could not be read.
    Unreadable { address: u64 },
}

/// Cached outcome of a failed resolution.
///
/// Stored once per entry and handed to every caller, so it is `Clone` and
/// carries the signature's name and pattern text for diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Signature '{name}' ({pattern}) could not be resolved: {kind}")]
pub struct ResolveFailure {
    pub name: String,
    pub pattern: String,
    pub kind: FailureKind,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::NoMatch => write!(f, "no match in scanned regions"),
            FailureKind::AmbiguousMatch { count } => {
                write!(f, "ambiguous, matched {} locations", count)
            }
            FailureKind::OutOfBounds { address } => {
                write!(f, "displacement at {:#x} runs past the region end", address)
            }
            FailureKind::Unreadable { address } => {
                write!(f, "displacement at {:#x} is unreadable", address)
            }
        }
    }
}
