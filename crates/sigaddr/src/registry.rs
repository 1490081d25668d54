//! Table of named signatures
//!
//! The registry owns every entry for the lifetime of an attach session.
//! Consumers register signatures (possibly from several threads at once) and
//! later look them up by their fully qualified name.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use once_cell::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, FailureKind, ResolveFailure, Result};
use crate::signature::{CompiledSignature, SignatureDef, SignatureSet, compile};

/// Shared handle to a registered entry.
pub type EntryHandle = Arc<SignatureEntry>;

/// Outcome stored once per entry.
pub type Outcome = std::result::Result<u64, ResolveFailure>;

/// Resolution state of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState<'a> {
    Unresolved,
    Resolved(u64),
    Failed(&'a ResolveFailure),
}

#[derive(Debug)]
pub struct SignatureEntry {
    name: String,
    signature: CompiledSignature,
    deref: bool,
    outcome: OnceCell<Outcome>,
}

impl SignatureEntry {
    fn new(name: String, signature: CompiledSignature, deref: bool) -> Self {
        Self {
            name,
            signature,
            deref,
            outcome: OnceCell::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn signature(&self) -> &CompiledSignature {
        &self.signature
    }

    /// The resolved location holds a pointer to the object.
    pub fn deref(&self) -> bool {
        self.deref
    }

    pub fn state(&self) -> EntryState<'_> {
        match self.outcome.get() {
            None => EntryState::Unresolved,
            Some(Ok(address)) => EntryState::Resolved(*address),
            Some(Err(failure)) => EntryState::Failed(failure),
        }
    }

    pub fn is_settled(&self) -> bool {
        self.outcome.get().is_some()
    }

    pub fn outcome(&self) -> Option<&Outcome> {
        self.outcome.get()
    }

    /// Store `outcome` unless the entry is already settled; returns what is stored.
    pub(crate) fn settle(&self, outcome: Outcome) -> &Outcome {
        self.outcome.get_or_init(|| outcome)
    }

    pub(crate) fn failure(&self, kind: FailureKind) -> ResolveFailure {
        ResolveFailure {
            name: self.name.clone(),
            pattern: self.signature.pattern().to_string(),
            kind,
        }
    }
}

#[derive(Debug, Default)]
pub struct SignatureRegistry {
    entries: DashMap<String, EntryHandle>,
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a compiled signature under `name`.
    ///
    /// Registering the same name again with an equivalent signature returns
    /// the existing entry; a different signature is a `DuplicateSignature` error.
    pub fn register(&self, name: &str, signature: CompiledSignature) -> Result<EntryHandle> {
        self.insert(name, signature, false)
    }

    /// Compile `pattern` and register it.
    pub fn register_pattern(
        &self,
        name: &str,
        pattern: &str,
        offset: Option<u32>,
    ) -> Result<EntryHandle> {
        self.register(name, compile(pattern, offset)?)
    }

    pub fn register_def(&self, def: &SignatureDef) -> Result<EntryHandle> {
        self.insert(&def.name, def.compile()?, def.deref)
    }

    /// Register every signature of a set, stopping at the first error.
    pub fn register_set(&self, set: &SignatureSet) -> Result<Vec<EntryHandle>> {
        let handles = set
            .signatures
            .iter()
            .map(|def| self.register_def(def))
            .collect::<Result<Vec<_>>>()?;
        debug!(
            "Registered {} signatures (version: {})",
            handles.len(),
            set.version
        );
        Ok(handles)
    }

    fn insert(&self, name: &str, signature: CompiledSignature, deref: bool) -> Result<EntryHandle> {
        match self.entries.entry(name.to_string()) {
            Entry::Occupied(existing) => {
                let existing = existing.get();
                if existing.deref == deref && existing.signature.is_equivalent(&signature) {
                    Ok(Arc::clone(existing))
                } else {
                    Err(Error::DuplicateSignature(name.to_string()))
                }
            }
            Entry::Vacant(slot) => {
                let handle = Arc::new(SignatureEntry::new(name.to_string(), signature, deref));
                slot.insert(Arc::clone(&handle));
                debug!("Registered signature {}", name);
                Ok(handle)
            }
        }
    }

    pub fn lookup(&self, name: &str) -> Option<EntryHandle> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Entries not yet resolved, sorted by name.
    pub fn all_pending(&self) -> Vec<EntryHandle> {
        let mut pending: Vec<EntryHandle> = self
            .entries
            .iter()
            .filter(|entry| !entry.is_settled())
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        pending.sort_by(|a, b| a.name.cmp(&b.name));
        pending
    }

    /// All entries, sorted by name.
    pub fn entries(&self) -> Vec<EntryHandle> {
        let mut entries: Vec<EntryHandle> = self
            .entries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
