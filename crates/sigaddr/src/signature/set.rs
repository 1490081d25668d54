use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::Result;

use super::{CompiledSignature, compile};

/// One named signature as written in a signature file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureDef {
    /// Fully qualified name, e.g. `Client.Game.UI.Achievement.IsComplete`
    pub name: String,
    pub pattern: String,
    /// Explicit resolution offset; detected from the opcode when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
    /// The resolved location holds a pointer to the object rather than the object
    #[serde(default)]
    pub deref: bool,
}

impl SignatureDef {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pattern: pattern.into(),
            offset: None,
            deref: false,
        }
    }

    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_deref(mut self) -> Self {
        self.deref = true;
        self
    }

    pub fn compile(&self) -> Result<CompiledSignature> {
        compile(&self.pattern, self.offset)
    }
}

/// A versioned list of signatures for one target binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignatureSet {
    pub version: String,
    pub signatures: Vec<SignatureDef>,
}

impl SignatureSet {
    pub fn signature(&self, name: &str) -> Option<&SignatureDef> {
        self.signatures.iter().find(|def| def.name == name)
    }
}

pub fn load_signatures<P: AsRef<Path>>(path: P) -> Result<SignatureSet> {
    let content = fs::read_to_string(&path)?;
    let data = serde_json::from_str(&content)?;
    Ok(data)
}

pub fn save_signatures<P: AsRef<Path>>(path: P, signatures: &SignatureSet) -> Result<()> {
    let content = serde_json::to_string_pretty(signatures)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::Mode;
    use tempfile::NamedTempFile;

    #[test]
    fn test_signature_set_save_and_load() {
        let temp_file = NamedTempFile::new().unwrap();
        let set = SignatureSet {
            version: "2024.06.01".to_string(),
            signatures: vec![
                SignatureDef::new("Achievement.Instance", "48 8D 0D ?? ?? ?? ?? E8")
                    .with_offset(3),
                SignatureDef::new("Achievement.IsComplete", "E8 ?? ?? ?? ?? 04 30 FF C3"),
                SignatureDef::new("Framework.Instance", "48 8B 1D ?? ?? ?? ?? 8B 7C 24")
                    .with_offset(3)
                    .with_deref(),
            ],
        };

        save_signatures(temp_file.path(), &set).unwrap();
        let loaded = load_signatures(temp_file.path()).unwrap();

        assert_eq!(loaded.version, "2024.06.01");
        assert_eq!(loaded.signatures, set.signatures);
        assert!(loaded.signature("Framework.Instance").unwrap().deref);
        assert!(loaded.signature("Missing").is_none());
    }

    #[test]
    fn test_signature_def_defaults() {
        let json = r#"{ "name": "A.B", "pattern": "E9 ?? ?? ?? ??" }"#;
        let def: SignatureDef = serde_json::from_str(json).unwrap();
        assert_eq!(def.offset, None);
        assert!(!def.deref);

        let compiled = def.compile().unwrap();
        assert_eq!(compiled.resolution_offset(), 1);
        assert_eq!(compiled.mode(), Mode::RelativeDisplacement);
    }

    #[test]
    fn test_load_missing_file_is_not_found() {
        let err = load_signatures("does-not-exist.json").unwrap_err();
        assert!(err.is_not_found());
    }
}
