use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Declared state of one execution, as read from a JSON file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Relative path inside the root -> absolute source path
    #[serde(default)]
    pub inputs: HashMap<String, PathBuf>,
    #[serde(default)]
    pub outputs: HashSet<String>,
    #[serde(default)]
    pub writable_dirs: HashSet<PathBuf>,
}

impl Manifest {
    /// Load a manifest from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .context(format!("Failed to read manifest: {}", path.display()))?;
        Self::from_json(&contents).context(format!("Invalid manifest: {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse manifest JSON")
    }
}
