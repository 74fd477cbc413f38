use super::ExecRootError;
use crate::security::{PathSanitizer, ancestors};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The normalized state one `create_file_system` call asks for.
///
/// Paths are sanitized relative paths joined with `/`. `dirs` holds every
/// directory that must exist: ancestors of links, writable directories inside
/// the root (and their ancestors) and parents of outputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeclaredState {
    pub links: BTreeMap<String, PathBuf>,
    pub dirs: BTreeSet<String>,
    /// Writable directories inside the root; `""` is the root itself
    pub writable: BTreeSet<String>,
    pub outputs: BTreeSet<String>,
    /// Writable directories that were ignored for lying outside the root
    pub outside_root: BTreeSet<PathBuf>,
}

impl DeclaredState {
    pub fn new(
        root: &Path,
        inputs: &HashMap<String, PathBuf>,
        outputs: &HashSet<String>,
        writable_dirs: &HashSet<PathBuf>,
    ) -> Result<Self, ExecRootError> {
        let mut state = Self::default();

        for (raw, source) in inputs {
            let rel = PathSanitizer::sanitize(raw)?;
            if !source.is_absolute() {
                return Err(ExecRootError::InvalidPath(format!(
                    "Input source must be absolute: {}",
                    source.display()
                )));
            }
            if let Some(previous) = state.links.get(&rel) {
                if previous != source {
                    return Err(ExecRootError::conflict(
                        &rel,
                        format!(
                            "mapped to both {} and {}",
                            previous.display(),
                            source.display()
                        ),
                    ));
                }
            }
            state.links.insert(rel, source.clone());
        }

        for rel in state.links.keys() {
            state.dirs.extend(ancestors(rel).map(str::to_string));
        }

        for dir in writable_dirs {
            match PathSanitizer::relative_to_root(root, dir)? {
                None => {
                    debug!(dir = %dir.display(), "ignoring writable dir outside root");
                    state.outside_root.insert(dir.clone());
                }
                Some(rel) => {
                    if !rel.is_empty() {
                        state.dirs.extend(ancestors(&rel).map(str::to_string));
                        state.dirs.insert(rel.clone());
                    }
                    state.writable.insert(rel);
                }
            }
        }

        for raw in outputs {
            let rel = PathSanitizer::sanitize(raw)?;
            if state.links.contains_key(&rel) {
                return Err(ExecRootError::conflict(
                    &rel,
                    "declared both as an input and an output",
                ));
            }
            state.dirs.extend(ancestors(&rel).map(str::to_string));
            state.outputs.insert(rel);
        }

        if let Some(rel) = state.links.keys().find(|rel| state.dirs.contains(*rel)) {
            return Err(ExecRootError::conflict(
                rel,
                "declared as an input but required as a directory",
            ));
        }

        Ok(state)
    }

    /// Number of entries (links plus directories) this declaration creates
    pub fn entry_count(&self) -> usize {
        self.links.len() + self.dirs.len()
    }
}
