use super::ExecRootError;
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[cfg(unix)]
use std::os::unix::fs::MetadataExt;

/// What kind of filesystem entry occupies a path under the root
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryKind {
    Dir,
    /// Symbolic link with its raw (unresolved) target
    Symlink { target: PathBuf },
    /// Regular file, identified by device and inode so hardlinks can be matched
    File { dev: u64, ino: u64 },
}

impl EntryKind {
    pub(crate) fn from_metadata(path: &Path, meta: &fs::Metadata) -> std::io::Result<Self> {
        let file_type = meta.file_type();
        if file_type.is_symlink() {
            Ok(Self::Symlink {
                target: fs::read_link(path)?,
            })
        } else if file_type.is_dir() {
            Ok(Self::Dir)
        } else {
            let (dev, ino) = file_identity(meta);
            Ok(Self::File { dev, ino })
        }
    }

    /// Inspect a single path without following a final symlink.
    /// Returns `None` if nothing is there.
    pub(crate) fn probe(path: &Path) -> std::io::Result<Option<Self>> {
        match fs::symlink_metadata(path) {
            Ok(meta) => Self::from_metadata(path, &meta).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Dir)
    }
}

#[cfg(unix)]
pub(crate) fn file_identity(meta: &fs::Metadata) -> (u64, u64) {
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
pub(crate) fn file_identity(_meta: &fs::Metadata) -> (u64, u64) {
    (0, 0)
}

/// Every entry currently under a root, keyed by sanitized relative path
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub entries: BTreeMap<String, EntryKind>,
    /// Entries whose relative path is not valid UTF-8. No declaration can name
    /// them, so they are always stale.
    #[serde(serialize_with = "serialize_lossy_keys")]
    pub undeclarable: BTreeMap<PathBuf, EntryKind>,
}

fn serialize_lossy_keys<S: Serializer>(
    map: &BTreeMap<PathBuf, EntryKind>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(map.iter().map(|(path, kind)| (path.to_string_lossy(), kind)))
}

impl Snapshot {
    /// Walk `root` without following links. A missing root is an empty snapshot.
    pub fn capture(root: &Path) -> Result<Self, ExecRootError> {
        let mut snapshot = Self::default();
        if !root.exists() {
            return Ok(snapshot);
        }

        let walker = WalkDir::new(root)
            .follow_links(false)
            .follow_root_links(false)
            .min_depth(1);
        for entry in walker {
            let entry = entry.map_err(|e| {
                ExecRootError::reconciliation(root, format!("Failed to read directory entry: {}", e))
            })?;
            let path = entry.path();

            let rel = path
                .strip_prefix(root)
                .map_err(|_| ExecRootError::reconciliation(path, "Entry escaped the root"))?;

            let meta = entry.metadata().map_err(|e| {
                ExecRootError::reconciliation(path, format!("Failed to stat entry: {}", e))
            })?;
            let kind = EntryKind::from_metadata(path, &meta).map_err(|e| {
                ExecRootError::reconciliation(path, format!("Failed to inspect entry: {}", e))
            })?;

            let parts: Option<Vec<&str>> = rel.iter().map(|part| part.to_str()).collect();
            match parts {
                Some(parts) => {
                    snapshot.entries.insert(parts.join("/"), kind);
                }
                None => {
                    snapshot.undeclarable.insert(rel.to_path_buf(), kind);
                }
            }
        }

        Ok(snapshot)
    }

    pub fn len(&self) -> usize {
        self.entries.len() + self.undeclarable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty() && self.undeclarable.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn get(&self, rel: &str) -> Option<&EntryKind> {
        self.entries.get(rel)
    }
}
