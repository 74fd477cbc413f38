use super::entry::EntryKind;
use super::projector::{remove_entry, symlink};
use super::ExecRootError;
use crate::security::ancestors;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Which declared outputs were moved out of the root and which were never produced
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionReport {
    pub collected: Vec<String>,
    pub missing: Vec<String>,
}

impl CollectionReport {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Move every declared output present under `root` to the same relative path
/// under `destination`. Absent outputs are reported, not treated as errors.
///
/// Outputs already moved stay in place if a later one fails.
pub fn collect_outputs(
    root: &Path,
    destination: &Path,
    outputs: &BTreeSet<String>,
) -> Result<CollectionReport, ExecRootError> {
    let mut report = CollectionReport::default();

    for rel in outputs {
        let source = root.join(rel);
        let kind = if ancestors_are_dirs(root, rel)? {
            EntryKind::probe(&source).map_err(|e| ExecRootError::collection(&source, e))?
        } else {
            None
        };
        let Some(kind) = kind else {
            debug!(output = %rel, "declared output was not produced");
            report.missing.push(rel.clone());
            continue;
        };

        let target = destination.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| ExecRootError::collection(parent, e))?;
        }
        clear_destination(&target, &kind)?;
        relocate(&source, &target, &kind)?;

        debug!(from = %source.display(), to = %target.display(), "collected output");
        report.collected.push(rel.clone());
    }

    info!(
        destination = %destination.display(),
        collected = report.collected.len(),
        missing = report.missing.len(),
        "collected outputs"
    );
    Ok(report)
}

/// Check every ancestor of `rel` under `root` without following links.
///
/// Returns `false` if one is missing (the output cannot exist). An ancestor
/// that is a symlink or file fails, since `rename` would resolve through it
/// and move something outside the root.
fn ancestors_are_dirs(root: &Path, rel: &str) -> Result<bool, ExecRootError> {
    for ancestor in ancestors(rel) {
        let path = root.join(ancestor);
        match EntryKind::probe(&path).map_err(|e| ExecRootError::collection(&path, e))? {
            Some(EntryKind::Dir) => continue,
            None => return Ok(false),
            Some(kind) => {
                return Err(ExecRootError::collection(
                    &path,
                    io::Error::other(format!(
                        "output ancestor is not a directory: {:?}",
                        kind
                    )),
                ));
            }
        }
    }
    Ok(true)
}

/// Make room at `target`. Files are left for `rename` to replace atomically;
/// a directory where a file output belongs is a collision.
fn clear_destination(target: &Path, kind: &EntryKind) -> Result<(), ExecRootError> {
    let existing = EntryKind::probe(target).map_err(|e| ExecRootError::collection(target, e))?;
    match existing {
        None => Ok(()),
        Some(EntryKind::Dir) if !kind.is_dir() => Err(ExecRootError::collection(
            target,
            io::Error::new(
                io::ErrorKind::IsADirectory,
                "a directory occupies the destination of a file output",
            ),
        )),
        Some(existing) if kind.is_dir() || existing.is_dir() => {
            remove_entry(target, &existing).map_err(|e| ExecRootError::collection(target, e))
        }
        Some(_) => Ok(()),
    }
}

fn relocate(source: &Path, target: &Path, kind: &EntryKind) -> Result<(), ExecRootError> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            warn!(
                from = %source.display(),
                to = %target.display(),
                "rename crosses devices, falling back to copy"
            );
            copy_into_place(source, target, kind)
                .map_err(|e| ExecRootError::collection(target, e))?;
            remove_entry(source, kind).map_err(|e| ExecRootError::collection(source, e))
        }
        Err(e) => Err(ExecRootError::collection(source, e)),
    }
}

/// Copy `source` next to `target` under a temporary name, then rename it into
/// place so the final path never shows a partial copy.
pub(super) fn copy_into_place(source: &Path, target: &Path, kind: &EntryKind) -> io::Result<()> {
    let temp = temp_sibling(target)?;

    let copied = match kind {
        EntryKind::File { .. } => copy_file(source, &temp),
        EntryKind::Symlink { target: link_target } => symlink(link_target, &temp),
        EntryKind::Dir => copy_tree(source, &temp),
    };

    let result = copied.and_then(|()| fs::rename(&temp, target));
    if result.is_err() {
        if let Ok(Some(temp_kind)) = EntryKind::probe(&temp) {
            let _ = remove_entry(&temp, &temp_kind);
        }
    }
    result
}

fn temp_sibling(target: &Path) -> io::Result<PathBuf> {
    let parent = target.parent().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "output has no parent directory")
    })?;
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(parent.join(format!(".{}.{}.tmp", name, Uuid::new_v4())))
}

fn copy_file(source: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(source, dest)?;
    fs::File::open(dest)?.sync_all()
}

fn copy_tree(source: &Path, dest: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let to = dest.join(rel);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir(&to)?;
        } else if file_type.is_symlink() {
            symlink(&fs::read_link(entry.path())?, &to)?;
        } else {
            copy_file(entry.path(), &to)?;
        }
    }
    Ok(())
}
