use super::entry::EntryKind;
use super::projector::remove_entry;
use super::{DeclaredState, ExecRootError};
use crate::security::ancestors;
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

#[cfg(unix)]
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};

/// Ensure the writable directories inside the root exist and are writable, and
/// that every declared output has a parent directory to be written into.
///
/// Writable directories outside the root were already dropped while building
/// the [`DeclaredState`] and are never created here.
pub fn provision_writable_dirs(
    root: &Path,
    state: &DeclaredState,
    dir_mode: u32,
) -> Result<usize, ExecRootError> {
    let mut created = 0;

    for rel in &state.writable {
        if !rel.is_empty() {
            created += ensure_dir(root, rel, state, dir_mode)?;
        }
        let path = root.join(rel);
        make_writable(&path).map_err(|e| ExecRootError::provision(&path, e))?;
    }

    for rel in &state.outputs {
        if let Some((parent, _)) = rel.rsplit_once('/') {
            created += ensure_dir(root, parent, state, dir_mode)?;
        }
    }

    info!(
        root = %root.display(),
        writable = state.writable.len(),
        outputs = state.outputs.len(),
        created,
        "provisioned directories"
    );
    Ok(created)
}

/// Make sure `rel` and all of its ancestors are directories under `root`.
///
/// Non-directory entries in the way are removed and replaced, unless they are
/// declared input links, which fail with `PathConflict`. Returns how many
/// directories were created.
pub(crate) fn ensure_dir(
    root: &Path,
    rel: &str,
    state: &DeclaredState,
    dir_mode: u32,
) -> Result<usize, ExecRootError> {
    let mut created = 0;

    for current in ancestors(rel).chain(std::iter::once(rel)) {
        let path = root.join(current);
        let existing =
            EntryKind::probe(&path).map_err(|e| ExecRootError::provision(&path, e))?;

        match existing {
            Some(EntryKind::Dir) => continue,
            Some(_) if state.links.contains_key(current) => {
                return Err(ExecRootError::conflict(
                    &path,
                    "declared input occupies a required directory",
                ));
            }
            Some(kind) => {
                debug!(path = %path.display(), ?kind, "replacing non-directory entry");
                remove_entry(&path, &kind).map_err(|e| ExecRootError::provision(&path, e))?;
            }
            None => {}
        }

        create_dir(&path, dir_mode).map_err(|e| ExecRootError::provision(&path, e))?;
        debug!(path = %path.display(), "created directory");
        created += 1;
    }

    Ok(created)
}

#[cfg(unix)]
fn create_dir(path: &Path, mode: u32) -> io::Result<()> {
    fs::DirBuilder::new().mode(mode).create(path)
}

#[cfg(not(unix))]
fn create_dir(path: &Path, _mode: u32) -> io::Result<()> {
    fs::DirBuilder::new().create(path)
}

#[cfg(unix)]
fn make_writable(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    let mode = perms.mode();
    if mode & 0o200 == 0 {
        perms.set_mode(mode | 0o200);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn make_writable(path: &Path) -> io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}
