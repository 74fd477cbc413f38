use super::entry::{EntryKind, file_identity};
use super::provisioner::ensure_dir;
use super::{DeclaredState, ExecRootError, LinkStrategy};
use std::fs;
use std::io;
use std::path::Path;
use tracing::{debug, info};

/// Outcome counters for one projection pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProjectionStats {
    pub created: usize,
    pub replaced: usize,
    pub unchanged: usize,
}

/// Materialize every declared input under `root` as a link to its source.
pub fn project_inputs(
    root: &Path,
    state: &DeclaredState,
    strategy: LinkStrategy,
    dir_mode: u32,
) -> Result<ProjectionStats, ExecRootError> {
    let mut stats = ProjectionStats::default();

    for (rel, source) in &state.links {
        let source_meta = match fs::metadata(source) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(ExecRootError::MissingSource {
                    source_path: source.clone(),
                });
            }
            Err(e) => return Err(ExecRootError::projection(source, e)),
        };

        if let Some((parent, _)) = rel.rsplit_once('/') {
            ensure_dir(root, parent, state, dir_mode)
                .map_err(|e| into_projection_error(root, parent, e))?;
        }

        let link_path = root.join(rel);
        let existing =
            EntryKind::probe(&link_path).map_err(|e| ExecRootError::projection(&link_path, e))?;

        match existing {
            Some(kind) if reference_matches(strategy, &kind, source, &source_meta) => {
                stats.unchanged += 1;
                continue;
            }
            Some(kind) => {
                debug!(path = %link_path.display(), ?kind, "replacing stale entry");
                remove_entry(&link_path, &kind)
                    .map_err(|e| ExecRootError::projection(&link_path, e))?;
                stats.replaced += 1;
            }
            None => stats.created += 1,
        }

        create_reference(strategy, source, &source_meta, &link_path)
            .map_err(|e| ExecRootError::projection(&link_path, e))?;
        debug!(path = %link_path.display(), source = %source.display(), "projected input");
    }

    info!(
        root = %root.display(),
        created = stats.created,
        replaced = stats.replaced,
        unchanged = stats.unchanged,
        "projected inputs"
    );
    Ok(stats)
}

/// True if `existing` already is the reference `strategy` would create for `source`
pub(crate) fn reference_matches(
    strategy: LinkStrategy,
    existing: &EntryKind,
    source: &Path,
    source_meta: &fs::Metadata,
) -> bool {
    match (strategy, existing) {
        (LinkStrategy::Symlink, EntryKind::Symlink { target }) => target == source,
        (LinkStrategy::Hardlink, EntryKind::File { dev, ino }) => {
            source_meta.is_file() && file_identity(source_meta) == (*dev, *ino)
        }
        _ => false,
    }
}

fn create_reference(
    strategy: LinkStrategy,
    source: &Path,
    source_meta: &fs::Metadata,
    link_path: &Path,
) -> io::Result<()> {
    match strategy {
        LinkStrategy::Symlink => symlink(source, link_path),
        LinkStrategy::Hardlink => {
            if source_meta.is_dir() {
                return Err(io::Error::new(
                    io::ErrorKind::Unsupported,
                    format!("cannot hardlink directory {}", source.display()),
                ));
            }
            // Link the resolved file so its inode matches `fs::metadata(source)`
            fs::hard_link(fs::canonicalize(source)?, link_path)
        }
    }
}

#[cfg(unix)]
pub(crate) fn symlink(source: &Path, link_path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(source, link_path)
}

#[cfg(not(unix))]
pub(crate) fn symlink(_source: &Path, _link_path: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "symbolic links are not supported on this platform",
    ))
}

/// Remove a single entry without following links. Directories go recursively;
/// `remove_dir_all` does not traverse symlinks, so nothing outside is touched.
pub(crate) fn remove_entry(path: &Path, kind: &EntryKind) -> io::Result<()> {
    let result = match kind {
        EntryKind::Dir => fs::remove_dir_all(path),
        EntryKind::Symlink { .. } | EntryKind::File { .. } => fs::remove_file(path),
    };
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn into_projection_error(root: &Path, rel: &str, err: ExecRootError) -> ExecRootError {
    match err {
        ExecRootError::Provision { source, .. } => ExecRootError::projection(root.join(rel), source),
        other => other,
    }
}
