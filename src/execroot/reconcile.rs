use super::entry::{EntryKind, Snapshot};
use super::projector::{reference_matches, remove_entry};
use super::{DeclaredState, ExecRootError, LinkStrategy};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub kept: usize,
    pub removed: usize,
}

/// Bring a reused root in line with `state` by removing every entry that the
/// new declaration does not produce as-is.
///
/// Entries are stale when they are undeclared, or declared with a different
/// kind or link target. Stale entries are removed deepest first, never
/// following links, so neither the outside of the root nor any link source is
/// touched. A second snapshot must show no stale entry left.
pub fn reconcile(
    root: &Path,
    state: &DeclaredState,
    strategy: LinkStrategy,
) -> Result<ReconcileStats, ExecRootError> {
    let snapshot = Snapshot::capture(root)?;

    let mut stale = stale_entries(&snapshot, state, strategy);
    // Deepest first, so a directory is emptied before it is removed
    stale.sort_by(|(a, _), (b, _)| depth(b).cmp(&depth(a)).then_with(|| a.cmp(b)));

    for (rel, kind) in &stale {
        let path = root.join(rel);
        debug!(path = %path.display(), ?kind, "removing stale entry");
        remove_entry(&path, kind).map_err(|e| {
            ExecRootError::reconciliation(&path, format!("Failed to remove stale entry: {}", e))
        })?;
    }

    let after = Snapshot::capture(root)?;
    if let Some((rel, _)) = stale_entries(&after, state, strategy).first() {
        return Err(ExecRootError::reconciliation(
            root.join(rel),
            "stale entry survived removal",
        ));
    }

    let stats = ReconcileStats {
        kept: snapshot.len() - stale.len(),
        removed: stale.len(),
    };
    info!(
        root = %root.display(),
        kept = stats.kept,
        removed = stats.removed,
        "reconciled reused root"
    );
    Ok(stats)
}

/// Entries not produced as-is by `state`. Paths that are not valid UTF-8 can
/// never be declared and are always stale.
fn stale_entries(
    snapshot: &Snapshot,
    state: &DeclaredState,
    strategy: LinkStrategy,
) -> Vec<(PathBuf, EntryKind)> {
    let declared = snapshot
        .entries
        .iter()
        .filter(|(rel, kind)| !is_expected(rel, kind, state, strategy))
        .map(|(rel, kind)| (PathBuf::from(rel), kind.clone()));
    let undeclarable = snapshot
        .undeclarable
        .iter()
        .map(|(rel, kind)| (rel.clone(), kind.clone()));
    declared.chain(undeclarable).collect()
}

fn is_expected(rel: &str, kind: &EntryKind, state: &DeclaredState, strategy: LinkStrategy) -> bool {
    if let Some(source) = state.links.get(rel) {
        // An unreadable source will fail projection anyway; drop the old link now
        return match fs::metadata(source) {
            Ok(meta) => reference_matches(strategy, kind, source, &meta),
            Err(_) => false,
        };
    }
    state.dirs.contains(rel) && kind.is_dir()
}

fn depth(rel: &Path) -> usize {
    rel.components().count()
}
