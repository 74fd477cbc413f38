mod collector;
mod declared;
mod entry;
mod error;
mod projector;
mod provisioner;
mod reconcile;


pub use collector::CollectionReport;
pub use declared::DeclaredState;
pub use entry::{EntryKind, Snapshot};
pub use error::{ErrorKind, ExecRootError};
pub use projector::ProjectionStats;
pub use reconcile::ReconcileStats;

use crate::security::PathSanitizer;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default permission bits for directories created inside a root
pub const DEFAULT_DIR_MODE: u32 = 0o755;

/// Boundary between an action-execution framework and the directory a
/// sandboxed process runs in
pub trait SandboxExecRoot {
    /// Make all `inputs` readable inside the root, and make sure every
    /// `writable_dirs` entry inside the root and the parent of every output
    /// exist and can be written into.
    ///
    /// # Arguments
    /// * `inputs` - Relative path inside the root mapped to an absolute source
    /// * `outputs` - Relative paths the process is expected to write
    /// * `writable_dirs` - Absolute paths; those outside the root are ignored
    fn create_file_system(
        &mut self,
        inputs: &HashMap<String, PathBuf>,
        outputs: &HashSet<String>,
        writable_dirs: &HashSet<PathBuf>,
    ) -> Result<(), ExecRootError>;

    /// Move all produced `outputs` to `destination_root`, keeping the
    /// directory structure
    fn copy_outputs(
        &mut self,
        destination_root: &Path,
        outputs: &HashSet<String>,
    ) -> Result<CollectionReport, ExecRootError>;
}

/// How an existing tree at the root path is treated before projection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RootMode {
    /// Wipe whatever is there and start from an empty directory
    Fresh,
    /// Keep the tree and reconcile it against each new declaration
    #[default]
    Reuse,
}

/// How inputs are referenced from inside the root
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LinkStrategy {
    #[default]
    Symlink,
    /// Sources must be regular files on the same device as the root
    Hardlink,
}

/// Mutable builder for an [`ExecRoot`]
pub struct ExecRootBuilder {
    path: PathBuf,
    mode: RootMode,
    strategy: LinkStrategy,
    dir_mode: u32,
}

impl ExecRootBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            mode: RootMode::default(),
            strategy: LinkStrategy::default(),
            dir_mode: DEFAULT_DIR_MODE,
        }
    }

    pub fn mode(mut self, mode: RootMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn strategy(mut self, strategy: LinkStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Permission bits for created directories (still subject to the umask)
    pub fn dir_mode(mut self, dir_mode: u32) -> Self {
        self.dir_mode = dir_mode;
        self
    }

    pub fn build(self) -> Result<ExecRoot, ExecRootError> {
        let absolute =
            std::path::absolute(&self.path).map_err(|e| ExecRootError::provision(&self.path, e))?;
        let path = PathSanitizer::normalize_absolute(&absolute)?;

        Ok(ExecRoot {
            path,
            mode: self.mode,
            strategy: self.strategy,
            dir_mode: self.dir_mode,
            declared: None,
        })
    }
}

/// A directory a single execution at a time runs in.
///
/// Each call to [`SandboxExecRoot::create_file_system`] prepares the root
/// per [`RootMode`]; [`ExecRoot::teardown`] or [`ExecRoot::reset`] end its use.
#[derive(Debug)]
pub struct ExecRoot {
    path: PathBuf,
    mode: RootMode,
    strategy: LinkStrategy,
    dir_mode: u32,
    /// Last declaration applied successfully
    declared: Option<DeclaredState>,
}

impl ExecRoot {
    pub fn builder(path: impl Into<PathBuf>) -> ExecRootBuilder {
        ExecRootBuilder::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> RootMode {
        self.mode
    }

    pub fn strategy(&self) -> LinkStrategy {
        self.strategy
    }

    pub fn declared(&self) -> Option<&DeclaredState> {
        self.declared.as_ref()
    }

    /// Current entries under the root
    pub fn snapshot(&self) -> Result<Snapshot, ExecRootError> {
        Snapshot::capture(&self.path)
    }

    /// Reconcile the root down to nothing, keeping the root directory itself.
    pub fn reset(&mut self) -> Result<ReconcileStats, ExecRootError> {
        self.declared = None;
        let root_kind =
            EntryKind::probe(&self.path).map_err(|e| ExecRootError::provision(&self.path, e))?;
        match root_kind {
            None => return Ok(ReconcileStats::default()),
            Some(kind) if !kind.is_dir() => {
                return Err(ExecRootError::conflict(
                    &self.path,
                    "exec root exists but is not a directory",
                ));
            }
            Some(_) => {}
        }
        reconcile::reconcile(&self.path, &DeclaredState::default(), self.strategy)
    }

    /// Remove the whole root. Safe to call repeatedly, including after an
    /// earlier teardown that stopped halfway.
    pub fn teardown(&mut self) -> Result<(), ExecRootError> {
        self.declared = None;
        match fs::remove_dir_all(&self.path) {
            Ok(()) => {
                info!(root = %self.path.display(), "tore down exec root");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ExecRootError::reconciliation(
                &self.path,
                format!("Failed to remove root: {}", e),
            )),
        }
    }

    fn prepare_root(&self, state: &DeclaredState) -> Result<(), ExecRootError> {
        let root_kind =
            EntryKind::probe(&self.path).map_err(|e| ExecRootError::provision(&self.path, e))?;

        match (self.mode, root_kind) {
            (_, None) => {}
            (_, Some(kind)) if !kind.is_dir() => {
                return Err(ExecRootError::conflict(
                    &self.path,
                    "exec root exists but is not a directory",
                ));
            }
            (RootMode::Fresh, Some(_)) => {
                debug!(root = %self.path.display(), "wiping root for fresh use");
                fs::remove_dir_all(&self.path).map_err(|e| {
                    ExecRootError::reconciliation(&self.path, format!("Failed to wipe root: {}", e))
                })?;
            }
            (RootMode::Reuse, Some(_)) => {
                reconcile::reconcile(&self.path, state, self.strategy)?;
                return Ok(());
            }
        }

        fs::create_dir_all(&self.path).map_err(|e| ExecRootError::provision(&self.path, e))
    }

    fn apply(&self, state: &DeclaredState) -> Result<(), ExecRootError> {
        self.prepare_root(state)?;
        projector::project_inputs(&self.path, state, self.strategy, self.dir_mode)?;
        provisioner::provision_writable_dirs(&self.path, state, self.dir_mode)?;
        Ok(())
    }
}

impl SandboxExecRoot for ExecRoot {
    fn create_file_system(
        &mut self,
        inputs: &HashMap<String, PathBuf>,
        outputs: &HashSet<String>,
        writable_dirs: &HashSet<PathBuf>,
    ) -> Result<(), ExecRootError> {
        self.declared = None;
        let state = DeclaredState::new(&self.path, inputs, outputs, writable_dirs)?;

        if !state.outside_root.is_empty() {
            warn!(
                root = %self.path.display(),
                ignored = state.outside_root.len(),
                "ignoring writable dirs outside the exec root"
            );
        }

        self.apply(&state)?;
        info!(
            root = %self.path.display(),
            inputs = state.links.len(),
            dirs = state.dirs.len(),
            "exec root ready"
        );
        self.declared = Some(state);
        Ok(())
    }

    fn copy_outputs(
        &mut self,
        destination_root: &Path,
        outputs: &HashSet<String>,
    ) -> Result<CollectionReport, ExecRootError> {
        let outputs = outputs
            .iter()
            .map(|raw| PathSanitizer::sanitize(raw))
            .collect::<Result<BTreeSet<_>, _>>()?;
        collector::collect_outputs(&self.path, destination_root, &outputs)
    }
}
