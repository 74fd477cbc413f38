// Public API exports
pub mod execroot;
pub mod manifest;
pub mod security;

// Re-export main types for convenience
pub use execroot::{
    CollectionReport, DeclaredState, EntryKind, ErrorKind, ExecRoot, ExecRootBuilder,
    ExecRootError, LinkStrategy, RootMode, SandboxExecRoot, Snapshot,
};
pub use manifest::Manifest;
pub use security::PathSanitizer;
