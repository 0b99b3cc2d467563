use std::path::PathBuf;
use thiserror::Error;

/// Orchestration-level failures -- conditions the document's `Message`
/// model has no vocabulary for, because they happen before or around a
/// particular chunk/session even exists (spec §7.N). Per-component errors
/// (`codebraid_cache::CacheError`, `codebraid_exec::ExecError`, ...) are
/// wrapped rather than flattened, so a caller can still match on the
/// originating subsystem.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("failed to create scratch directory for session at {path}: {source}")]
    ScratchDir { path: PathBuf, #[source] source: std::io::Error },
    #[error(transparent)]
    Cache(#[from] codebraid_cache::CacheError),
    #[error("session execution failed: {0}")]
    Exec(#[from] codebraid_exec::ExecError),
    #[error("jupyter execution failed: {0}")]
    Jupyter(#[from] codebraid_jupyter::JupyterError),
}
