use codebraid_chunk::RawValue;
use codebraid_jupyter::{KernelExecutor, UnavailableKernelExecutor};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Per-build configuration handed to the orchestrator by its caller --
/// grounded on spec §6.M. Argument parsing, YAML metadata, and environment
/// lookups are the document converter's job; this struct is only ever
/// constructed from already-resolved values.
pub struct BuildConfig {
    pub cache_root: PathBuf,
    pub no_cache: bool,
    /// When unset, a session's `CodeKey` includes the chunk's origin, so
    /// the same session name in two different source files never merges.
    pub cross_origin_sessions: bool,
    /// Skip the execution stage entirely and resolve only the code/output
    /// shape already on disk (cache hits or empty buffers) -- the fast
    /// path for a caller that only needs chunk text, not fresh output.
    pub only_resolve_output: bool,
    pub max_concurrent_jobs: usize,
    pub session_option_defaults: HashMap<String, RawValue>,
    pub code_option_defaults: HashMap<String, RawValue>,
    pub jupyter_executor: Arc<dyn KernelExecutor>,
}

impl BuildConfig {
    pub fn new(cache_root: impl Into<PathBuf>) -> Self {
        BuildConfig {
            cache_root: cache_root.into(),
            no_cache: false,
            cross_origin_sessions: false,
            only_resolve_output: false,
            max_concurrent_jobs: 1,
            session_option_defaults: HashMap::new(),
            code_option_defaults: HashMap::new(),
            jupyter_executor: Arc::new(UnavailableKernelExecutor),
        }
    }
}
