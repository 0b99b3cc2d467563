//! Alternative execution path for sessions that set `jupyter_kernel`,
//! sketched at the level the original implements it at
//! (`codeprocessors/exec_jupyter.py`): resolve a kernel, feed it each
//! chunk's code, classify IOPub messages back onto chunk output.
//!
//! No real kernel-discovery or wire-protocol client is implemented here;
//! the only concrete [`KernelExecutor`] is [`UnavailableKernelExecutor`],
//! which always fails with [`MessageKind::SysConfigError`]. The trait
//! boundary and the message classification below are real, so a future
//! kernel backend built on a real Jupyter client is a drop-in.

use async_trait::async_trait;
use codebraid_collections::Session;
use codebraid_message::{Message, MessageKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JupyterError {
    #[error("no Jupyter kernel executor is configured")]
    Unavailable,
    #[error("kernel name \"{0}\" is ambiguous among installed kernels")]
    AmbiguousKernel(String),
    #[error("no kernel named \"{0}\" is installed")]
    UnknownKernel(String),
    #[error("timed out waiting for kernel output after {0:.1}s")]
    Timeout(f64),
}

/// One classified IOPub message -- grounded on spec §4.H's message
/// classification rules (`stream/stdout`, `stream/stderr`, `display_data`/
/// `execute_result`, `error`).
#[derive(Debug, Clone)]
pub enum IopubMessage {
    Stdout(String),
    Stderr(String),
    DisplayData { mime_type: String, data: Vec<u8> },
    ExecuteResult { mime_type: String, data: Vec<u8> },
    Error { name: String, value: String, traceback: Vec<String> },
    Idle,
}

/// Executes a session's chunks against a running Jupyter kernel instead of
/// a subprocess. Implementations resolve `session.jupyter_kernel` to a
/// concrete kernel, start it, send each output-boundary's accumulated code,
/// and route classified [`IopubMessage`]s back onto the owning chunk.
#[async_trait]
pub trait KernelExecutor: Send + Sync {
    async fn execute(&self, session: &mut Session) -> Result<(), JupyterError>;
}

/// The only [`KernelExecutor`] this crate provides: always reports that
/// Jupyter execution isn't available, matching the distilled spec's
/// explicit "sketch only" scope for this component.
pub struct UnavailableKernelExecutor;

#[async_trait]
impl KernelExecutor for UnavailableKernelExecutor {
    async fn execute(&self, session: &mut Session) -> Result<(), JupyterError> {
        session.errors.push(Message::new(MessageKind::SysConfigError, "Jupyter kernel execution is not available in this build"));
        session.needs_exec = false;
        Err(JupyterError::Unavailable)
    }
}

/// Classify one rich-output MIME bundle's preferred representation,
/// grounded on spec §4.H's `display_data`/`execute_result` handling: richer
/// formats win over plain text when both are present.
pub fn preferred_mime_type<'a>(available: &'a [&'a str]) -> Option<&'a str> {
    const PRIORITY: &[&str] = &["text/html", "image/svg+xml", "image/png", "image/jpeg", "text/latex", "text/markdown", "text/plain"];
    PRIORITY.iter().find_map(|&want| available.iter().find(|&&m| m == want).copied())
}

/// The on-disk name for a rich-output file written beside the cache --
/// grounded on spec §4.H's `<kernel>-<session>-<outidx>-<n>.<ext>` (or
/// `<name>-<n>.<ext>` when the session has no name).
pub fn rich_output_file_name(kernel: &str, session_name: Option<&str>, out_index: usize, n: usize, extension: &str) -> String {
    match session_name {
        Some(name) => format!("{name}-{n}.{extension}"),
        None => format!("{kernel}-{out_index}-{n}.{extension}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebraid_chunk::CodeKey;
    use codebraid_chunk::CollectionKind;

    fn session() -> Session {
        let key = CodeKey::new(Some("python".to_string()), None, CollectionKind::Session, None);
        Session::new(key)
    }

    #[tokio::test]
    async fn unavailable_executor_raises_sys_config_error() {
        let mut session = session();
        let executor = UnavailableKernelExecutor;
        let err = executor.execute(&mut session).await;
        assert!(matches!(err, Err(JupyterError::Unavailable)));
        assert_eq!(session.errors.len(), 1);
        assert!(!session.needs_exec);
    }

    #[test]
    fn preferred_mime_type_prefers_html_over_plain_text() {
        let available = ["text/plain", "text/html"];
        assert_eq!(preferred_mime_type(&available), Some("text/html"));
    }

    #[test]
    fn rich_output_file_name_prefers_session_name() {
        assert_eq!(rich_output_file_name("python3", Some("sess"), 2, 0, "png"), "sess-0.png");
        assert_eq!(rich_output_file_name("python3", None, 2, 0, "png"), "python3-2-0.png");
    }
}
