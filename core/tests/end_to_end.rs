//! End-to-end build scenarios run against the real `bash` interpreter --
//! grounded on spec §8's S1/S2 worked examples. These exercise the full
//! `codebraid_core::build` pipeline (grouping, hashing, subprocess execution,
//! delimiter-framed output routing, caching) rather than any one crate in
//! isolation.

use codebraid_chunk::RawValue;
use codebraid_core::{build, BuildConfig, RawChunk};
use std::collections::HashMap;

fn bash_chunk(code: &str, complete: Option<bool>) -> RawChunk {
    let mut options = HashMap::new();
    options.insert("lang".to_string(), RawValue::Str("bash".to_string()));
    if let Some(b) = complete {
        options.insert("complete".to_string(), RawValue::Bool(b));
    }
    RawChunk {
        command: Some("nb".to_string()),
        code: vec![code.to_string()],
        options,
        origin_name: Some("doc.md".to_string()),
        origin_start_line_number: Some(1),
        inline: false,
    }
}

/// S1: two independent, complete chunks in one session each get their own
/// stdout, no stderr, and the build's exit code is clean.
#[tokio::test]
async fn two_chunk_session_attributes_stdout_per_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let config = BuildConfig::new(dir.path());
    let chunks = vec![bash_chunk("echo hi", None), bash_chunk("echo ok", None)];

    let report = build(chunks, Some(vec!["doc.md".to_string()]), &config).await.unwrap();

    assert_eq!(report.sessions.len(), 1);
    let session = &report.sessions[0];
    assert_eq!(session.chunks.len(), 2);
    assert_eq!(session.chunks[0].stdout_lines, vec!["hi".to_string()]);
    assert_eq!(session.chunks[1].stdout_lines, vec!["ok".to_string()]);
    assert!(session.chunks[0].stderr_lines.is_empty());
    assert!(session.chunks[1].stderr_lines.is_empty());
    assert_eq!(report.exit_code, 0);
}

/// S2: an incomplete chunk's output is attributed to the next complete
/// chunk via `output_index`, and the incomplete chunk itself carries none.
#[tokio::test]
async fn incomplete_chunk_output_joins_the_next_complete_chunk() {
    let dir = tempfile::tempdir().unwrap();
    let config = BuildConfig::new(dir.path());
    let chunks = vec![bash_chunk("x=1", Some(false)), bash_chunk("echo $((x+1))", None)];

    let report = build(chunks, Some(vec!["doc.md".to_string()]), &config).await.unwrap();

    let session = &report.sessions[0];
    assert_eq!(session.chunks[0].output_index, Some(1));
    assert_eq!(session.chunks[1].output_index, Some(1));
    assert!(session.chunks[0].stdout_lines.is_empty());
    assert_eq!(session.chunks[1].stdout_lines, vec!["2".to_string()]);
    assert_eq!(report.exit_code, 0);
}

/// A second build of the same session reuses the cache instead of
/// re-running bash -- grounded on spec §8's S6 cache-hit scenario.
#[tokio::test]
async fn unchanged_session_hits_cache_on_second_build() {
    let cache_dir = tempfile::tempdir().unwrap();
    let chunks = || vec![bash_chunk("echo cached", None)];

    let config = BuildConfig::new(cache_dir.path());
    let first = build(chunks(), Some(vec!["doc.md".to_string()]), &config).await.unwrap();
    assert_eq!(first.sessions[0].chunks[0].stdout_lines, vec!["cached".to_string()]);

    let config2 = BuildConfig::new(cache_dir.path());
    let second = build(chunks(), Some(vec!["doc.md".to_string()]), &config2).await.unwrap();
    assert_eq!(second.sessions[0].chunks[0].stdout_lines, vec!["cached".to_string()]);
    assert!(!second.sessions[0].needs_exec);
}

/// A chunk that fails at runtime surfaces a nonzero exit code and a
/// `StderrRunError` attached to the offending chunk.
#[tokio::test]
async fn failing_chunk_sets_error_exit_bit() {
    let dir = tempfile::tempdir().unwrap();
    let config = BuildConfig::new(dir.path());
    let chunks = vec![bash_chunk("echo boom 1>&2; exit 1", None)];

    let report = build(chunks, Some(vec!["doc.md".to_string()]), &config).await.unwrap();

    assert_eq!(report.exit_code & 0x08, 0x08);
    assert!(!report.sessions[0].errors.is_empty());
}
