//! Orchestrates one document build end to end: turns an ordered sequence of
//! [`RawChunk`]s into executed `Session`/`Source` collections and a process
//! exit code -- grounded on `CodeProcessor` (`codeprocessors/base.py`). Named
//! component K in the expanded specification; components A-J are each their
//! own crate and this one only wires them together.

pub mod config;
pub mod error;
pub mod exit_code;
pub mod grouping;

pub use config::BuildConfig;
pub use error::CoreError;
pub use exit_code::compute_exit_code;
pub use grouping::RawChunk;

use codebraid_cache::{compute_cache_key, CacheManager, SessionCache, STDIN_CACHE_KEY};
use codebraid_collections::{Session, Source};
use codebraid_message::{Message, MessageKind};
use codebraid_progress::{LiveOutputMux, Progress, Task};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

/// The result of one complete build: every session and source the document
/// produced, in their original first-appearance order, plus the rolled-up
/// process exit code (§6).
pub struct BuildReport {
    pub sessions: Vec<Session>,
    pub sources: Vec<Source>,
    pub exit_code: u8,
}

/// Run one document build -- grounded on `CodeProcessor.process`'s top-level
/// method sequence. `origins` names the source file(s) the chunks came
/// from, for cache keying (§6.I); `None` is treated as the stdin build
/// (`codebraid_cache::STDIN_CACHE_KEY`).
#[tracing::instrument(skip_all)]
pub async fn build(raw_chunks: Vec<RawChunk>, origins: Option<Vec<String>>, config: &BuildConfig) -> Result<BuildReport, CoreError> {
    let formatter = codebraid_utils::formatter_for_stderr();
    let mut progress = Progress::stderr(formatter);

    progress.set_task(Task::Parse);
    let mut chunks = grouping::build_chunks(raw_chunks, config);
    grouping::flag_duplicate_names(&mut chunks);

    progress.set_task(Task::Process);
    codebraid_copy::resolve_code_copying(&mut chunks);

    let (mut sessions, mut sources) = grouping::group_chunks(chunks, config);
    for session in &mut sessions {
        grouping::attach_language(session);
        session.finalize();
    }
    tracing::debug!(sessions = sessions.len(), sources = sources.len(), "grouped chunks into collections");

    let cache_key = match &origins {
        Some(o) => compute_cache_key(o),
        None => STDIN_CACHE_KEY.to_string(),
    };
    let mut cache = CacheManager::prepare(&config.cache_root, &cache_key, origins.as_deref()).await?;

    let mut hash_roots_touched: Vec<String> = Vec::new();
    for session in &mut sessions {
        let (Some(hash_root), Some(hash)) = (session.hash_root.clone(), session.hash.clone()) else {
            continue;
        };
        if !hash_roots_touched.contains(&hash_root) {
            hash_roots_touched.push(hash_root.clone());
        }
        if session.status.prevent_exec {
            continue;
        }
        if let Some(entry) = cache.load(&hash_root, &hash).await? {
            tracing::debug!(hash = %hash, "cache hit, skipping execution");
            entry.apply_to(session);
            session.refresh_status();
        }
    }

    progress.set_task(Task::Exec);
    let mut indexed: Vec<(usize, Session)> = sessions.into_iter().enumerate().collect();
    let mut needing_exec: Vec<(usize, Session)> = Vec::new();
    let mut settled: Vec<(usize, Session)> = Vec::new();
    for (i, session) in indexed.drain(..) {
        if session.needs_exec && !session.status.prevent_exec && !config.only_resolve_output {
            needing_exec.push((i, session));
        } else {
            settled.push((i, session));
        }
    }

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_jobs.max(1)));
    let mut join_set: JoinSet<(usize, Session)> = JoinSet::new();
    for (i, mut session) in needing_exec {
        if session.live_output {
            let mux = LiveOutputMux::stderr(codebraid_utils::formatter_for_stderr());
            session.live_sink = Some(Arc::new(mux));
        }
        let permit = semaphore.clone();
        let jupyter = config.jupyter_executor.clone();
        join_set.spawn(async move {
            let _permit = match permit.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (i, session),
            };
            run_one_session(&mut session, jupyter.as_ref()).await;
            (i, session)
        });
    }

    let mut heartbeat = tokio::time::interval(Duration::from_secs(1));
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut executed_indices: std::collections::HashSet<usize> = std::collections::HashSet::new();
    while !join_set.is_empty() {
        tokio::select! {
            joined = join_set.join_next() => {
                if let Some(Ok((i, mut session))) = joined {
                    session.refresh_status();
                    progress.note_counts(session.status.error_count, session.status.warning_count);
                    progress.note_chunk_completed();
                    executed_indices.insert(i);
                    settled.push((i, session));
                }
            }
            _ = heartbeat.tick() => {
                progress.tick();
            }
        }
    }

    settled.sort_by_key(|(i, _)| *i);
    let mut sessions: Vec<Session> = Vec::with_capacity(settled.len());
    let mut executed_sessions: Vec<bool> = Vec::with_capacity(settled.len());
    for (i, session) in settled {
        executed_sessions.push(executed_indices.contains(&i));
        sessions.push(session);
    }

    progress.set_task(Task::Postprocess);
    for (session, was_executed) in sessions.iter_mut().zip(&executed_sessions) {
        if *was_executed && session.hash.is_some() && !session.status.prevent_caching {
            let (hash_root, hash) = (session.hash_root.clone().unwrap_or_default(), session.hash.clone().unwrap_or_default());
            let entry = SessionCache::from_session(session);
            cache.update(&hash_root, &hash, entry).await?;
        }
    }

    resolve_output_copying_across_collections(&mut sessions, &mut sources);

    cache.finalize_index(&hash_roots_touched, &[], origins.as_deref()).await?;
    cache.cleanup(config.no_cache).await?;

    progress.set_task(Task::Complete);
    let exit_code = compute_exit_code(&sessions, &sources);
    progress.finish();

    Ok(BuildReport { sessions, sources, exit_code })
}

/// `codebraid_copy::resolve_output_copying` operates on a flat chunk slice,
/// but a `paste` chunk's copy target may live in a different session or
/// source than the `paste` chunk itself -- grounded on spec §4.F's output
/// pass running "after every session has executed", globally across the
/// document. Chunks are temporarily pulled out of their owning collections
/// into one flat `Vec` (indices renumbered), resolved together, then handed
/// back in the same order.
fn resolve_output_copying_across_collections(sessions: &mut [Session], sources: &mut [Source]) {
    let mut flat: Vec<codebraid_chunk::CodeChunk> = Vec::new();
    let mut session_spans: Vec<usize> = Vec::with_capacity(sessions.len());
    for session in sessions.iter_mut() {
        session_spans.push(session.chunks.len());
        flat.append(&mut session.chunks);
    }
    let mut source_spans: Vec<usize> = Vec::with_capacity(sources.len());
    for source in sources.iter_mut() {
        source_spans.push(source.chunks.len());
        flat.append(&mut source.chunks);
    }

    codebraid_copy::resolve_output_copying(&mut flat);

    let mut rest = flat;
    for (session, span) in sessions.iter_mut().zip(session_spans) {
        let tail = rest.split_off(span);
        session.chunks = rest;
        rest = tail;
    }
    for (source, span) in sources.iter_mut().zip(source_spans) {
        let tail = rest.split_off(span);
        source.chunks = rest;
        rest = tail;
    }
}

/// Execute one session's code, routing to the Jupyter executor when
/// configured -- grounded on spec §2.K's "runs sessions that still need
/// execution". Failures are attached as a `SysConfigError` on the session
/// rather than aborting the whole build: one session's missing interpreter
/// or unavailable kernel never blocks the rest of the document (§7's
/// per-collection error propagation policy).
async fn run_one_session(session: &mut Session, jupyter: &dyn codebraid_jupyter::KernelExecutor) {
    if session.jupyter_kernel.is_some() {
        match jupyter.execute(session).await {
            Ok(()) => session.needs_exec = false,
            Err(e) => tracing::warn!(session = ?session.name, error = %e, "jupyter execution unavailable"),
        }
        return;
    }
    let workdir = match tempfile::tempdir() {
        Ok(dir) => dir,
        Err(e) => {
            session.errors.push(Message::new(MessageKind::SysConfigError, format!("Could not create scratch directory: {e}")));
            session.needs_exec = false;
            session.finalize();
            return;
        }
    };
    match codebraid_exec::execute_session(session, workdir.path()).await {
        Ok(()) => session.needs_exec = false,
        Err(e) => {
            tracing::warn!(session = ?session.name, error = %e, "session execution failed");
            session.errors.push(Message::new(MessageKind::SysConfigError, format!("Session execution failed: {e}")));
            session.needs_exec = false;
            session.finalize();
        }
    }
}
