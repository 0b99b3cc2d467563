use crate::reader::{DelimKind, StreamEvent, StreamSplitter};
use crate::rewrite::rewrite_output;
use crate::stage::{build_stage_commands, build_command_line, StageVars};
use codebraid_collections::{LiveEvent, LiveSinkHandle, RunProgram, Session};
use codebraid_language::{ExecStage, LanguageDef};
use codebraid_message::{Message, MessageKind};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;

const READ_BUF_SIZE: usize = 8192;
const MAX_DECODE_ERRORS: u32 = 10;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("session has no resolved language definition")]
    NoLanguage,
    #[error("failed to write generated source to {path}: {source}")]
    WriteSource { path: PathBuf, #[source] source: std::io::Error },
    #[error("failed to spawn {command:?}: {source}")]
    Spawn { command: Vec<String>, #[source] source: std::io::Error },
    #[error(transparent)]
    Stage(#[from] crate::stage::StageError),
    #[error("I/O error talking to child process: {0}")]
    Io(#[from] std::io::Error),
}

fn decode(bytes: &[u8], encoding_name: Option<&str>) -> (String, bool) {
    let encoding = encoding_name.and_then(encoding_rs::Encoding::for_label).unwrap_or(encoding_rs::UTF_8);
    let (text, _, had_errors) = encoding.decode(bytes);
    (text.into_owned(), had_errors)
}

fn split_out_lines(text: &str) -> Vec<String> {
    codebraid_utils::splitlines_lf(text, false)
}

/// Write `code` to `source_<hash_root>.<ext>` inside `workdir`, skipping
/// languages that stream code over stdin instead -- grounded on spec
/// §4.G's "skipped for interpreter-script languages" rule.
fn write_source_file(lang: &LanguageDef, hash_root: &str, code: &str, workdir: &Path) -> Result<Option<PathBuf>, ExecError> {
    if lang.interpreter_script.is_some() {
        return Ok(None);
    }
    let path = workdir.join(format!("source_{hash_root}.{}", lang.extension));
    std::fs::write(&path, code).map_err(|e| ExecError::WriteSource { path: path.clone(), source: e })?;
    Ok(Some(path))
}

fn write_interpreter_script(lang: &LanguageDef, temp_suffix: &str, workdir: &Path) -> Result<Option<PathBuf>, ExecError> {
    match lang.interpreter_script {
        None => Ok(None),
        Some(script) => {
            let path = workdir.join(format!("{}_{}.{}", lang.name, temp_suffix, lang.extension));
            std::fs::write(&path, script).map_err(|e| ExecError::WriteSource { path: path.clone(), source: e })?;
            Ok(Some(path))
        }
    }
}

fn stage_templates<'a>(lang: &'a LanguageDef, stage: ExecStage) -> (&'a [String], Option<&'a str>, MessageKind) {
    match stage {
        ExecStage::Compile => (&lang.compile_commands, lang.compile_encoding.as_deref(), MessageKind::CompileError),
        ExecStage::PreRun => (&lang.pre_run_commands, lang.pre_run_encoding.as_deref(), MessageKind::PreRunError),
        ExecStage::PostRun => (&lang.post_run_commands, lang.post_run_encoding.as_deref(), MessageKind::PostRunError),
        ExecStage::Run => unreachable!("run stage has its own driver"),
    }
}

fn stage_buffer<'a>(session: &'a mut Session, stage: ExecStage) -> &'a mut Vec<String> {
    match stage {
        ExecStage::Compile => &mut session.compile_lines,
        ExecStage::PreRun => &mut session.pre_run_output_lines,
        ExecStage::PostRun => &mut session.post_run_output_lines,
        ExecStage::Run => unreachable!("run stage has its own driver"),
    }
}

/// Run every command in one compile/pre_run/post_run stage, appending
/// combined stdout+stderr to the session's stage buffer and halting on the
/// first non-zero exit -- grounded on spec §4.G's non-run-stage I/O rule.
async fn run_non_run_stage(
    session: &mut Session,
    stage: ExecStage,
    lang: &LanguageDef,
    program: &RunProgram,
    source_path: Option<&Path>,
    vars: &StageVars,
) -> Result<bool, ExecError> {
    let (templates, encoding, kind) = stage_templates(lang, stage);
    if templates.is_empty() {
        return Ok(false);
    }
    let commands = build_stage_commands(templates, vars)?;
    for argv in commands {
        let output = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| ExecError::Spawn { command: argv.clone(), source: e })?;

        let mut combined = Vec::with_capacity(output.stdout.len() + output.stderr.len());
        combined.extend_from_slice(&output.stdout);
        combined.extend_from_slice(&output.stderr);
        let (text, _had_decode_errors) = decode(&combined, encoding);
        let rewritten = rewrite_output(&text, lang, Some(program), source_path, false).text;
        stage_buffer(session, stage).extend(split_out_lines(&rewritten));

        if !output.status.success() {
            session.errors.push(Message::with_exit_code(kind, rewritten, output.status.code()));
            return Ok(true);
        }
    }
    Ok(false)
}

/// Per-pipe state for the run stage's delimiter-synchronised reader --
/// grounded on spec §4.G's "each reader holds an internal byte buffer and a
/// state machine".
struct StreamState {
    own: &'static str,
    splitter: StreamSplitter,
    active_chunk: Option<usize>,
    /// A nested region within this stream currently routing somewhere other
    /// than the stream's own buffer (`"repl"`; `"expr"` in principle, though
    /// no bundled language's inline-expression formatter emits expr delims).
    sub_route: Option<&'static str>,
    /// Once a chunk has opened on this stream, later `None` stretches are
    /// trailing output rather than leading output.
    past_first_chunk: bool,
    closed: bool,
}

impl StreamState {
    fn new(own: &'static str, run_delim_hash: &str) -> Self {
        StreamState {
            own,
            splitter: StreamSplitter::new(run_delim_hash),
            active_chunk: None,
            sub_route: None,
            past_first_chunk: false,
            closed: false,
        }
    }
}

/// Diagnostic-only bookkeeping for the cross-stream rendezvous spec §4.G
/// describes as a blocking protocol. Both stdout and stderr only ever carry
/// their own stream's delimiters (`output=stdout` appears solely on the
/// stdout pipe, `output=stderr` solely on stderr), so each reader already
/// has everything it needs to attribute its own bytes without waiting on
/// its sibling. This struct decrements the chunk's expected counts as
/// delimiters are actually seen and is consulted only after the process
/// exits, to raise [`MessageKind::RuntimeSourceError`] for a chunk whose
/// count never reached zero -- the same failure spec §4.G's literal
/// mutex/counter/yield protocol would eventually detect as starvation, just
/// checked once at the end instead of blocking mid-stream.
struct DelimTally {
    stdout_start: HashMap<usize, u32>,
    stdout_end: HashMap<usize, u32>,
    stderr_start: HashMap<usize, u32>,
    stderr_end: HashMap<usize, u32>,
}

impl DelimTally {
    fn from_program(program: &RunProgram) -> Self {
        DelimTally {
            stdout_start: program.expected_stdout_start_delim_chunks.clone(),
            stdout_end: program.expected_stdout_end_delim_chunks.clone(),
            stderr_start: program.expected_stderr_start_delim_chunks.clone(),
            stderr_end: program.expected_stderr_end_delim_chunks.clone(),
        }
    }

    fn observe(&mut self, output: &str, kind: DelimKind, chunk: usize) {
        let map = match (output, kind) {
            ("stdout", DelimKind::Start) => &mut self.stdout_start,
            ("stdout", DelimKind::End) => &mut self.stdout_end,
            ("stderr", DelimKind::Start) => &mut self.stderr_start,
            ("stderr", DelimKind::End) => &mut self.stderr_end,
            _ => return,
        };
        if let Some(count) = map.get_mut(&chunk) {
            *count = count.saturating_sub(1);
        }
    }

    /// Chunks whose expected start or end count for either stream never
    /// reached zero.
    fn stranded_chunks(&self) -> Vec<usize> {
        let mut out: Vec<usize> = self
            .stdout_start
            .iter()
            .chain(self.stdout_end.iter())
            .chain(self.stderr_start.iter())
            .chain(self.stderr_end.iter())
            .filter(|&(_, &count)| count > 0)
            .map(|(&chunk, _)| chunk)
            .collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

fn route_text(session: &mut Session, state: &mut StreamState, bytes: &[u8], encoding: Option<&str>, decode_errors: &mut u32, live: Option<&LiveSinkHandle>) {
    let (text, had_errors) = decode(bytes, encoding);
    if had_errors && *decode_errors < MAX_DECODE_ERRORS {
        *decode_errors += 1;
        let target = match state.active_chunk {
            Some(i) => &mut session.chunks[i].errors,
            None => &mut session.errors,
        };
        target.push(Message::new(MessageKind::DecodeError, "could not decode subprocess output with the configured encoding"));
    }
    let lines = split_out_lines(&text);
    if lines.is_empty() {
        return;
    }
    if let (Some(sink), Some(chunk)) = (live, state.active_chunk) {
        for line in &lines {
            sink.on_event(LiveEvent::ChunkLine { chunk, stderr: state.own == "stderr", line: line.clone() });
        }
    }
    match (state.active_chunk, state.sub_route) {
        (Some(i), Some("repl")) => session.chunks[i].repl_lines.extend(lines),
        (Some(i), Some("expr")) => session.chunks[i].expr_lines.extend(lines),
        (Some(i), _) => {
            if state.own == "stdout" {
                session.chunks[i].stdout_lines.extend(lines);
            } else {
                session.chunks[i].stderr_lines.extend(lines);
            }
        }
        (None, _) if state.own == "stdout" => {
            if state.past_first_chunk {
                session.template_end_stdout_lines.extend(lines);
            } else {
                session.template_start_stdout_lines.extend(lines);
            }
        }
        (None, _) => {
            if state.past_first_chunk {
                session.template_end_stderr_lines.extend(lines);
            } else {
                session.template_start_stderr_lines.extend(lines);
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn route_delim(
    session: &mut Session,
    state: &mut StreamState,
    d: &crate::reader::Delim,
    tally: &mut DelimTally,
    stderr_buf: &mut HashMap<usize, String>,
    last_synced_chunk: &mut Option<usize>,
) {
    tally.observe(&d.output, d.kind, d.chunk);
    match d.output.as_str() {
        "repl" => {
            state.sub_route = match d.kind {
                DelimKind::Start => Some("repl"),
                DelimKind::End => None,
            };
        }
        "expr" => {
            state.sub_route = match d.kind {
                DelimKind::Start => Some("expr"),
                DelimKind::End => None,
            };
        }
        own if own == state.own => match d.kind {
            DelimKind::Start => {
                state.active_chunk = Some(d.output_chunk);
                state.past_first_chunk = true;
                *last_synced_chunk = Some(d.output_chunk);
                if state.own == "stderr" {
                    stderr_buf.entry(d.output_chunk).or_default();
                }
            }
            DelimKind::End => {
                state.active_chunk = None;
            }
        },
        _ => {}
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_run_stage(
    session: &mut Session,
    lang: &LanguageDef,
    program: &RunProgram,
    source_path: Option<&Path>,
    _run_script_path: Option<&Path>,
    vars: &StageVars,
    run_delim_hash: &str,
) -> Result<(), ExecError> {
    let live = session.live_sink.clone().filter(|_| session.live_output);
    if let Some(sink) = &live {
        sink.on_event(LiveEvent::SessionStart);
    }

    let argv = build_command_line(&lang.run_command, vars)?;
    let mut child = Command::new(&argv[0])
        .args(&argv[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| ExecError::Spawn { command: argv.clone(), source: e })?;

    if let Some(stdin) = child.stdin.take() {
        if lang.interpreter_script.is_some() {
            let code = program.code.clone();
            tokio::spawn(async move {
                let mut stdin = stdin;
                let _ = stdin.write_all(code.as_bytes()).await;
                let _ = stdin.shutdown().await;
            });
        } else {
            drop(stdin);
        }
    }

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();
    let mut stdout_state = StreamState::new("stdout", run_delim_hash);
    let mut stderr_state = StreamState::new("stderr", run_delim_hash);
    let mut tally = DelimTally::from_program(program);
    let mut decode_errors = 0u32;
    let mut stderr_scratch: HashMap<usize, String> = HashMap::new();
    let mut last_synced_chunk: Option<usize> = None;
    let mut stdout_buf = [0u8; READ_BUF_SIZE];
    let mut stderr_buf = [0u8; READ_BUF_SIZE];

    loop {
        if stdout_state.closed && stderr_state.closed {
            break;
        }
        tokio::select! {
            n = async {
                match stdout_pipe.as_mut() {
                    Some(p) => p.read(&mut stdout_buf).await,
                    None => std::future::pending().await,
                }
            }, if !stdout_state.closed => {
                let n = n?;
                if n == 0 {
                    for ev in stdout_state.splitter.finish() {
                        apply_event(session, &mut stdout_state, ev, lang.run_encoding.as_deref(), &mut decode_errors, &mut tally, &mut stderr_scratch, &mut last_synced_chunk, live.as_ref());
                    }
                    stdout_state.closed = true;
                    stdout_pipe = None;
                } else {
                    let events = stdout_state.splitter.feed(&stdout_buf[..n]);
                    for ev in events {
                        apply_event(session, &mut stdout_state, ev, lang.run_encoding.as_deref(), &mut decode_errors, &mut tally, &mut stderr_scratch, &mut last_synced_chunk, live.as_ref());
                    }
                }
            }
            n = async {
                match stderr_pipe.as_mut() {
                    Some(p) => p.read(&mut stderr_buf).await,
                    None => std::future::pending().await,
                }
            }, if !stderr_state.closed => {
                let n = n?;
                if n == 0 {
                    for ev in stderr_state.splitter.finish() {
                        apply_event(session, &mut stderr_state, ev, lang.run_encoding.as_deref(), &mut decode_errors, &mut tally, &mut stderr_scratch, &mut last_synced_chunk, live.as_ref());
                    }
                    stderr_state.closed = true;
                    stderr_pipe = None;
                } else {
                    let events = stderr_state.splitter.feed(&stderr_buf[..n]);
                    for ev in events {
                        apply_event(session, &mut stderr_state, ev, lang.run_encoding.as_deref(), &mut decode_errors, &mut tally, &mut stderr_scratch, &mut last_synced_chunk, live.as_ref());
                    }
                }
            }
        }
    }

    let status = child.wait().await?;

    for (chunk, text) in stderr_scratch {
        if text.is_empty() {
            continue;
        }
        let result = rewrite_output(&text, lang, Some(program), source_path, false);
        if result.matched_error {
            session.chunks[chunk].errors.push(Message::new(MessageKind::StderrRunError, result.text));
        } else if result.matched_warning {
            session.chunks[chunk].warnings.push(Message::new(MessageKind::StderrRunWarning, result.text));
        }
    }

    // Pattern matches in output that arrived outside any framed chunk (before
    // the first start delim or after the last end delim) have no chunk of
    // their own to attach to -- grounded on spec §4.G's "if a pattern
    // matches but no code_chunk is active... attach StderrRunError to the
    // session *and* a StderrRunErrorRef to the most-recently-synced chunk".
    let template_stderr: Vec<String> = session.template_start_stderr_lines.iter().chain(session.template_end_stderr_lines.iter()).cloned().collect();
    if !template_stderr.is_empty() {
        let text = template_stderr.join("\n");
        let result = rewrite_output(&text, lang, Some(program), source_path, false);
        if result.matched_error {
            let r = codebraid_message::MessageRef::session_buffer(0);
            session.errors.push_ref(Message::new(MessageKind::StderrRunError, result.text.clone()), r);
            if let Some(chunk) = last_synced_chunk {
                session.chunks[chunk].errors.push_ref(Message::new(MessageKind::StderrRunErrorRef, result.text), r);
                session.errors.update_refed(r);
            }
        } else if result.matched_warning {
            let r = codebraid_message::MessageRef::session_buffer(1);
            session.warnings.push_ref(Message::new(MessageKind::StderrRunWarning, result.text.clone()), r);
            if let Some(chunk) = last_synced_chunk {
                session.chunks[chunk].warnings.push_ref(Message::new(MessageKind::StderrRunWarningRef, result.text), r);
                session.warnings.update_refed(r);
            }
        }
    }

    if !status.success() {
        session.errors.push(Message::with_exit_code(MessageKind::RunError, "subprocess exited with a non-zero status", status.code()));
    }

    for chunk in tally.stranded_chunks() {
        session.chunks[chunk].errors.push(Message::new(
            MessageKind::RuntimeSourceError,
            "subprocess output ended before this chunk's expected output delimiters all arrived",
        ));
    }

    if let Some(sink) = &live {
        sink.on_event(LiveEvent::SessionEnd);
    }

    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn apply_event(
    session: &mut Session,
    state: &mut StreamState,
    event: StreamEvent,
    encoding: Option<&str>,
    decode_errors: &mut u32,
    tally: &mut DelimTally,
    stderr_scratch: &mut HashMap<usize, String>,
    last_synced_chunk: &mut Option<usize>,
    live: Option<&LiveSinkHandle>,
) {
    match event {
        StreamEvent::Text(bytes) => {
            if state.own == "stderr" {
                if let Some(chunk) = state.active_chunk {
                    let (text, _had_errors) = decode(&bytes, encoding);
                    stderr_scratch.entry(chunk).or_default().push_str(&text);
                }
            }
            route_text(session, state, &bytes, encoding, decode_errors, live);
        }
        StreamEvent::Delim(d) => route_delim(session, state, &d, tally, stderr_scratch, last_synced_chunk),
    }
}

/// Run every exec stage a language defines, in order, for one subprocess
/// session -- grounded on spec §4.G's end-to-end stage pipeline. Not valid
/// for a Jupyter-backed session (`session.jupyter_kernel.is_some()`);
/// callers must route those to the Jupyter executor instead.
pub async fn execute_session(session: &mut Session, workdir: &Path) -> Result<(), ExecError> {
    let lang = session.language.clone().ok_or(ExecError::NoLanguage)?;
    let hash_root = session.hash_root.clone().unwrap_or_default();
    let temp_suffix = session.temp_suffix.clone();
    let run_delim_hash = session.run_delim_hash.clone().unwrap_or_default();
    let executable_opts = session.executable_opts.clone().unwrap_or_default();
    let args = session.args.clone().unwrap_or_default();

    let program = match session.run_program() {
        Some(p) => p.clone(),
        None => return Err(ExecError::NoLanguage),
    };

    let source_path = write_source_file(&lang, &hash_root, &program.code, workdir)?;
    let run_script_path = write_interpreter_script(&lang, &temp_suffix, workdir)?;
    let vars = StageVars::new(&lang, &run_delim_hash, source_path.as_deref().unwrap_or(Path::new("")), run_script_path.as_deref(), &executable_opts, &args);

    for stage in lang.exec_stages.clone() {
        match stage {
            ExecStage::Run => {
                run_run_stage(session, &lang, &program, source_path.as_deref(), run_script_path.as_deref(), &vars, &run_delim_hash).await?;
            }
            other => {
                if run_non_run_stage(session, other, &lang, &program, source_path.as_deref(), &vars).await? {
                    return Ok(());
                }
            }
        }
    }
    Ok(())
}
