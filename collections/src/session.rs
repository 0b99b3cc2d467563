use crate::hash::{fold_chunk, identity_json_jupyter, identity_json_subprocess, split_hash, RollingHash};
use crate::live::LiveSinkHandle;
use crate::run_program::{synthesize, RunProgram};
use codebraid_chunk::{CodeChunk, CodeKey, OptionValue};
use codebraid_language::LanguageDef;
use codebraid_message::{CodeStatus, Message, MessageKind, MessageList};
use codebraid_utils::random_ascii_lower_alpha;
use std::sync::Arc;

fn chunk_outside_main(chunk: &CodeChunk) -> bool {
    chunk.options.get("outside_main").and_then(OptionValue::as_bool).unwrap_or(false)
}

fn chunk_complete(chunk: &CodeChunk) -> bool {
    chunk.options.get("complete").and_then(OptionValue::as_bool).unwrap_or(false)
}

/// The ordered group of chunks that execute together in a shared
/// interpreter or compile/run cycle -- grounded on `Session`
/// (`code_collections.py`). Holds every field `finalize` and the
/// subprocess/Jupyter executors need: resolved execution target, session
/// output buffers, and the hash identifying its cache entry.
pub struct Session {
    pub key: CodeKey,
    pub chunks: Vec<CodeChunk>,
    pub status: CodeStatus,
    pub errors: MessageList,
    pub warnings: MessageList,

    pub name: Option<String>,
    pub language: Option<Arc<LanguageDef>>,
    pub jupyter_kernel: Option<String>,
    pub jupyter_timeout: f64,
    pub executable: String,
    pub executable_opts: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub live_output: bool,
    pub needs_exec: bool,
    /// Set by the orchestrator before execution when `live_output` is on;
    /// the run stage pushes [`crate::LiveEvent`]s through it as output
    /// streams in -- grounded on spec §4.J.
    pub live_sink: Option<LiveSinkHandle>,

    pub hash: Option<String>,
    pub hash_root: Option<String>,
    pub run_delim_hash: Option<String>,
    pub temp_suffix: String,

    pub compile_lines: Vec<String>,
    pub pre_run_output_lines: Vec<String>,
    pub template_start_stdout_lines: Vec<String>,
    pub template_start_stderr_lines: Vec<String>,
    pub template_end_stdout_lines: Vec<String>,
    pub template_end_stderr_lines: Vec<String>,
    pub other_stdout_lines: Vec<String>,
    pub other_stderr_lines: Vec<String>,
    pub post_run_output_lines: Vec<String>,

    run_program: Option<RunProgram>,
}

impl Session {
    pub fn new(key: CodeKey) -> Self {
        Session {
            key,
            chunks: Vec::new(),
            status: CodeStatus::default(),
            errors: MessageList::errors(),
            warnings: MessageList::warnings(),
            name: None,
            language: None,
            jupyter_kernel: None,
            jupyter_timeout: 60.0,
            executable: String::new(),
            executable_opts: None,
            args: None,
            live_output: false,
            needs_exec: true,
            live_sink: None,
            hash: None,
            hash_root: None,
            run_delim_hash: None,
            temp_suffix: random_ascii_lower_alpha(8),
            compile_lines: Vec::new(),
            pre_run_output_lines: Vec::new(),
            template_start_stdout_lines: Vec::new(),
            template_start_stderr_lines: Vec::new(),
            template_end_stdout_lines: Vec::new(),
            template_end_stderr_lines: Vec::new(),
            other_stdout_lines: Vec::new(),
            other_stderr_lines: Vec::new(),
            post_run_output_lines: Vec::new(),
            run_program: None,
        }
    }

    /// Append a chunk, routing its first-chunk-only options (`executable`,
    /// `session`, `jupyter_kernel`, ...) into session fields -- grounded on
    /// `CodeCollection.append`.
    pub fn push(&mut self, mut chunk: CodeChunk) {
        let is_first = self.chunks.is_empty();
        if is_first {
            if let Some(OptionValue::Str(s)) = chunk.options.get("executable") {
                self.executable = s.clone();
            }
            if let Some(OptionValue::Str(s)) = chunk.options.get("executable_opts") {
                self.executable_opts = Some(shlex::split(s).unwrap_or_else(|| vec![s.clone()]));
            }
            if let Some(OptionValue::Str(s)) = chunk.options.get("args") {
                self.args = Some(shlex::split(s).unwrap_or_else(|| vec![s.clone()]));
            }
            if let Some(OptionValue::Str(s)) = chunk.options.get("jupyter_kernel") {
                self.jupyter_kernel = Some(s.clone());
            }
            if let Some(OptionValue::Int(n)) = chunk.options.get("jupyter_timeout") {
                self.jupyter_timeout = *n as f64;
            }
            if let Some(OptionValue::Bool(b)) = chunk.options.get("live_output") {
                self.live_output = *b;
            }
            if let Some(OptionValue::Str(s)) = chunk.options.get("session") {
                self.name = Some(s.clone());
            }
        } else {
            for key in ["executable", "executable_opts", "args", "jupyter_kernel", "jupyter_timeout", "save", "save_as", "live_output"] {
                if chunk.options.first_chunk_options.contains_key(key) {
                    self.errors.push(Message::new(
                        MessageKind::SourceError,
                        format!("Option \"{key}\" is only allowed on a session's first code chunk"),
                    ));
                }
            }
        }
        if self.executable.is_empty() {
            if let Some(lang) = &self.key.lang {
                self.executable = lang.clone();
            }
        }
        chunk.index = Some(self.chunks.len());
        chunk.key = Some(self.key.clone());
        self.chunks.push(chunk);
    }

    pub fn set_language(&mut self, lang: Arc<LanguageDef>) {
        if self.executable.is_empty() || self.key.lang.as_deref() == Some(lang.language.as_str()) {
            self.executable = lang.executable.clone();
        }
        self.language = Some(lang);
    }

    /// Run the finalisation passes described in spec §4.E: resolve
    /// `outside_main` regions, assign `output_index`, assign
    /// `code_start_line_number`, roll up status, and (absent a
    /// `prevent_exec` error) compute the session hash.
    pub fn finalize(&mut self) {
        self.assign_output_index();
        self.assign_code_start_line_numbers();
        self.roll_up_status();
        if self.status.prevent_exec {
            self.needs_exec = true;
            return;
        }
        self.compute_hash();
    }

    fn assign_output_index(&mut self) {
        let n = self.chunks.len();
        if n == 0 {
            return;
        }
        let mut in_outside = false;
        let mut outside_region_start = None;
        let mut transitions_in = 0u32;
        let mut transitions_out = 0u32;
        for i in 0..n {
            let outside = chunk_outside_main(&self.chunks[i]);
            if outside && !in_outside {
                transitions_in += 1;
                outside_region_start = Some(i);
                in_outside = true;
            } else if !outside && in_outside {
                transitions_out += 1;
                in_outside = false;
                let last_idx = i - 1;
                if let Some(start) = outside_region_start {
                    for j in start..=last_idx {
                        self.chunks[j].output_index = Some(last_idx);
                    }
                }
            }
        }
        if in_outside {
            if let Some(start) = outside_region_start {
                let last_idx = n - 1;
                for j in start..=last_idx {
                    self.chunks[j].output_index = Some(last_idx);
                }
            }
        }
        if transitions_in > 1 || transitions_out > 1 {
            self.errors.push(Message::new(
                MessageKind::SourceError,
                "\"outside_main\" may only be entered and exited once per session".to_string(),
            ));
        }

        let mut pending: Vec<usize> = Vec::new();
        for i in 0..n {
            if self.chunks[i].output_index.is_some() {
                continue;
            }
            if chunk_complete(&self.chunks[i]) {
                self.chunks[i].output_index = Some(i);
                for &j in &pending {
                    self.chunks[j].output_index = Some(i);
                }
                pending.clear();
            } else {
                pending.push(i);
            }
        }
        if !pending.is_empty() {
            self.errors.push(Message::new(
                MessageKind::RuntimeSourceError,
                "The final code chunk in a session must be a complete unit of code".to_string(),
            ));
            if let Some(&last) = pending.last() {
                for &j in &pending {
                    self.chunks[j].output_index = Some(last);
                }
            }
        }
    }

    fn assign_code_start_line_numbers(&mut self) {
        let mut line = 1u32;
        for chunk in self.chunks.iter_mut() {
            chunk.code_start_line_number = line;
            line += chunk.code_lines.len().max(1) as u32;
        }
    }

    fn roll_up_status(&mut self) {
        self.status = CodeStatus::default();
        for chunk in &self.chunks {
            chunk.errors.register_status(&mut self.status);
            chunk.warnings.register_status(&mut self.status);
        }
        self.errors.register_status(&mut self.status);
        self.warnings.register_status(&mut self.status);
    }

    /// Re-roll `status` after execution has attached runtime errors/warnings
    /// (`RunError`, `StderrRunError`, `DecodeError`, ...) that didn't exist
    /// when `finalize` last computed it -- grounded on spec §7's rollup bits
    /// feeding the exit code and cache-write gating, which must reflect what
    /// actually happened during the run, not just the pre-execution shape.
    pub fn refresh_status(&mut self) {
        self.roll_up_status();
    }

    /// `BLAKE2b` over canonical JSON identity + language-def bytes + every
    /// chunk's `{command, inline, complete}` and code -- grounded on
    /// `CodeCollection._hash`.
    fn compute_hash(&mut self) {
        let mut h = RollingHash::new();
        if let Some(kernel) = &self.jupyter_kernel {
            h.fold(&identity_json_jupyter(self.name.as_deref(), kernel, self.jupyter_timeout));
        } else {
            h.fold(&identity_json_subprocess(
                self.name.as_deref(),
                &self.executable,
                self.executable_opts.as_deref(),
                self.args.as_deref(),
            ));
        }
        if let Some(lang) = &self.language {
            h.fold(format!("{lang:?}").as_bytes());
        }
        for chunk in &self.chunks {
            let complete = chunk_complete(chunk);
            fold_chunk(&mut h, chunk, complete);
        }
        let hash = h.finish();
        let (hash_root, run_delim_hash) = split_hash(&hash);
        self.hash = Some(hash);
        self.hash_root = Some(hash_root);
        self.run_delim_hash = Some(run_delim_hash);
    }

    /// Synthesize (and cache) the session's run program. Only valid for
    /// subprocess-executed sessions; Jupyter sessions send each chunk's code
    /// directly to the kernel instead (see `codebraid-jupyter`).
    pub fn run_program(&mut self) -> Option<&RunProgram> {
        if self.run_program.is_none() {
            let lang = self.language.clone()?;
            let built = synthesize(self, &lang);
            self.run_program = Some(built);
        }
        self.run_program.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebraid_chunk::{CodeChunk, CollectionKind};
    use std::collections::HashMap;

    fn session() -> Session {
        let key = CodeKey::new(Some("python".to_string()), None, CollectionKind::Session, None);
        Session::new(key)
    }

    #[test]
    fn output_index_backfills_incomplete_run() {
        let mut s = session();
        let mut c1 = CodeChunk::new(Some("nb"), vec!["x = 1".to_string()], HashMap::new(), None, None, false);
        c1.options.insert("complete", OptionValue::Bool(false));
        let c2 = CodeChunk::new(Some("nb"), vec!["print(x)".to_string()], HashMap::new(), None, None, false);
        s.push(c1);
        s.push(c2);
        s.finalize();
        assert_eq!(s.chunks[0].output_index, Some(1));
        assert_eq!(s.chunks[1].output_index, Some(1));
    }

    #[test]
    fn hash_changes_when_code_changes() {
        let mut a = session();
        a.push(CodeChunk::new(Some("nb"), vec!["x = 1".to_string()], HashMap::new(), None, None, false));
        a.finalize();

        let mut b = session();
        b.push(CodeChunk::new(Some("nb"), vec!["x = 2".to_string()], HashMap::new(), None, None, false));
        b.finalize();

        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn hash_root_is_sixteen_hex_chars() {
        let mut s = session();
        s.push(CodeChunk::new(Some("nb"), vec!["x = 1".to_string()], HashMap::new(), None, None, false));
        s.finalize();
        assert_eq!(s.hash_root.unwrap().len(), 16);
    }
}
