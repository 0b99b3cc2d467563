use crate::session::Session;
use codebraid_language::{render_template, LanguageDef};
use std::collections::HashMap;

/// The single string synthesized from templates and chunk code, handed to
/// the interpreter or compiler -- grounded on `CodeCollection.run_code`
/// (`code_collections.py`) and its accompanying `run_code_to_origins` /
/// `expected_*_delim_chunks` side tables, built in one pass over the
/// session's chunks per the spec's §4.E' algorithm.
#[derive(Debug, Default, Clone)]
pub struct RunProgram {
    pub code: String,
    /// 0-based generated-program line -> (chunk index, 1-based user line).
    pub run_code_to_origins: HashMap<usize, (usize, usize)>,
    pub expected_stdout_start_delim_chunks: HashMap<usize, u32>,
    pub expected_stdout_end_delim_chunks: HashMap<usize, u32>,
    pub expected_stderr_start_delim_chunks: HashMap<usize, u32>,
    pub expected_stderr_end_delim_chunks: HashMap<usize, u32>,
}

/// In-band framing marker emitted on a child process's stdout/stderr --
/// grounded on the literal form given in spec §4.E'/§6.
pub fn delimiter(output: &str, delim: &str, chunk: usize, output_chunk: usize, hash: &str) -> String {
    format!("#Codebraid(output={output}, delim={delim}, chunk={chunk}, output_chunk={output_chunk}, hash={hash})")
}

struct Builder<'a> {
    lang: &'a LanguageDef,
    run_delim_hash: &'a str,
    temp_suffix: &'a str,
    out: String,
    line: usize,
    prog: RunProgram,
}

impl<'a> Builder<'a> {
    fn emit_raw(&mut self, text: &str) {
        self.out.push_str(text);
        self.line += text.matches('\n').count();
    }

    fn delim_vars(&self, chunk: usize, output_chunk: usize) -> HashMap<&'static str, String> {
        let d = |output: &str, kind: &str| delimiter(output, kind, chunk, output_chunk, self.run_delim_hash);
        let mut vars = HashMap::new();
        vars.insert("stdout_start_delim", d("stdout", "start"));
        vars.insert("stdout_end_delim", d("stdout", "end"));
        vars.insert("stderr_start_delim", d("stderr", "start"));
        vars.insert("stderr_end_delim", d("stderr", "end"));
        vars.insert("repl_start_delim", d("repl", "start"));
        vars.insert("repl_end_delim", d("repl", "end"));
        vars
    }

    fn record_start(&mut self, output: &str, chunk: usize) {
        let map = match output {
            "stdout" => &mut self.prog.expected_stdout_start_delim_chunks,
            "stderr" => &mut self.prog.expected_stderr_start_delim_chunks,
            _ => return,
        };
        *map.entry(chunk).or_insert(0) += 1;
    }

    fn record_end(&mut self, output: &str, chunk: usize) {
        let map = match output {
            "stdout" => &mut self.prog.expected_stdout_end_delim_chunks,
            "stderr" => &mut self.prog.expected_stderr_end_delim_chunks,
            _ => return,
        };
        *map.entry(chunk).or_insert(0) += 1;
    }

    fn emit_wrapper_before(&mut self, chunk: usize, output_chunk: usize) {
        let vars = self.delim_vars(chunk, output_chunk);
        let rendered = render_template(&self.lang.chunk_wrapper_before_code, &vars).unwrap_or_default();
        self.record_start("stdout", chunk);
        self.record_start("stderr", chunk);
        self.emit_raw(&rendered);
    }

    fn emit_wrapper_after(&mut self, chunk: usize, output_chunk: usize) {
        let vars = self.delim_vars(chunk, output_chunk);
        let rendered = render_template(&self.lang.chunk_wrapper_after_code, &vars).unwrap_or_default();
        self.record_end("stdout", chunk);
        self.record_end("stderr", chunk);
        self.emit_raw(&rendered);
    }
}

fn is_outside(chunk: &codebraid_chunk::CodeChunk) -> bool {
    chunk
        .options
        .get("outside_main")
        .and_then(codebraid_chunk::OptionValue::as_bool)
        .unwrap_or(false)
}

fn is_complete(chunk: &codebraid_chunk::CodeChunk) -> bool {
    chunk
        .options
        .get("complete")
        .and_then(codebraid_chunk::OptionValue::as_bool)
        .unwrap_or(false)
}

/// Build the run program for a subprocess-executed session. `lang` and
/// `run_delim_hash`/`temp_suffix` are taken from the session rather than
/// read through `&Session` directly so this can also be exercised from
/// tests without a fully wired-up `Session`.
pub fn synthesize(session: &Session, lang: &LanguageDef) -> RunProgram {
    let run_delim_hash = session.run_delim_hash.as_deref().unwrap_or("");
    let mut b = Builder {
        lang,
        run_delim_hash,
        temp_suffix: &session.temp_suffix,
        out: String::new(),
        line: 0,
        prog: RunProgram::default(),
    };

    let n = session.chunks.len();
    if n == 0 {
        return b.prog;
    }

    if !is_outside(&session.chunks[0]) {
        b.emit_raw(&lang.run_template_before_code);
    }

    for i in 0..n {
        if i > 0 {
            let prev = &session.chunks[i - 1];
            let crossing_out = is_outside(prev) && !is_outside(&session.chunks[i]);
            if is_complete(prev) || crossing_out {
                let boundary = prev.output_index.unwrap_or(i - 1);
                b.emit_wrapper_after(boundary, boundary);
            }
        }
        let starts_new_unit = i == 0
            || is_complete(&session.chunks[i - 1])
            || (is_outside(&session.chunks[i - 1]) && !is_outside(&session.chunks[i]));
        if starts_new_unit {
            let boundary = session.chunks[i].output_index.unwrap_or(i);
            b.emit_wrapper_before(boundary, boundary);
        }

        let chunk = &session.chunks[i];
        if chunk.inline && chunk.is_expr {
            if let (Some(formatter), Some(before_n)) =
                (&lang.inline_expression_formatter, lang.inline_expression_formatter_before_code_n_lines)
            {
                let code_line = chunk.code_lines.first().cloned().unwrap_or_default();
                let mut vars = b.delim_vars(i, i);
                vars.insert("code", code_line);
                vars.insert("temp_suffix", b.temp_suffix.to_string());
                let rendered = render_template(formatter, &vars).unwrap_or_default();
                let fragment_start_line = b.line;
                b.emit_raw(&rendered);
                b.prog.run_code_to_origins.insert(fragment_start_line + before_n, (i, 1));
            }
        } else if chunk.inline {
            let code_line = chunk.code_lines.first().cloned().unwrap_or_default();
            let indented = format!("{}{}\n", lang.chunk_wrapper_code_indent, code_line);
            let line = b.line;
            b.emit_raw(&indented);
            b.prog.run_code_to_origins.insert(line, (i, 1));
        } else {
            for (user_line, code_line) in chunk.code_lines.iter().enumerate() {
                let indented = format!("{}{}\n", lang.chunk_wrapper_code_indent, code_line);
                let line = b.line;
                b.emit_raw(&indented);
                b.prog.run_code_to_origins.insert(line, (i, user_line + 1));
            }
        }
    }

    let last = &session.chunks[n - 1];
    if is_complete(last) {
        let boundary = last.output_index.unwrap_or(n - 1);
        b.emit_wrapper_after(boundary, boundary);
    }
    if !is_outside(last) {
        b.emit_raw(&lang.run_template_after_code);
    }

    b.prog.code = b.out;
    b.prog
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use codebraid_chunk::{CodeChunk, CodeKey, CollectionKind};
    use codebraid_language::REGISTRY;
    use std::collections::HashMap as StdHashMap;

    fn python_session(chunks: Vec<CodeChunk>) -> Session {
        let key = CodeKey::new(Some("python".to_string()), None, CollectionKind::Session, None);
        let mut s = Session::new(key);
        for c in chunks {
            s.push(c);
        }
        s.finalize();
        s
    }

    #[test]
    fn two_complete_chunks_each_get_their_own_wrapper() {
        let c1 = CodeChunk::new(Some("nb"), vec!["print(\"hi\")".to_string()], StdHashMap::new(), None, None, false);
        let c2 = CodeChunk::new(Some("nb"), vec!["print(\"ok\")".to_string()], StdHashMap::new(), None, None, false);
        let session = python_session(vec![c1, c2]);
        let lang = REGISTRY.get("python").unwrap();
        let prog = synthesize(&session, &lang);
        assert_eq!(prog.expected_stdout_start_delim_chunks.get(&0), Some(&1));
        assert_eq!(prog.expected_stdout_start_delim_chunks.get(&1), Some(&1));
        assert!(prog.code.contains("print(\"hi\")"));
        assert!(prog.code.contains("print(\"ok\")"));
    }

    #[test]
    fn incomplete_chunk_joins_the_next_complete_boundary() {
        let mut c1 = CodeChunk::new(Some("nb"), vec!["x = 1".to_string()], StdHashMap::new(), None, None, false);
        c1.options.insert("complete", codebraid_chunk::OptionValue::Bool(false));
        let c2 = CodeChunk::new(Some("nb"), vec!["print(x + 1)".to_string()], StdHashMap::new(), None, None, false);
        let session = python_session(vec![c1, c2]);
        assert_eq!(session.chunks[0].output_index, Some(1));
        assert_eq!(session.chunks[1].output_index, Some(1));
        let lang = REGISTRY.get("python").unwrap();
        let prog = synthesize(&session, &lang);
        // Only one wrapped unit across both chunks: exactly one start per stream.
        assert_eq!(prog.expected_stdout_start_delim_chunks.values().sum::<u32>(), 1);
        assert_eq!(prog.expected_stdout_end_delim_chunks.values().sum::<u32>(), 1);
    }

    #[test]
    fn run_code_to_origins_maps_every_emitted_code_line() {
        let c1 = CodeChunk::new(Some("nb"), vec!["a = 1".to_string(), "b = 2".to_string()], StdHashMap::new(), None, None, false);
        let session = python_session(vec![c1]);
        let lang = REGISTRY.get("python").unwrap();
        let prog = synthesize(&session, &lang);
        let origins: Vec<_> = prog.run_code_to_origins.values().collect();
        assert!(origins.contains(&&(0usize, 1usize)));
        assert!(origins.contains(&&(0usize, 2usize)));
    }
}
