use codebraid_collections::RunProgram;
use codebraid_language::LanguageDef;
use std::path::Path;

/// Rewrite one block of raw stage output (stderr from the run stage, or the
/// combined stdout+stderr of a compile/pre_run/post_run stage) in place --
/// grounded on spec §4.G's stderr/compile rewriter.
///
/// `active_chunk` is the chunk currently open on the stream the text came
/// from (`None` for template-level output). Returns the rewritten text plus
/// whether an error/warning pattern was newly seen in it.
pub struct RewriteResult {
    pub text: String,
    pub matched_error: bool,
    pub matched_warning: bool,
}

fn sanitize_home(text: &str) -> String {
    match dirs::home_dir() {
        Some(home) => {
            let home = home.to_string_lossy();
            if home.is_empty() {
                text.to_string()
            } else {
                text.replace(home.as_ref(), "~")
            }
        }
        None => text.to_string(),
    }
}

fn scan_patterns(text: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| text.contains(p.as_str()))
}

/// Translate every generated-program line number referenced by `lang`'s
/// line-number patterns/regex through `run_code_to_origins`, falling back to
/// `[N]` for a line with no known origin (template-level output, typically).
fn translate_line_numbers(text: &str, lang: &LanguageDef, origins: &std::collections::HashMap<usize, (usize, usize)>) -> String {
    let mut out = text.to_string();
    if let Some(re) = &lang.line_number_pattern_re {
        out = re
            .replace_all(&out, |caps: &regex::Captures| {
                let n = caps.iter().skip(1).flatten().find_map(|m| m.as_str().parse::<usize>().ok());
                rewrite_line_capture(caps.get(0).map(|m| m.as_str()).unwrap_or(""), n, origins)
            })
            .into_owned();
    }
    if let Some(re) = &lang.line_number_regex_re {
        out = re
            .replace_all(&out, |caps: &regex::Captures| {
                let n = caps.iter().skip(1).flatten().find_map(|m| m.as_str().parse::<usize>().ok());
                rewrite_line_capture(caps.get(0).map(|m| m.as_str()).unwrap_or(""), n, origins)
            })
            .into_owned();
    }
    out
}

fn rewrite_line_capture(whole: &str, generated_line: Option<usize>, origins: &std::collections::HashMap<usize, (usize, usize)>) -> String {
    let Some(n) = generated_line else {
        return "[]".to_string();
    };
    match origins.get(&n.saturating_sub(1)) {
        Some((_, user_line)) => whole.replacen(&n.to_string(), &user_line.to_string(), 1),
        None => format!("[{n}]"),
    }
}

/// `source_path` names the on-disk generated file to substitute with
/// `source.<ext>` (block code) or `<string>` (inline), per spec §4.G.
/// `None` when the stage has no generated-source file at all (an
/// interpreter-script language streaming code over stdin, or template-level
/// output with nothing to anchor a path substitution to) -- in that case
/// only line-number translation, home-sanitization, and pattern scanning
/// run. `program` supplies `run_code_to_origins` for line-number
/// translation; pass `None` when the output came from a stage that has no
/// generated-program line numbering at all (compile output for a language
/// with a literal fixed compiler invocation still benefits from
/// home-sanitization and pattern scanning only).
pub fn rewrite_output(raw: &str, lang: &LanguageDef, program: Option<&RunProgram>, source_path: Option<&Path>, inline: bool) -> RewriteResult {
    let source_str = source_path.map(|p| p.to_string_lossy().into_owned());
    let references_source = source_str.as_deref().is_some_and(|s| !s.is_empty() && raw.contains(s));
    let has_line_number_match = lang.line_number_pattern_re.as_ref().is_some_and(|r| r.is_match(raw)) || lang.line_number_regex_re.as_ref().is_some_and(|r| r.is_match(raw));

    let text = if !references_source && !has_line_number_match {
        sanitize_home(raw)
    } else {
        let replaced = match (&source_str, references_source) {
            (Some(s), true) => {
                let display = if inline { "<string>".to_string() } else { format!("source.{}", lang.extension) };
                raw.replace(s.as_str(), &display)
            }
            _ => raw.to_string(),
        };
        let translated = match program {
            Some(p) => translate_line_numbers(&replaced, lang, &p.run_code_to_origins),
            None => replaced,
        };
        sanitize_home(&translated)
    };

    let matched_error = scan_patterns(&text, &lang.error_patterns);
    let matched_warning = !matched_error && scan_patterns(&text, &lang.warning_patterns);
    RewriteResult { text, matched_error, matched_warning }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebraid_language::REGISTRY;
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn plain_stderr_without_source_reference_is_only_pattern_scanned() {
        let lang = REGISTRY.get("python").unwrap();
        let result = rewrite_output("a plain Error occurred\n", &lang, None, Some(&PathBuf::from("/tmp/source_abc.py")), false);
        assert!(result.matched_error);
        assert_eq!(result.text, "a plain Error occurred\n");
    }

    #[test]
    fn source_path_is_replaced_with_short_name_for_block_code() {
        let lang = REGISTRY.get("python").unwrap();
        let raw = "Traceback:\n  File \"/tmp/source_abc.py\", line 3, in <module>\nValueError\n";
        let result = rewrite_output(raw, &lang, None, Some(&PathBuf::from("/tmp/source_abc.py")), false);
        assert!(result.text.contains("source.py"));
        assert!(!result.text.contains("/tmp/source_abc.py"));
    }

    #[test]
    fn generated_line_number_is_translated_via_origins() {
        let lang = REGISTRY.get("python").unwrap();
        let mut origins = HashMap::new();
        origins.insert(4usize, (0usize, 42usize));
        let program = RunProgram { run_code_to_origins: origins, ..Default::default() };
        let raw = "File \"/tmp/source_abc.py\", line 5, in <module>\n";
        let result = rewrite_output(raw, &lang, Some(&program), Some(&PathBuf::from("/tmp/source_abc.py")), false);
        assert!(result.text.contains("line 42"), "{}", result.text);
    }
}
