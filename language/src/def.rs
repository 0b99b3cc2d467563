use crate::template::{check_template, split_template, TemplateError};
use regex::Regex;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LanguageError {
    #[error("invalid language definition for \"{name}\": {reason}")]
    Invalid { name: String, reason: String },
    #[error("invalid template in language definition for \"{name}\": {0}", name = .1)]
    Template(TemplateError, String),
    #[error("invalid line number pattern in language definition for \"{0}\": {1}")]
    LineNumberPattern(String, regex::Error),
}

/// One stage of a session's execution pipeline, in the order they run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecStage {
    Compile,
    PreRun,
    Run,
    PostRun,
}

impl ExecStage {
    pub const fn name(&self) -> &'static str {
        match self {
            ExecStage::Compile => "compile",
            ExecStage::PreRun => "pre_run",
            ExecStage::Run => "run",
            ExecStage::PostRun => "post_run",
        }
    }
}

/// A fully validated, defaults-applied language definition -- grounded on
/// `Language` (`language.py`). Construction performs the same checks the
/// original runs at class-creation time (templates are plain-keyword-only,
/// `{code}` appears exactly once and alone on its own line, etc.), so by the
/// time a `LanguageDef` exists its templates are known renderable.
#[derive(Debug, Clone)]
pub struct LanguageDef {
    pub name: String,
    pub language: String,
    pub executable: String,
    pub executable_opts: Option<Vec<String>>,
    pub args: Option<Vec<String>>,
    pub extension: String,

    pub compile_encoding: Option<String>,
    pub compile_commands: Vec<String>,
    pub pre_run_encoding: Option<String>,
    pub pre_run_commands: Vec<String>,
    pub run_encoding: Option<String>,
    pub run_command: String,
    pub post_run_encoding: Option<String>,
    pub post_run_commands: Vec<String>,

    pub repl: bool,
    pub interpreter_script: Option<&'static str>,

    pub run_template_before_code: String,
    pub run_template_after_code: String,
    pub run_template_before_code_n_lines: usize,
    pub run_template_after_code_n_lines: usize,

    pub chunk_wrapper_before_code: String,
    pub chunk_wrapper_after_code: String,
    pub chunk_wrapper_before_code_n_lines: usize,
    pub chunk_wrapper_after_code_n_lines: usize,
    pub chunk_wrapper_code_indent: String,

    pub inline_expression_formatter: Option<String>,
    pub inline_expression_formatter_n_lines: Option<usize>,
    pub inline_expression_formatter_before_code_n_lines: Option<usize>,

    pub error_patterns: Vec<String>,
    pub warning_patterns: Vec<String>,
    pub line_number_pattern_re: Option<Regex>,
    pub line_number_regex_re: Option<Regex>,

    pub exec_stages: Vec<ExecStage>,
}

/// Inputs a language registry entry supplies; every field has the same
/// default-substitution behavior as the corresponding `definition.pop(...)`
/// call in the original.
pub struct LanguageSpec {
    pub name: &'static str,
    pub language: Option<&'static str>,
    pub executable: Option<&'static str>,
    pub executable_opts: Option<&'static [&'static str]>,
    pub args: Option<&'static [&'static str]>,
    pub extension: &'static str,
    pub compile_commands: &'static [&'static str],
    pub pre_run_commands: &'static [&'static str],
    pub run_command: Option<&'static str>,
    pub post_run_commands: &'static [&'static str],
    pub repl: Option<bool>,
    pub interpreter_script: Option<&'static str>,
    pub run_template: Option<&'static str>,
    pub chunk_wrapper: Option<&'static str>,
    pub inline_expression_formatter: Option<&'static str>,
    pub error_patterns: Option<&'static [&'static str]>,
    pub warning_patterns: Option<&'static [&'static str]>,
    pub line_number_patterns: Option<&'static [&'static str]>,
    pub line_number_regex: Option<&'static str>,
}

const DEFAULT_ERROR_PATTERNS: &[&str] = &["error", "Error", "ERROR"];
const DEFAULT_WARNING_PATTERNS: &[&str] = &["warning", "Warning", "WARNING"];
const DEFAULT_LINE_NUMBER_PATTERNS: &[&str] = &[":{number}", "line {number}"];

fn split_lines_no_trailing_empty(s: &str) -> Vec<String> {
    codebraid_utils::splitlines_lf(s, false)
}

/// Split `before`/`after` template halves as the original does once more,
/// inheriting indentation from the run template and rejecting wrappers that
/// bring their own indentation.
fn fold_wrapper_half(half: &str, indent: &str, name: &str) -> Result<(String, usize), LanguageError> {
    let lines = split_lines_no_trailing_empty(half);
    if lines.iter().all(|l| l.is_empty() || l.starts_with(' ') || l.starts_with('\t')) {
        return Err(LanguageError::Invalid {
            name: name.to_string(),
            reason: "chunk wrapper template must not be indented; indentation is inherited from run template".to_string(),
        });
    }
    let n_lines = lines.len();
    let folded: String = lines.iter().map(|l| format!("{indent}{l}\n")).collect();
    Ok((folded, n_lines))
}

impl LanguageDef {
    pub fn build(spec: LanguageSpec) -> Result<LanguageDef, LanguageError> {
        let name = spec.name.to_string();
        let name_root = name.strip_suffix("_repl").unwrap_or(&name).to_string();

        let language = spec.language.unwrap_or(&name_root).to_string();
        let executable = spec.executable.unwrap_or(&name_root).to_string();
        let executable_opts = spec.executable_opts.map(|o| o.iter().map(|s| s.to_string()).collect());
        let args = spec.args.map(|a| a.iter().map(|s| s.to_string()).collect());
        let extension = spec.extension.trim_start_matches('.').to_string();

        let compile_commands: Vec<String> = spec.compile_commands.iter().map(|s| s.to_string()).collect();
        let pre_run_commands: Vec<String> = spec.pre_run_commands.iter().map(|s| s.to_string()).collect();
        let post_run_commands: Vec<String> = spec.post_run_commands.iter().map(|s| s.to_string()).collect();
        let interpreter_script = spec.interpreter_script;
        let repl = spec.repl.unwrap_or_else(|| name.ends_with("_repl"));

        let run_command = spec.run_command.map(str::to_string).unwrap_or_else(|| {
            if interpreter_script.is_none() {
                "{executable} {executable_opts} {source} {args}".to_string()
            } else {
                "{executable} {run_script} {run_delim_start} {run_delim_hash} {buffering}".to_string()
            }
        });

        let run_template = spec.run_template.unwrap_or("{code}\n");
        if !run_template.ends_with('\n') {
            return Err(LanguageError::Invalid { name, reason: "run_template must end with a newline".to_string() });
        }
        check_template(run_template).map_err(|e| LanguageError::Template(e, name.clone()))?;
        let (before_code, after_code) =
            split_template(run_template, "code").map_err(|e| LanguageError::Template(e, name.clone()))?;
        let before_last_nl = before_code.rfind('\n');
        let (run_template_before_code, run_template_before_code_last_line) = match before_last_nl {
            None => (String::new(), before_code.clone()),
            Some(idx) => (before_code[..=idx].to_string(), before_code[idx + 1..].to_string()),
        };
        let after_first_nl = after_code
            .find('\n')
            .ok_or_else(|| LanguageError::Invalid { name: name.clone(), reason: "run_template must end with a newline".to_string() })?;
        let run_template_after_code = after_code[after_first_nl + 1..].to_string();
        let run_template_after_code_first_line = &after_code[..after_first_nl];
        if run_template_before_code_last_line.trim_matches([' ', '\t']).len() > 0
            || run_template_after_code_first_line.trim_matches([' ', '\t']).len() > 0
        {
            return Err(LanguageError::Invalid {
                name,
                reason: "in run template, \"{code}\" field must be on a line by itself".to_string(),
            });
        }
        let run_template_code_indent = run_template_before_code_last_line;
        let run_template_before_code_n_lines = run_template_before_code.matches('\n').count();
        let run_template_after_code_n_lines = run_template_after_code.matches('\n').count();

        let chunk_wrapper_default_non_repl = "{stdout_start_delim}\n{stderr_start_delim}\n{code}\n{stdout_end_delim}\n{stderr_end_delim}\n";
        let chunk_wrapper_default_repl = "{stdout_start_delim}\n{stderr_start_delim}\n{repl_start_delim}\n{code}\n{repl_end_delim}\n{stdout_end_delim}\n{stderr_end_delim}\n";
        let chunk_wrapper = spec.chunk_wrapper.unwrap_or(if interpreter_script.is_some() {
            if repl { chunk_wrapper_default_repl } else { chunk_wrapper_default_non_repl }
        } else {
            return Err(LanguageError::Invalid { name, reason: "chunk_wrapper is required when there is no interpreter_script".to_string() });
        });
        if !chunk_wrapper.ends_with('\n') {
            return Err(LanguageError::Invalid { name, reason: "chunk_wrapper must end with a newline".to_string() });
        }
        check_template(chunk_wrapper).map_err(|e| LanguageError::Template(e, name.clone()))?;
        let (wrap_before, wrap_after) =
            split_template(chunk_wrapper, "code").map_err(|e| LanguageError::Template(e, name.clone()))?;
        let wrap_before_last_nl = wrap_before.rfind('\n');
        let (wrap_before_trimmed, wrap_before_last_line) = match wrap_before_last_nl {
            None => (String::new(), String::new()),
            Some(idx) => (wrap_before[..=idx].to_string(), wrap_before[idx + 1..].to_string()),
        };
        let wrap_after_first_nl = wrap_after
            .find('\n')
            .ok_or_else(|| LanguageError::Invalid { name: name.clone(), reason: "chunk_wrapper must end with a newline".to_string() })?;
        let wrap_after_trimmed = wrap_after[wrap_after_first_nl + 1..].to_string();
        let wrap_after_first_line = &wrap_after[..wrap_after_first_nl];
        if wrap_before_last_line.trim_matches([' ', '\t']).len() > 0 || wrap_after_first_line.trim_matches([' ', '\t']).len() > 0 {
            return Err(LanguageError::Invalid {
                name,
                reason: "in chunk wrapper template, \"{code}\" field must be on a line by itself".to_string(),
            });
        }
        let chunk_wrapper_code_indent = format!("{run_template_code_indent}{wrap_before_last_line}");
        let (chunk_wrapper_before_code, chunk_wrapper_before_code_n_lines) =
            fold_wrapper_half(&wrap_before_trimmed, &run_template_code_indent, &name)?;
        let (chunk_wrapper_after_code, chunk_wrapper_after_code_n_lines) =
            fold_wrapper_half(&wrap_after_trimmed, &run_template_code_indent, &name)?;

        let inline_expression_formatter = match spec.inline_expression_formatter {
            None => None,
            Some(tmpl) => {
                if !tmpl.ends_with('\n') {
                    return Err(LanguageError::Invalid { name, reason: "inline_expression_formatter must end with a newline".to_string() });
                }
                check_template(tmpl).map_err(|e| LanguageError::Template(e, name.clone()))?;
                let (before, _) = split_template(tmpl, "code").map_err(|e| LanguageError::Template(e, name.clone()))?;
                Some((before.matches('\n').count(), tmpl))
            }
        };
        let (inline_expression_formatter, inline_expression_formatter_n_lines, inline_expression_formatter_before_code_n_lines) =
            match inline_expression_formatter {
                None => (None, None, None),
                Some((before_n_lines, tmpl)) => {
                    let (folded, n_lines) = fold_wrapper_half(tmpl, &chunk_wrapper_code_indent, &name)?;
                    (Some(folded), Some(n_lines), Some(before_n_lines))
                }
            };

        let error_patterns: Vec<String> = spec
            .error_patterns
            .unwrap_or(DEFAULT_ERROR_PATTERNS)
            .iter()
            .map(|s| s.to_string())
            .collect();
        let warning_patterns: Vec<String> = spec
            .warning_patterns
            .unwrap_or(DEFAULT_WARNING_PATTERNS)
            .iter()
            .map(|s| s.to_string())
            .collect();

        let line_number_raw_patterns = spec.line_number_patterns.unwrap_or(DEFAULT_LINE_NUMBER_PATTERNS);
        let line_number_pattern_re = if line_number_raw_patterns.is_empty() {
            None
        } else {
            let mut alternatives = Vec::new();
            for lnp in line_number_raw_patterns {
                let (before, after) =
                    split_template(lnp, "number").map_err(|e| LanguageError::Template(e, name.clone()))?;
                alternatives.push(format!("{}(\\d+){}", regex::escape(&before), regex::escape(&after)));
            }
            let pattern = alternatives.join("|");
            Some(Regex::new(&pattern).map_err(|e| LanguageError::LineNumberPattern(name.clone(), e))?)
        };
        let line_number_regex_re = match spec.line_number_regex {
            None => None,
            Some(pattern) => Some(
                Regex::new(&format!("(?m){pattern}")).map_err(|e| LanguageError::LineNumberPattern(name.clone(), e))?,
            ),
        };
        if line_number_pattern_re.is_none() && line_number_regex_re.is_none() {
            return Err(LanguageError::Invalid {
                name,
                reason: "must provide line_number_patterns or line_number_regex".to_string(),
            });
        }

        let mut exec_stages = Vec::new();
        if !compile_commands.is_empty() {
            exec_stages.push(ExecStage::Compile);
        }
        if !pre_run_commands.is_empty() {
            exec_stages.push(ExecStage::PreRun);
        }
        exec_stages.push(ExecStage::Run);
        if !post_run_commands.is_empty() {
            exec_stages.push(ExecStage::PostRun);
        }

        Ok(LanguageDef {
            name,
            language,
            executable,
            executable_opts,
            args,
            extension,
            compile_encoding: Some("utf-8".to_string()),
            compile_commands,
            pre_run_encoding: Some("utf-8".to_string()),
            pre_run_commands,
            run_encoding: Some("utf-8".to_string()),
            run_command,
            post_run_encoding: Some("utf-8".to_string()),
            post_run_commands,
            repl,
            interpreter_script,
            run_template_before_code,
            run_template_after_code,
            run_template_before_code_n_lines,
            run_template_after_code_n_lines,
            chunk_wrapper_before_code,
            chunk_wrapper_after_code,
            chunk_wrapper_before_code_n_lines,
            chunk_wrapper_after_code_n_lines,
            chunk_wrapper_code_indent,
            inline_expression_formatter,
            inline_expression_formatter_n_lines,
            inline_expression_formatter_before_code_n_lines,
            error_patterns,
            warning_patterns,
            line_number_pattern_re,
            line_number_regex_re,
            exec_stages,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python_spec() -> LanguageSpec {
        LanguageSpec {
            name: "python",
            language: None,
            executable: Some("python3"),
            executable_opts: None,
            args: None,
            extension: "py",
            compile_commands: &[],
            pre_run_commands: &[],
            run_command: None,
            post_run_commands: &[],
            repl: Some(false),
            interpreter_script: Some(crate::registry::PYTHON_REPL_SCRIPT),
            run_template: None,
            chunk_wrapper: Some(
                "{stdout_start_delim}\n{stderr_start_delim}\n{code}\n{stdout_end_delim}\n{stderr_end_delim}\n",
            ),
            inline_expression_formatter: None,
            error_patterns: None,
            warning_patterns: None,
            line_number_patterns: None,
            line_number_regex: None,
        }
    }

    #[test]
    fn builds_python_language_with_defaults() {
        let def = LanguageDef::build(python_spec()).unwrap();
        assert_eq!(def.executable, "python3");
        assert_eq!(def.extension, "py");
        assert_eq!(def.exec_stages, vec![ExecStage::Run]);
        assert!(def.line_number_pattern_re.is_some());
    }

    #[test]
    fn rejects_run_template_without_trailing_newline() {
        let mut spec = python_spec();
        spec.run_template = Some("{code}");
        assert!(LanguageDef::build(spec).is_err());
    }

    #[test]
    fn line_number_pattern_matches_default_forms() {
        let def = LanguageDef::build(python_spec()).unwrap();
        let re = def.line_number_pattern_re.unwrap();
        let caps = re.captures("File \"chunk.py\", line 12").unwrap();
        assert!(caps.iter().flatten().any(|m| m.as_str() == "12"));
    }
}
