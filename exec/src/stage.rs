use codebraid_language::{render_template, LanguageDef};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StageError {
    #[error("command template produced no tokens: \"{0}\"")]
    Empty(String),
    #[error("could not tokenize command line \"{0}\"")]
    Tokenize(String),
    #[error(transparent)]
    Template(#[from] codebraid_language::TemplateError),
}

/// The dict every exec-stage command template is filled from -- grounded on
/// spec §4.G's `{executable, extension, run_delim_start, run_delim_hash,
/// source, source_name, source_dir, source_without_extension, run_script,
/// buffering, executable_opts, args}`.
pub struct StageVars {
    pub executable: String,
    pub extension: String,
    pub run_delim_start: String,
    pub run_delim_hash: String,
    pub source: String,
    pub source_name: String,
    pub source_dir: String,
    pub source_without_extension: String,
    pub run_script: String,
    pub buffering: String,
    pub executable_opts: String,
    pub args: String,
}

/// Shell-quote and join a list of already-split words so they can be spliced
/// back into a template string and re-tokenized by [`build_command_line`].
fn quote_join(words: &[String]) -> String {
    words
        .iter()
        .map(|w| {
            if !w.is_empty() && w.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=')) {
                w.clone()
            } else {
                format!("'{}'", w.replace('\'', "'\\''"))
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl StageVars {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        lang: &LanguageDef,
        run_delim_hash: &str,
        source_path: &Path,
        run_script_path: Option<&Path>,
        executable_opts: &[String],
        args: &[String],
    ) -> StageVars {
        let source = source_path.to_string_lossy().into_owned();
        let source_name = source_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let source_dir = source_path.parent().map(|p| p.to_string_lossy().into_owned()).unwrap_or_default();
        let source_without_extension = source_path.with_extension("").to_string_lossy().into_owned();
        StageVars {
            executable: lang.executable.clone(),
            extension: lang.extension.clone(),
            run_delim_start: crate::reader::DELIM_PREFIX.to_string(),
            run_delim_hash: run_delim_hash.to_string(),
            source,
            source_name,
            source_dir,
            source_without_extension,
            run_script: run_script_path.map(|p| p.to_string_lossy().into_owned()).unwrap_or_default(),
            buffering: "line".to_string(),
            executable_opts: quote_join(executable_opts),
            args: quote_join(args),
        }
    }

    fn as_map(&self) -> HashMap<&'static str, String> {
        let mut m = HashMap::new();
        m.insert("executable", self.executable.clone());
        m.insert("extension", self.extension.clone());
        m.insert("run_delim_start", self.run_delim_start.clone());
        m.insert("run_delim_hash", self.run_delim_hash.clone());
        m.insert("source", self.source.clone());
        m.insert("source_name", self.source_name.clone());
        m.insert("source_dir", self.source_dir.clone());
        m.insert("source_without_extension", self.source_without_extension.clone());
        m.insert("run_script", self.run_script.clone());
        m.insert("buffering", self.buffering.clone());
        m.insert("executable_opts", self.executable_opts.clone());
        m.insert("args", self.args.clone());
        m
    }
}

/// Render a single command template and tokenize the result into an argv --
/// `{executable_opts}`/`{args}` expand inline since they're pre-joined into
/// a shell-quoted string by [`StageVars::new`]; every other field is a
/// plain string substitution.
pub fn build_command_line(template: &str, vars: &StageVars) -> Result<Vec<String>, StageError> {
    let rendered = render_template(template, &vars.as_map())?;
    let argv = shlex::split(&rendered).ok_or_else(|| StageError::Tokenize(rendered.clone()))?;
    if argv.is_empty() {
        return Err(StageError::Empty(template.to_string()));
    }
    Ok(argv)
}

/// Build the ordered list of argvs for one stage's command templates.
pub fn build_stage_commands(templates: &[String], vars: &StageVars) -> Result<Vec<Vec<String>>, StageError> {
    templates.iter().map(|t| build_command_line(t, vars)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebraid_language::REGISTRY;
    use std::path::PathBuf;

    #[test]
    fn run_command_renders_with_executable_and_source() {
        let lang = REGISTRY.get("python").unwrap();
        let vars = StageVars::new(&lang, "deadbeef", &PathBuf::from("/tmp/source_abc.py"), None, &[], &[]);
        let argv = build_command_line(&lang.run_command, &vars).unwrap();
        assert_eq!(argv[0], "python3");
        assert!(argv.contains(&"/tmp/source_abc.py".to_string()));
    }

    #[test]
    fn executable_opts_and_args_expand_inline() {
        let lang = REGISTRY.get("python").unwrap();
        let opts = vec!["-O".to_string()];
        let args = vec!["--flag".to_string(), "value with spaces".to_string()];
        let vars = StageVars::new(&lang, "h", &PathBuf::from("/tmp/s.py"), None, &opts, &args);
        let argv = build_command_line(&lang.run_command, &vars).unwrap();
        assert!(argv.contains(&"-O".to_string()));
        assert!(argv.contains(&"value with spaces".to_string()));
    }
}
