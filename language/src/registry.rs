use crate::def::{LanguageDef, LanguageError, LanguageSpec};
use codebraid_utils::KeyedCache;
use once_cell::sync::Lazy;

/// Bundled with the crate and written to the interpreter's scratch directory
/// the first time a REPL-mode Python session is started -- grounded on
/// `languages/scripts/python_repl.py`, loaded there via `pkgutil.get_data`.
pub const PYTHON_REPL_SCRIPT: &str = include_str!("../resources/scripts/python_repl.py");

fn build(name: &str) -> Result<LanguageDef, LanguageError> {
    match name {
        "python" => LanguageDef::build(LanguageSpec {
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
            interpreter_script: None,
            run_template: None,
            chunk_wrapper: Some(
                "{stdout_start_delim}\n{stderr_start_delim}\n{code}\n{stdout_end_delim}\n{stderr_end_delim}\n",
            ),
            inline_expression_formatter: Some("print(repr({code}))\n"),
            error_patterns: None,
            warning_patterns: None,
            line_number_patterns: None,
            line_number_regex: None,
        }),
        "python_repl" => LanguageDef::build(LanguageSpec {
            name: "python_repl",
            language: Some("python"),
            executable: Some("python3"),
            executable_opts: None,
            args: None,
            extension: "py",
            compile_commands: &[],
            pre_run_commands: &[],
            run_command: None,
            post_run_commands: &[],
            repl: Some(true),
            interpreter_script: Some(PYTHON_REPL_SCRIPT),
            run_template: None,
            chunk_wrapper: None,
            inline_expression_formatter: None,
            error_patterns: None,
            warning_patterns: None,
            line_number_patterns: None,
            line_number_regex: None,
        }),
        "bash" => LanguageDef::build(LanguageSpec {
            name: "bash",
            language: None,
            executable: Some("bash"),
            executable_opts: None,
            args: None,
            extension: "sh",
            compile_commands: &[],
            pre_run_commands: &[],
            run_command: None,
            post_run_commands: &[],
            repl: Some(false),
            interpreter_script: None,
            run_template: None,
            chunk_wrapper: Some(
                "{stdout_start_delim}\n{stderr_start_delim}\n{code}\n{stdout_end_delim}\n{stderr_end_delim}\n",
            ),
            inline_expression_formatter: None,
            error_patterns: None,
            warning_patterns: None,
            line_number_patterns: Some(&["line {number}"]),
            line_number_regex: None,
        }),
        _ => Err(LanguageError::Invalid {
            name: name.to_string(),
            reason: "no bundled language definition with this name".to_string(),
        }),
    }
}

/// Lazily-built, cached registry of bundled language definitions -- grounded
/// on `languages = KeyDefaultDict(_load_language)`. Each name is only ever
/// built once; unknown names stay out of the cache (Python's version can
/// afford to cache the `None` miss too, but since we return `Result` there's
/// no persistent object to memoize on failure).
pub struct LanguageRegistry {
    cache: KeyedCache<String, Option<std::sync::Arc<LanguageDef>>>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        LanguageRegistry {
            cache: KeyedCache::new(|name: &String| build(name).ok().map(std::sync::Arc::new)),
        }
    }

    pub fn get(&self, name: &str) -> Option<std::sync::Arc<LanguageDef>> {
        self.cache.get_or_init(&name.to_string())
    }
}

impl Default for LanguageRegistry {
    fn default() -> Self {
        Self::new()
    }
}

pub static REGISTRY: Lazy<LanguageRegistry> = Lazy::new(LanguageRegistry::new);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_bundled_languages() {
        assert!(REGISTRY.get("python").is_some());
        assert!(REGISTRY.get("python_repl").is_some());
        assert!(REGISTRY.get("bash").is_some());
    }

    #[test]
    fn registry_returns_none_for_unknown_language() {
        assert!(REGISTRY.get("cobol").is_none());
    }

    #[test]
    fn python_repl_carries_embedded_interpreter_script() {
        let def = REGISTRY.get("python_repl").unwrap();
        assert!(def.interpreter_script.unwrap().contains("DelimitedConsole"));
    }
}
