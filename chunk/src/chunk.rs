use crate::key::CodeKey;
use crate::options::{ChunkContext, Options, OptionValue, RawValue};
use codebraid_message::{Message, MessageKind, MessageList};
use codebraid_utils::splitlines_lf;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub const COMMANDS: &[&str] = &["code", "expr", "nb", "paste", "repl", "run"];

fn command_executes(command: Option<&str>) -> bool {
    matches!(command, Some("expr") | Some("nb") | Some("repl") | Some("run"))
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("copy_output called on a non-paste chunk")]
    NotPaste,
}

/// A rich-output payload carried alongside stdout/stderr, modeled but never
/// populated by the built-in subprocess executor (only a Jupyter kernel
/// produces it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RichOutput {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// One embedded block or inline snippet -- grounded on `CodeChunk`
/// (`code_chunks.py`). Chunks are immutable in structure after construction;
/// only their output buffers and a handful of derived fields (`code_lines`,
/// `is_expr`, `needs_to_copy`) change afterward, as copy resolution and
/// execution fill them in.
pub struct CodeChunk {
    pub command: Option<String>,
    pub inline: bool,
    pub is_expr: bool,
    pub execute: bool,
    pub origin_name: Option<String>,
    pub origin_start_line_number: Option<u32>,

    pub code_lines: Vec<String>,
    pub placeholder_code_lines: Vec<String>,
    code_str: Option<String>,

    pub options: Options,
    pub needs_to_copy: bool,
    pub copy_chunk_indices: Vec<usize>,

    pub key: Option<CodeKey>,
    pub index: Option<usize>,
    pub output_index: Option<usize>,

    pub stdout_lines: Vec<String>,
    pub stderr_lines: Vec<String>,
    pub repl_lines: Vec<String>,
    pub expr_lines: Vec<String>,
    pub rich_output: Option<Vec<RichOutput>>,

    pub markup_start_line_number: u32,
    pub code_start_line_number: u32,
    pub stdout_start_line_number: u32,
    pub stderr_start_line_number: u32,

    pub errors: MessageList,
    pub warnings: MessageList,
}

impl CodeChunk {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        command: Option<&str>,
        code: Vec<String>,
        custom_options: HashMap<String, RawValue>,
        origin_name: Option<String>,
        origin_start_line_number: Option<u32>,
        inline: bool,
    ) -> CodeChunk {
        let mut errors = MessageList::errors();
        let mut warnings = MessageList::warnings();

        let valid_command = command.filter(|c| COMMANDS.contains(c));
        match command {
            None => errors.push(Message::new(MessageKind::SourceError, "Missing valid Codebraid command".to_string())),
            Some(c) if valid_command.is_none() => {
                errors.push(Message::new(MessageKind::SourceError, format!("Unknown Codebraid command \"{c}\"")))
            }
            _ => {}
        }
        if valid_command == Some("expr") && !inline {
            errors.push(Message::new(MessageKind::SourceError, "Codebraid command \"expr\" is only allowed inline".to_string()));
        }
        if valid_command == Some("repl") && inline {
            errors.push(Message::new(MessageKind::SourceError, "Codebraid command \"repl\" is not supported inline".to_string()));
        }
        let execute = command_executes(valid_command);
        let is_expr = valid_command == Some("expr") || (inline && valid_command == Some("nb"));

        let code_lines_in = if code.is_empty() { vec![String::new()] } else { code };
        let has_copy = custom_options.contains_key("copy");
        let has_include = custom_options.contains_key("include");
        let (code_lines, placeholder_code_lines) = if !has_copy && !has_include {
            if inline && code_lines_in.len() > 1 {
                errors.push(Message::new(MessageKind::SourceError, "Inline code cannot be longer that 1 line".to_string()));
            }
            (code_lines_in, Vec::new())
        } else {
            let ok_placeholder = if inline {
                code_lines_in.len() == 1 && matches!(code_lines_in[0].as_str(), "" | " " | "_")
            } else {
                code_lines_in.len() == 1 && matches!(code_lines_in[0].trim_end_matches(' '), "" | "_")
            };
            if !ok_placeholder {
                errors.push(Message::new(
                    MessageKind::SourceError,
                    "Invalid placeholder code for copy or include (need space or underscore)".to_string(),
                ));
            }
            (Vec::new(), code_lines_in)
        };

        let ctx = ChunkContext { inline, execute, command: valid_command, is_expr };
        let name_hint = custom_options.get("name").and_then(|v| match v {
            RawValue::Str(s) => Some(s.as_str()),
            _ => None,
        });
        let mut options = Options::build(&ctx, name_hint, custom_options, &mut errors);

        let mut code_lines = code_lines;
        if let Some(OptionValue::Include(_)) = options.get("include") {
            if errors.is_empty() {
                if let Some(OptionValue::Include(include)) = options.get("include") {
                    let include_lines = include.code_lines.clone();
                    let show_has_code = options.get("show").and_then(OptionValue::as_show).is_some_and(|s| s.iter().any(|(o, _)| o == "code"));
                    if inline && show_has_code && include_lines.len() > 1 {
                        errors.push(Message::new(
                            MessageKind::SourceError,
                            "Cannot include and then display multiple lines of code in an inline context".to_string(),
                        ));
                    } else {
                        code_lines = include_lines;
                    }
                }
            }
        }

        let needs_to_copy = if valid_command == Some("paste") {
            if !has_copy {
                errors.push(Message::new(
                    MessageKind::SourceError,
                    "Command \"paste\" cannot be used without specifying a target via \"copy\"".to_string(),
                ));
            }
            true
        } else {
            false
        };

        let copy_targets_present = options.contains("copy");
        let _ = copy_targets_present;

        CodeChunk {
            command: valid_command.map(str::to_string),
            inline,
            is_expr,
            execute,
            origin_name,
            origin_start_line_number,
            code_lines,
            placeholder_code_lines,
            code_str: None,
            options,
            needs_to_copy,
            copy_chunk_indices: Vec::new(),
            key: None,
            index: None,
            output_index: None,
            stdout_lines: Vec::new(),
            stderr_lines: Vec::new(),
            repl_lines: Vec::new(),
            expr_lines: Vec::new(),
            rich_output: None,
            markup_start_line_number: 1,
            code_start_line_number: 1,
            stdout_start_line_number: 1,
            stderr_start_line_number: 1,
            errors,
            warnings,
        }
    }

    pub fn code_str(&mut self) -> &str {
        let code_lines = &self.code_lines;
        self.code_str.get_or_insert_with(|| code_lines.join("\n"))
    }

    pub fn layout_output(&self, output_type: &str, output_format: &str, lines: Option<&[String]>) -> String {
        let owned;
        let mut lines: Vec<String> = match lines {
            Some(l) => l.to_vec(),
            None => {
                owned = match output_type {
                    "code" => self.code_lines.clone(),
                    "repl" => self.repl_lines.clone(),
                    "expr" => self.expr_lines.clone(),
                    "stdout" => self.stdout_lines.clone(),
                    "stderr" => self.stderr_lines.clone(),
                    _ => Vec::new(),
                };
                owned
            }
        };
        if lines.is_empty() && output_format == "verbatim_or_empty" {
            lines = vec!["\u{a0}".to_string()];
        }

        let rewrap_lines = self
            .options
            .get(&format!("{output_type}_rewrap_lines"))
            .and_then(OptionValue::as_bool)
            .unwrap_or(false);
        let rewrap_width = match self.options.get(&format!("{output_type}_rewrap_width")) {
            Some(OptionValue::Int(n)) => *n as usize,
            _ => 78,
        };
        if rewrap_lines {
            let mut wrapped = Vec::new();
            for line in &lines {
                if line.is_empty() {
                    wrapped.push(line.clone());
                    continue;
                }
                let trimmed = line.trim_start_matches([' ', '\t']);
                let indent = &line[..line.len() - trimmed.len()];
                let width = rewrap_width.saturating_sub(indent.len()).max(1);
                let options = textwrap::Options::new(width).initial_indent(indent).subsequent_indent(indent);
                for wrapped_line in textwrap::wrap(trimmed, options) {
                    wrapped.push(wrapped_line.into_owned());
                }
            }
            lines = wrapped;
        }
        if self.inline {
            lines.join(" ")
        } else {
            lines.join("\n")
        }
    }

    /// Copy code from resolved targets -- grounded on `CodeChunk.copy_code`.
    /// Called once every entry in `targets` has itself finished resolving
    /// its own code.
    pub fn copy_code(&mut self, targets: &[&CodeChunk], self_name: Option<&str>) {
        let any_expr = targets.iter().any(|t| t.is_expr);
        if any_expr {
            if targets.len() > 1 {
                let invalid: Vec<String> = targets
                    .iter()
                    .filter(|t| t.is_expr)
                    .filter_map(|t| t.options.get("name").and_then(OptionValue::as_str).map(str::to_string))
                    .collect();
                self.errors.push(Message::new(
                    MessageKind::SourceError,
                    format!("Cannot copy multiple code chunks when some are expressions: {}", invalid.join(", ")),
                ));
            }
            if matches!(self.command.as_deref(), Some("paste") | Some("code")) {
                self.is_expr = true;
                self.expr_lines.clear();
            } else if !self.is_expr {
                self.errors.push(Message::new(MessageKind::SourceError, "A non-expression command cannot copy an expression code chunk".to_string()));
            }
        } else if self.is_expr {
            self.errors.push(Message::new(MessageKind::SourceError, "An expression command cannot copy a non-expression code chunk".to_string()));
        }
        if !self.errors.is_empty() {
            return;
        }

        let _ = self_name;
        let ctx = ChunkContext { inline: self.inline, execute: self.execute, command: self.command.as_deref(), is_expr: self.is_expr };
        let target_lang = targets[0].options.get("lang").and_then(OptionValue::as_str).map(str::to_string);
        let target_show = targets[0].options.get("show").and_then(OptionValue::as_show).map(|s| s.to_vec());
        self.options.finalize_after_copy(&ctx, target_lang, target_show, &mut self.errors);

        let show_has_code = self.options.get("show").and_then(OptionValue::as_show).is_some_and(|s| s.iter().any(|(o, _)| o == "code"));
        let total_lines: usize = targets.iter().map(|t| t.code_lines.len()).sum();
        if self.inline && show_has_code && (targets.len() > 1 || targets[0].code_lines.len() > 1) {
            self.errors.push(Message::new(
                MessageKind::SourceError,
                "Cannot copy and then display multiple lines of code in an inline context".to_string(),
            ));
            return;
        }
        let _ = total_lines;

        self.code_lines = if targets.len() == 1 {
            targets[0].code_lines.clone()
        } else {
            targets.iter().flat_map(|t| t.code_lines.iter().cloned()).collect()
        };
        if self.command.as_deref() == Some("paste") && targets.iter().all(|t| t.command.as_deref() == Some("code")) {
            self.needs_to_copy = false;
        }
        self.code_start_line_number = targets[0].code_start_line_number;
    }

    /// Copy output from resolved targets, after execution -- grounded on
    /// `CodeChunk.copy_output`.
    pub fn copy_output(&mut self, targets: &[&CodeChunk]) -> Result<(), ChunkError> {
        if self.command.as_deref() != Some("paste") {
            return Err(ChunkError::NotPaste);
        }
        if targets.iter().any(|t| t.command.as_deref() == Some("paste")) {
            if targets.len() > 1 {
                if targets.iter().all(|t| t.command.as_deref() == Some("paste")) {
                    self.errors.push(Message::new(MessageKind::SourceError, "Can only copy a single paste code chunk; cannot combine multiple paste chunks".to_string()));
                } else {
                    self.errors.push(Message::new(MessageKind::SourceError, "Cannot copy a mixture of paste and other code chunks".to_string()));
                }
            }
        } else if targets.iter().any(|t| t.execute) {
            if !targets.iter().all(|t| t.execute) {
                self.errors.push(Message::new(MessageKind::SourceError, "Copying output of multiple code chunks requires that all or none are executed".to_string()));
            } else if targets.len() > 1 {
                let out_of_order = targets.windows(2).any(|w| w[1].index != w[0].index.map(|i| i + 1));
                if out_of_order {
                    let duplicate = targets.windows(2).any(|w| std::ptr::eq(w[0], w[1]));
                    if duplicate {
                        self.errors.push(Message::new(MessageKind::SourceError, "Cannot copy output of a single code chunk multiple times".to_string()));
                    } else {
                        let descending = targets.windows(2).any(|w| w[0].index > w[1].index);
                        if descending {
                            self.errors.push(Message::new(MessageKind::SourceError, "Cannot copy output of code chunks out of order".to_string()));
                        } else {
                            self.errors.push(Message::new(MessageKind::SourceError, "Cannot copy output of code chunks when some chunks in a sequence are omitted".to_string()));
                        }
                    }
                }
            }
        }
        if !self.errors.is_empty() {
            self.code_lines.clear();
            return Ok(());
        }
        if targets.len() == 1 {
            self.stdout_lines = targets[0].stdout_lines.clone();
            self.stderr_lines = targets[0].stderr_lines.clone();
            self.repl_lines = targets[0].repl_lines.clone();
            self.rich_output = targets[0].rich_output.clone();
        } else {
            self.stdout_lines = targets.iter().flat_map(|t| t.stdout_lines.iter().cloned()).collect();
            self.stderr_lines = targets.iter().flat_map(|t| t.stderr_lines.iter().cloned()).collect();
            self.repl_lines = targets.iter().flat_map(|t| t.repl_lines.iter().cloned()).collect();
            self.rich_output = {
                let all: Vec<RichOutput> = targets.iter().filter_map(|t| t.rich_output.clone()).flatten().collect();
                if all.is_empty() { None } else { Some(all) }
            };
        }
        if self.is_expr {
            self.expr_lines = targets[0].expr_lines.clone();
        }
        self.stdout_start_line_number = targets[0].stdout_start_line_number;
        self.stderr_start_line_number = targets[0].stderr_start_line_number;
        self.needs_to_copy = false;
        Ok(())
    }
}

pub fn split_code(code: &str) -> Vec<String> {
    let lines = splitlines_lf(code, false);
    if lines.is_empty() { vec![String::new()] } else { lines }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_chunk(command: &str, code: &str, inline: bool) -> CodeChunk {
        CodeChunk::new(Some(command), split_code(code), HashMap::new(), None, None, inline)
    }

    #[test]
    fn unknown_command_is_recorded_as_error() {
        let chunk = CodeChunk::new(Some("bogus"), split_code("x = 1"), HashMap::new(), None, None, false);
        assert!(!chunk.errors.is_empty());
        assert!(chunk.command.is_none());
    }

    #[test]
    fn inline_multiline_code_is_an_error() {
        let chunk = simple_chunk("code", "a\nb", true);
        assert!(!chunk.errors.is_empty());
    }

    #[test]
    fn expr_command_requires_inline() {
        let chunk = simple_chunk("expr", "1 + 1", false);
        assert!(!chunk.errors.is_empty());
    }

    #[test]
    fn block_code_chunk_has_no_errors_and_keeps_lines() {
        let chunk = simple_chunk("code", "a = 1\nb = 2", false);
        assert!(chunk.errors.is_empty());
        assert_eq!(chunk.code_lines, vec!["a = 1".to_string(), "b = 2".to_string()]);
    }

    #[test]
    fn layout_output_joins_block_lines_with_newlines() {
        let chunk = simple_chunk("code", "a\nb", false);
        assert_eq!(chunk.layout_output("code", "verbatim", None), "a\nb");
    }
}
