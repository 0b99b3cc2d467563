use crate::include::Include;
use codebraid_message::{Message, MessageKind, MessageList};
use std::collections::{HashMap, HashSet};

/// An option's value before type-specific validation. Document-format
/// front ends are responsible for producing these from whatever native
/// scalar type their markup allows; `Options` only validates and routes.
#[derive(Debug, Clone)]
pub enum RawValue {
    Bool(bool),
    Int(i64),
    Str(String),
    Include(HashMap<String, String>),
}

/// A validated option value, after routing through its per-key validator.
#[derive(Debug, Clone)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Str(String),
    StrList(Vec<String>),
    StrSet(HashSet<String>),
    /// Ordered `output -> format` pairs, order-preserving like the
    /// original's `OrderedDict`.
    Show(Vec<(String, String)>),
    Include(Include),
}

impl OptionValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            OptionValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            OptionValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            OptionValue::StrList(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_show(&self) -> Option<&[(String, String)]> {
        match self {
            OptionValue::Show(v) => Some(v),
            _ => None,
        }
    }
}

/// The subset of a `CodeChunk`'s own fields option validators need to
/// consult -- standing in for `self.code_chunk.*` lookups in the original,
/// since `Options` here does not hold a back-reference to its owning chunk.
pub struct ChunkContext<'a> {
    pub inline: bool,
    pub execute: bool,
    pub command: Option<&'a str>,
    pub is_expr: bool,
}

const BASE_KEYWORDS: &[&str] = &[
    "complete",
    "copy",
    "example",
    "hide",
    "hide_markup_keys",
    "include",
    "lang",
    "name",
    "outside_main",
    "session",
    "source",
    "show",
];
const LAYOUT_PREFIXES: &[&str] = &["", "markup", "copied_markup", "code", "stdout", "stderr"];
const LAYOUT_SUFFIXES: &[&str] = &["first_number", "line_numbers", "rewrap_lines", "rewrap_width", "expand_tabs", "tab_size"];
const FIRST_CHUNK_EXECUTE_KEYWORDS: &[&str] = &["executable", "jupyter_kernel"];
const FIRST_CHUNK_SAVE_KEYWORDS: &[&str] = &["save", "save_as"];
const FIRST_CHUNK_OTHER_KEYWORDS: &[&str] = &["executable_opts", "args", "jupyter_timeout", "live_output"];
const AFTER_COPY_KEYWORDS: &[&str] = &["hide", "show"];
const DEFAULT_RICH_OUTPUT: &[&str] = &["latex", "markdown", "png", "jpg", "plain"];

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_') && chars.all(|c| c.is_alphanumeric() || c == '_')
}

fn layout_keywords() -> Vec<String> {
    let mut out = Vec::new();
    for prefix in LAYOUT_PREFIXES {
        for suffix in LAYOUT_SUFFIXES {
            out.push(if prefix.is_empty() { suffix.to_string() } else { format!("{prefix}_{suffix}") });
        }
    }
    out
}

fn is_known_keyword(key: &str) -> bool {
    BASE_KEYWORDS.contains(&key)
        || layout_keywords().iter().any(|k| k == key)
        || FIRST_CHUNK_EXECUTE_KEYWORDS.contains(&key)
        || FIRST_CHUNK_SAVE_KEYWORDS.contains(&key)
        || FIRST_CHUNK_OTHER_KEYWORDS.contains(&key)
}

/// A chunk's validated option set -- grounded on `Options`
/// (`code_chunks.py`). Options that depend on copy-resolution (`show`,
/// `hide`) are re-processed by `finalize_after_copy` once targets are known.
pub struct Options {
    values: HashMap<String, OptionValue>,
    pub first_chunk_options: HashMap<String, OptionValue>,
    custom_options: HashMap<String, RawValue>,
    copy_targets: Option<Vec<String>>,
}

impl Options {
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn insert(&mut self, key: &str, value: OptionValue) {
        self.values.insert(key.to_string(), value);
    }

    pub fn copy_targets(&self) -> Option<&[String]> {
        self.copy_targets.as_deref()
    }

    pub fn build(
        ctx: &ChunkContext,
        name_hint: Option<&str>,
        custom_options: HashMap<String, RawValue>,
        errors: &mut MessageList,
    ) -> Options {
        let mut values = HashMap::new();
        values.insert("complete".to_string(), OptionValue::Bool(true));
        values.insert("example".to_string(), OptionValue::Bool(false));
        values.insert("inherited_lang".to_string(), OptionValue::Bool(false));
        values.insert("outside_main".to_string(), OptionValue::Bool(false));
        if !ctx.inline {
            values.insert("code_first_number".to_string(), OptionValue::Str("next".to_string()));
            values.insert("code_line_numbers".to_string(), OptionValue::Bool(true));
        }
        if ctx.execute {
            // session defaults to None/unset until a `session` keyword is seen
        } else {
            // source defaults to None/unset until a `source` keyword is seen
        }

        let unknown: Vec<&str> = custom_options.keys().filter(|k| !is_known_keyword(k)).map(|s| s.as_str()).collect();
        let custom_options = if !unknown.is_empty() {
            errors.push(Message::new(MessageKind::SourceError, format!("Unknown keywords: {}", unknown.join(", "))));
            custom_options.into_iter().filter(|(k, _)| is_known_keyword(k)).collect()
        } else {
            custom_options
        };

        let mut opts = Options { values, first_chunk_options: HashMap::new(), custom_options, copy_targets: None };

        let keys: Vec<String> = opts.custom_options.keys().cloned().collect();
        for key in &keys {
            if !AFTER_COPY_KEYWORDS.contains(&key.as_str()) {
                if let Some(value) = opts.custom_options.get(key).cloned() {
                    opts.apply(ctx, name_hint, key, value, errors);
                }
            }
        }

        if errors.is_empty() && !opts.contains("copy") {
            let default_show = default_show_for(ctx.inline, ctx.command);
            opts.insert("show", OptionValue::Show(default_show));
            for key in &keys {
                if AFTER_COPY_KEYWORDS.contains(&key.as_str()) {
                    if let Some(value) = opts.custom_options.get(key).cloned() {
                        opts.apply(ctx, name_hint, key, value, errors);
                    }
                }
            }
        }
        opts
    }

    /// Second option-processing pass, run once copy targets have resolved
    /// their own code -- grounded on `Options.finalize_after_copy`.
    pub fn finalize_after_copy(&mut self, ctx: &ChunkContext, target_lang: Option<String>, target_show: Option<Vec<(String, String)>>, errors: &mut MessageList) {
        if self.get("lang").and_then(OptionValue::as_str).is_none() {
            self.insert("inherited_lang", OptionValue::Bool(true));
            if let Some(lang) = target_lang {
                self.insert("lang", OptionValue::Str(lang));
            }
        }
        let inherit_show = ctx.command == Some("paste") && !self.custom_options.contains_key("show");
        if inherit_show {
            if let Some(show) = target_show {
                self.insert("show", OptionValue::Show(show));
            }
        } else {
            self.insert("show", OptionValue::Show(default_show_for(ctx.inline, ctx.command)));
        }
        for key in AFTER_COPY_KEYWORDS {
            if let Some(value) = self.custom_options.get(*key).cloned() {
                self.apply(ctx, None, key, value, errors);
            }
        }
    }

    fn apply(&mut self, ctx: &ChunkContext, name_hint: Option<&str>, key: &str, value: RawValue, errors: &mut MessageList) {
        match key {
            "complete" => self.option_complete(ctx, value, errors),
            "copy" => self.option_copy(name_hint, value, errors),
            "include" => self.option_include(value, errors),
            "name" => self.option_name(value, errors),
            "outside_main" => self.option_outside_main(ctx, value, errors),
            "source" => self.option_session_or_source("source", ctx, value, errors),
            "session" => self.option_session_or_source("session", ctx, value, errors),
            "show" => self.option_show(ctx, value, errors),
            "hide" => self.option_hide(value, errors),
            "hide_markup_keys" => self.option_hide_markup_keys(value, errors),
            "example" => self.bool_can_exec_error(key, value, errors),
            "lang" => self.str_error(key, value, errors),
            "executable" | "executable_opts" | "args" | "jupyter_kernel" | "save_as" => {
                self.first_chunk_string(key, value, errors)
            }
            "jupyter_timeout" => self.first_chunk_int(key, value, errors),
            "save" | "live_output" => self.first_chunk_bool(key, value, errors),
            _ if LAYOUT_SUFFIXES.iter().any(|s| key.ends_with(s)) => self.layout_option(key, value, errors),
            _ => {
                errors.push(Message::new(MessageKind::SourceError, format!("Unknown keyword \"{key}\"")));
            }
        }
    }

    fn layout_option(&mut self, key: &str, value: RawValue, errors: &mut MessageList) {
        let bare = LAYOUT_SUFFIXES.iter().find(|s| key.ends_with(*s)).copied().unwrap_or(key);
        let renamed = if bare == "first_number" && key == "first_number" {
            "code_first_number".to_string()
        } else if bare == "line_numbers" && key == "line_numbers" {
            "code_line_numbers".to_string()
        } else if bare == "rewrap_lines" && key == "rewrap_lines" {
            "code_rewrap_lines".to_string()
        } else if bare == "rewrap_width" && key == "rewrap_width" {
            "code_rewrap_width".to_string()
        } else if bare == "expand_tabs" && key == "expand_tabs" {
            "code_expand_tabs".to_string()
        } else if bare == "tab_size" && key == "tab_size" {
            "code_tab_size".to_string()
        } else {
            key.to_string()
        };
        match bare {
            "first_number" => match value {
                RawValue::Int(n) if n > 0 => self.insert(&renamed, OptionValue::Int(n)),
                RawValue::Str(ref s) if s == "next" => self.insert(&renamed, OptionValue::Str("next".to_string())),
                _ => errors.push(Message::new(MessageKind::CanExecSourceError, format!("Invalid \"{key}\" value"))),
            },
            "rewrap_width" | "tab_size" => match value {
                RawValue::Int(n) if n > 0 => self.insert(&renamed, OptionValue::Int(n)),
                _ => errors.push(Message::new(MessageKind::CanExecSourceError, format!("Invalid \"{key}\" value"))),
            },
            "line_numbers" | "rewrap_lines" | "expand_tabs" => match value {
                RawValue::Bool(b) => self.insert(&renamed, OptionValue::Bool(b)),
                _ => errors.push(Message::new(MessageKind::CanExecSourceError, format!("Invalid \"{key}\" value"))),
            },
            _ => {}
        }
    }

    fn bool_can_exec_error(&mut self, key: &str, value: RawValue, errors: &mut MessageList) {
        match value {
            RawValue::Bool(b) => self.insert(key, OptionValue::Bool(b)),
            _ => errors.push(Message::new(MessageKind::CanExecSourceError, format!("Invalid \"{key}\" value"))),
        }
    }

    fn str_error(&mut self, key: &str, value: RawValue, errors: &mut MessageList) {
        match value {
            RawValue::Str(s) => self.insert(key, OptionValue::Str(s)),
            _ => errors.push(Message::new(MessageKind::SourceError, format!("Invalid \"{key}\" value"))),
        }
    }

    fn first_chunk_string(&mut self, key: &str, value: RawValue, errors: &mut MessageList) {
        match value {
            RawValue::Str(s) => {
                if FIRST_CHUNK_EXECUTE_KEYWORDS.contains(&key)
                    && FIRST_CHUNK_EXECUTE_KEYWORDS.iter().any(|k| self.first_chunk_options.contains_key(*k))
                {
                    errors.push(Message::new(MessageKind::SourceError, "Conflicting options for execution target".to_string()));
                } else {
                    self.first_chunk_options.insert(key.to_string(), OptionValue::Str(s));
                }
            }
            _ => errors.push(Message::new(MessageKind::SourceError, format!("Invalid \"{key}\" value"))),
        }
    }

    fn first_chunk_bool(&mut self, key: &str, value: RawValue, errors: &mut MessageList) {
        match value {
            RawValue::Bool(b) => {
                self.first_chunk_options.insert(key.to_string(), OptionValue::Bool(b));
            }
            _ => errors.push(Message::new(MessageKind::SourceError, format!("Invalid \"{key}\" value"))),
        }
    }

    fn first_chunk_int(&mut self, key: &str, value: RawValue, errors: &mut MessageList) {
        match value {
            RawValue::Int(n) => {
                self.first_chunk_options.insert(key.to_string(), OptionValue::Int(n));
            }
            _ => errors.push(Message::new(MessageKind::SourceError, format!("Invalid \"{key}\" value"))),
        }
    }

    fn option_complete(&mut self, ctx: &ChunkContext, value: RawValue, errors: &mut MessageList) {
        let RawValue::Bool(b) = value else {
            errors.push(Message::new(MessageKind::SourceError, "Invalid \"complete\" value".to_string()));
            return;
        };
        if !ctx.execute {
            errors.push(Message::new(MessageKind::SourceError, "Option \"complete\" is only compatible with executed code chunks".to_string()));
        } else if ctx.command == Some("repl") {
            errors.push(Message::new(MessageKind::SourceError, "Option \"complete\" is not compatible with \"repl\" command".to_string()));
        } else if ctx.is_expr && !b {
            errors.push(Message::new(MessageKind::SourceError, "Option \"complete\" value \"false\" is incompatible with expr command".to_string()));
        } else if self.get("outside_main").and_then(OptionValue::as_bool) == Some(true) {
            errors.push(Message::new(MessageKind::SourceError, "Option \"complete\" is incompatible with \"outside_main\" value \"true\"".to_string()));
        } else {
            self.insert("complete", OptionValue::Bool(b));
        }
    }

    fn option_copy(&mut self, name_hint: Option<&str>, value: RawValue, errors: &mut MessageList) {
        let RawValue::Str(s) = value else {
            errors.push(Message::new(MessageKind::SourceError, "Invalid \"copy\" value".to_string()));
            return;
        };
        if self.contains("include") {
            errors.push(Message::new(MessageKind::SourceError, "Option \"copy\" is incompatible with \"include\"".to_string()));
            return;
        }
        let values: Vec<String> = s.split('+').map(|v| v.trim().to_string()).collect();
        if !values.iter().all(|v| is_identifier(v)) {
            let invalid: Vec<&str> = values.iter().filter(|v| !is_identifier(v)).map(|s| s.as_str()).collect();
            errors.push(Message::new(MessageKind::SourceError, format!("Option \"copy\" has invalid, non-identifier value(s) {}", invalid.join(", "))));
        } else if name_hint.is_some_and(|n| values.iter().any(|v| v == n)) {
            errors.push(Message::new(MessageKind::SourceError, "Code chunk cannot copy itself".to_string()));
        } else {
            self.copy_targets = Some(values.clone());
            self.insert("copy", OptionValue::StrList(values));
        }
    }

    fn option_include(&mut self, value: RawValue, errors: &mut MessageList) {
        let RawValue::Include(raw) = value else {
            errors.push(Message::new(MessageKind::SourceError, "Invalid \"include\" value".to_string()));
            return;
        };
        if self.contains("copy") {
            errors.push(Message::new(MessageKind::SourceError, "Option \"include\" is incompatible with \"copy\"".to_string()));
            return;
        }
        let include = Include::resolve(raw, errors);
        if !include.code_lines.is_empty() {
            self.insert("include", OptionValue::Include(include));
        }
    }

    fn option_name(&mut self, value: RawValue, errors: &mut MessageList) {
        let RawValue::Str(s) = value else {
            errors.push(Message::new(MessageKind::CanExecSourceError, "Invalid \"name\" value".to_string()));
            return;
        };
        if !is_identifier(&s) {
            errors.push(Message::new(MessageKind::CanExecSourceError, format!("Option \"name\" has invalid, non-identifier value \"{s}\"")));
            return;
        }
        if let Some(targets) = &self.copy_targets {
            if targets.contains(&s) {
                errors.push(Message::new(MessageKind::SourceError, "Code chunk cannot copy itself".to_string()));
                return;
            }
        }
        self.insert("name", OptionValue::Str(s));
    }

    fn option_outside_main(&mut self, ctx: &ChunkContext, value: RawValue, errors: &mut MessageList) {
        let RawValue::Bool(b) = value else {
            errors.push(Message::new(MessageKind::SourceError, "Invalid \"outside_main\" value".to_string()));
            return;
        };
        if !ctx.execute {
            errors.push(Message::new(MessageKind::SourceError, "Option \"outside_main\" is only compatible with executed code chunks".to_string()));
        } else if ctx.command == Some("repl") {
            errors.push(Message::new(MessageKind::SourceError, "Option \"outside_main\" is not compatible with \"repl\" command".to_string()));
        } else if ctx.is_expr && b {
            errors.push(Message::new(MessageKind::SourceError, "Option \"outside_main\" value \"true\" is incompatible with expr command".to_string()));
        } else if b && self.custom_options.contains_key("complete") {
            errors.push(Message::new(MessageKind::SourceError, "Option \"outside_main\" value \"true\" is incompatible with \"complete\"".to_string()));
        } else {
            self.values.remove("complete");
            self.insert("outside_main", OptionValue::Bool(b));
        }
    }

    fn option_session_or_source(&mut self, key: &str, ctx: &ChunkContext, value: RawValue, errors: &mut MessageList) {
        let RawValue::Str(s) = value else {
            errors.push(Message::new(MessageKind::SourceError, format!("Invalid \"{key}\" value")));
            return;
        };
        let wrong_side = if key == "source" { ctx.execute && ctx.command.is_some() } else { !ctx.execute && ctx.command.is_some() };
        if wrong_side {
            let other = if key == "source" { "session" } else { "source" };
            errors.push(Message::new(
                MessageKind::SourceError,
                format!("Option \"{key}\" is only compatible with {}; otherwise, use \"{other}\"", if key == "source" { "non-executed code chunks" } else { "executed code chunks" }),
            ));
        } else if !is_identifier(&s) {
            errors.push(Message::new(MessageKind::SourceError, format!("Option \"{key}\" has invalid, non-identifier value \"{s}\"")));
        } else {
            self.insert(key, OptionValue::Str(s));
        }
    }

    fn option_hide_markup_keys(&mut self, value: RawValue, errors: &mut MessageList) {
        let RawValue::Str(s) = value else {
            errors.push(Message::new(MessageKind::CanExecSourceError, "Invalid \"hide_markup_keys\" value".to_string()));
            return;
        };
        let mut set: HashSet<String> = s.replace(' ', "").split('+').map(|x| x.to_string()).collect();
        set.insert("hide_markup_keys".to_string());
        self.insert("hide_markup_keys", OptionValue::StrSet(set));
    }

    fn option_show(&mut self, ctx: &ChunkContext, value: RawValue, errors: &mut MessageList) {
        let value = match value {
            RawValue::Str(s) => Some(s),
            RawValue::Bool(_) | RawValue::Int(_) | RawValue::Include(_) => {
                errors.push(Message::new(MessageKind::CanExecSourceError, "Invalid \"show\" value".to_string()));
                return;
            }
        };
        let Some(value) = value else {
            self.insert("show", OptionValue::Show(Vec::new()));
            return;
        };
        if value == "none" {
            self.insert("show", OptionValue::Show(Vec::new()));
            return;
        }
        let mut processed: Vec<(String, String)> = Vec::new();
        for output_and_format in value.replace(' ', "").split('+') {
            let (output, format) = match output_and_format.split_once(':') {
                Some((o, f)) => (o, Some(f)),
                None => (output_and_format, None),
            };
            if processed.iter().any(|(o, _)| o == output) {
                errors.push(Message::new(MessageKind::CanExecSourceError, format!("Option \"show\" value \"{value}\" contains duplicate \"{output}\"")));
                continue;
            }
            let resolved_format = match output {
                "markup" | "copied_markup" | "code" | "repl" => match format {
                    None => "verbatim".to_string(),
                    Some("verbatim") => "verbatim".to_string(),
                    Some(_) => {
                        errors.push(Message::new(MessageKind::CanExecSourceError, format!("Invalid \"show\" sub-value \"{output_and_format}\"")));
                        continue;
                    }
                },
                "stdout" | "stderr" => match format {
                    None => "verbatim".to_string(),
                    Some(f @ ("verbatim" | "verbatim_or_empty" | "raw")) => f.to_string(),
                    Some(_) => {
                        errors.push(Message::new(MessageKind::CanExecSourceError, format!("Invalid \"show\" sub-value \"{output_and_format}\"")));
                        continue;
                    }
                },
                "expr" => {
                    if !ctx.is_expr {
                        errors.push(Message::new(MessageKind::CanExecSourceError, format!("Invalid \"show\" sub-value \"{output_and_format}\"")));
                        continue;
                    }
                    match format {
                        None => "raw".to_string(),
                        Some(f @ ("verbatim" | "verbatim_or_empty" | "raw")) => f.to_string(),
                        Some(_) => {
                            errors.push(Message::new(MessageKind::CanExecSourceError, format!("Invalid \"show\" sub-value \"{output_and_format}\"")));
                            continue;
                        }
                    }
                }
                "rich_output" => match format {
                    None => DEFAULT_RICH_OUTPUT.join("|"),
                    Some(f) => f.to_string(),
                },
                _ => {
                    errors.push(Message::new(MessageKind::CanExecSourceError, format!("Invalid \"show\" sub-value \"{output_and_format}\"")));
                    continue;
                }
            };
            processed.push((output.to_string(), resolved_format));
        }
        self.insert("show", OptionValue::Show(processed));
    }

    fn option_hide(&mut self, value: RawValue, errors: &mut MessageList) {
        const DISPLAY_VALUES: &[&str] = &["markup", "copied_markup", "code", "stdout", "stderr", "expr", "rich_output"];
        let RawValue::Str(s) = value else {
            errors.push(Message::new(MessageKind::CanExecSourceError, "Invalid \"hide\" value".to_string()));
            return;
        };
        if self.custom_options.contains_key("show") {
            errors.push(Message::new(MessageKind::CanExecSourceError, "Option \"hide\" cannot be used with \"show\"".to_string()));
            return;
        }
        if s == "all" {
            self.insert("show", OptionValue::Show(Vec::new()));
            return;
        }
        let hide_values: Vec<String> = s.replace(' ', "").split('+').map(|v| v.to_string()).collect();
        if !hide_values.iter().all(|v| DISPLAY_VALUES.contains(&v.as_str())) {
            errors.push(Message::new(MessageKind::CanExecSourceError, format!("Invalid \"hide\" value \"{s}\"")));
            return;
        }
        if let Some(OptionValue::Show(show)) = self.values.get_mut("show") {
            show.retain(|(o, _)| !hide_values.contains(o));
        }
    }
}

fn default_show_for(inline: bool, command: Option<&str>) -> Vec<(String, String)> {
    let rich = || DEFAULT_RICH_OUTPUT.join("|");
    match (inline, command) {
        (true, Some("code")) => vec![("code".to_string(), "verbatim".to_string())],
        (true, Some("expr")) => vec![("expr".to_string(), "raw".to_string()), ("stderr".to_string(), "verbatim".to_string())],
        (true, Some("nb")) => vec![
            ("expr".to_string(), "verbatim".to_string()),
            ("rich_output".to_string(), rich()),
            ("stderr".to_string(), "verbatim".to_string()),
        ],
        (true, Some("paste")) => Vec::new(),
        (true, Some("run")) => vec![
            ("stdout".to_string(), "raw".to_string()),
            ("stderr".to_string(), "verbatim".to_string()),
            ("rich_output".to_string(), rich()),
        ],
        (false, Some("code")) => vec![("code".to_string(), "verbatim".to_string())],
        (false, Some("nb")) => vec![
            ("code".to_string(), "verbatim".to_string()),
            ("stdout".to_string(), "verbatim".to_string()),
            ("stderr".to_string(), "verbatim".to_string()),
            ("rich_output".to_string(), rich()),
        ],
        (false, Some("paste")) => Vec::new(),
        (false, Some("repl")) => vec![("repl".to_string(), "verbatim".to_string())],
        (false, Some("run")) => vec![
            ("stdout".to_string(), "raw".to_string()),
            ("stderr".to_string(), "verbatim".to_string()),
            ("rich_output".to_string(), rich()),
        ],
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(inline: bool, execute: bool, command: &'static str, is_expr: bool) -> ChunkContext<'static> {
        ChunkContext { inline, execute, command: Some(command), is_expr }
    }

    #[test]
    fn unknown_keyword_is_an_error() {
        let mut errors = MessageList::errors();
        let mut custom = HashMap::new();
        custom.insert("bogus".to_string(), RawValue::Bool(true));
        let c = ctx(false, true, "code", false);
        Options::build(&c, None, custom, &mut errors);
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn copy_and_include_are_mutually_exclusive() {
        let mut errors = MessageList::errors();
        let mut custom = HashMap::new();
        custom.insert("copy".to_string(), RawValue::Str("other".to_string()));
        custom.insert("include".to_string(), RawValue::Include(HashMap::new()));
        let c = ctx(false, true, "code", false);
        let opts = Options::build(&c, Some("self"), custom, &mut errors);
        assert!(opts.contains("copy"));
        assert!(!opts.contains("include"));
        assert!(errors.iter().any(|m| m.message.as_ref().is_some_and(|l| l.iter().any(|s| s.contains("incompatible with \"copy\"")))));
    }

    #[test]
    fn copying_self_is_an_error() {
        let mut errors = MessageList::errors();
        let mut custom = HashMap::new();
        custom.insert("copy".to_string(), RawValue::Str("foo".to_string()));
        let c = ctx(false, true, "code", false);
        Options::build(&c, Some("foo"), custom, &mut errors);
        assert!(!errors.is_empty());
    }

    #[test]
    fn show_parses_output_and_format() {
        let mut errors = MessageList::errors();
        let mut custom = HashMap::new();
        custom.insert("show".to_string(), RawValue::Str("stdout:raw+stderr".to_string()));
        let c = ctx(false, true, "run", false);
        let opts = Options::build(&c, None, custom, &mut errors);
        assert!(errors.is_empty());
        let show = opts.get("show").unwrap().as_show().unwrap();
        assert_eq!(show, &[("stdout".to_string(), "raw".to_string()), ("stderr".to_string(), "verbatim".to_string())]);
    }

    #[test]
    fn hide_removes_from_default_show() {
        let mut errors = MessageList::errors();
        let mut custom = HashMap::new();
        custom.insert("hide".to_string(), RawValue::Str("stderr".to_string()));
        let c = ctx(false, true, "run", false);
        let opts = Options::build(&c, None, custom, &mut errors);
        let show = opts.get("show").unwrap().as_show().unwrap();
        assert!(show.iter().all(|(o, _)| o != "stderr"));
    }
}
