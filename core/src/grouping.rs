use crate::config::BuildConfig;
use codebraid_chunk::{CodeChunk, CodeKey, CollectionKind, OptionValue, RawValue};
use codebraid_collections::{Session, Source};
use codebraid_message::{Message, MessageKind};
use std::collections::HashMap;

/// One chunk as handed over by the document parser -- grounded on spec
/// §6's `RawChunk{command, code, options, origin_name,
/// origin_start_line_number, inline}`. Parsing the surrounding markup into
/// this shape is the external converter's job; everything from here on is
/// this crate's.
pub struct RawChunk {
    pub command: Option<String>,
    pub code: Vec<String>,
    pub options: HashMap<String, RawValue>,
    pub origin_name: Option<String>,
    pub origin_start_line_number: Option<u32>,
    pub inline: bool,
}

/// Mirrors `CodeChunk`'s own executed-command list (`code_chunks.py`'s
/// `COMMANDS_EXECUTE`) just well enough to pick which of
/// [`BuildConfig`]'s two option-default maps applies before the chunk's
/// `Options` are built -- `CodeChunk` itself only exposes this as the
/// already-derived `execute` field on the finished chunk.
fn command_will_execute(command: Option<&str>) -> bool {
    matches!(command, Some("expr") | Some("nb") | Some("repl") | Some("run"))
}

fn build_chunk(raw: RawChunk, config: &BuildConfig) -> CodeChunk {
    let mut options = raw.options;
    let defaults = if command_will_execute(raw.command.as_deref()) {
        &config.session_option_defaults
    } else {
        &config.code_option_defaults
    };
    for (key, value) in defaults {
        options.entry(key.clone()).or_insert_with(|| value.clone());
    }
    CodeChunk::new(raw.command.as_deref(), raw.code, options, raw.origin_name, raw.origin_start_line_number, raw.inline)
}

/// Apply each raw chunk's option defaults and construct its `CodeChunk` --
/// grounded on `CodeProcessor.process`'s per-chunk construction loop.
pub fn build_chunks(raw_chunks: Vec<RawChunk>, config: &BuildConfig) -> Vec<CodeChunk> {
    raw_chunks.into_iter().map(|raw| build_chunk(raw, config)).collect()
}

/// Record a `SourceError` on every chunk whose `name` option collides with
/// an earlier chunk's -- grounded on spec §3's "duplicate `name` across the
/// document" mutual-exclusion rule, which `Options` can't enforce itself
/// since it only ever sees one chunk at a time.
pub fn flag_duplicate_names(chunks: &mut [CodeChunk]) {
    let mut seen: HashMap<String, usize> = HashMap::new();
    for i in 0..chunks.len() {
        let Some(name) = chunks[i].options.get("name").and_then(OptionValue::as_str).map(str::to_string) else {
            continue;
        };
        match seen.get(&name) {
            Some(&first) => {
                chunks[i].errors.push(Message::new(
                    MessageKind::SourceError,
                    format!("Duplicate code chunk name \"{name}\" (first used at chunk {first})"),
                ));
            }
            None => {
                seen.insert(name, i);
            }
        }
    }
}

fn derive_key(chunk: &CodeChunk, config: &BuildConfig) -> CodeKey {
    let lang = chunk.options.get("lang").and_then(OptionValue::as_str).map(str::to_string);
    let name = chunk
        .options
        .get("session")
        .or_else(|| chunk.options.get("source"))
        .and_then(OptionValue::as_str)
        .map(str::to_string);
    let kind = if chunk.execute { CollectionKind::Session } else { CollectionKind::Source };
    let origin = if kind == CollectionKind::Session && config.cross_origin_sessions {
        None
    } else {
        chunk.origin_name.clone()
    };
    CodeKey::new(lang, name, kind, origin)
}

/// Group chunks into `Session`/`Source` collections keyed by `CodeKey`,
/// preserving each collection's first-appearance order -- grounded on
/// `CodeProcessor`'s `code_collections: OrderedDict[CodeKey, CodeCollection]`
/// (`codeprocessors/base.py`).
pub fn group_chunks(chunks: Vec<CodeChunk>, config: &BuildConfig) -> (Vec<Session>, Vec<Source>) {
    let mut sessions: Vec<Session> = Vec::new();
    let mut session_index: HashMap<CodeKey, usize> = HashMap::new();
    let mut sources: Vec<Source> = Vec::new();
    let mut source_index: HashMap<CodeKey, usize> = HashMap::new();

    for chunk in chunks {
        let key = derive_key(&chunk, config);
        match key.kind {
            CollectionKind::Session => {
                let idx = *session_index.entry(key.clone()).or_insert_with(|| {
                    sessions.push(Session::new(key.clone()));
                    sessions.len() - 1
                });
                sessions[idx].push(chunk);
            }
            CollectionKind::Source => {
                let idx = *source_index.entry(key.clone()).or_insert_with(|| {
                    sources.push(Source::new(key.clone()));
                    sources.len() - 1
                });
                sources[idx].push(chunk);
            }
        }
    }
    (sessions, sources)
}

/// Resolve a session's `language` definition from its key/executable --
/// grounded on `CodeProcessor`'s language-lookup step, which in the
/// original reads from the same `languages` registry this crate embeds.
/// A no-op for Jupyter-backed sessions, which never hold a `LanguageDef`.
pub fn attach_language(session: &mut Session) {
    if session.jupyter_kernel.is_some() {
        return;
    }
    let lang_name = session.key.lang.clone().unwrap_or_else(|| session.executable.clone());
    match codebraid_language::REGISTRY.get(&lang_name) {
        Some(def) => session.set_language(def),
        None => session.errors.push(Message::new(MessageKind::SysConfigError, format!("Unknown language \"{lang_name}\""))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn chunk(name: Option<&str>, lang: &str) -> CodeChunk {
        let mut opts = Map::new();
        opts.insert("lang".to_string(), RawValue::Str(lang.to_string()));
        if let Some(n) = name {
            opts.insert("name".to_string(), RawValue::Str(n.to_string()));
        }
        CodeChunk::new(Some("nb"), vec!["x = 1".to_string()], opts, None, None, false)
    }

    #[test]
    fn second_use_of_a_name_is_flagged() {
        let mut chunks = vec![chunk(Some("a"), "python"), chunk(Some("a"), "python")];
        flag_duplicate_names(&mut chunks);
        assert!(chunks[0].errors.is_empty());
        assert!(!chunks[1].errors.is_empty());
    }

    #[test]
    fn chunks_with_the_same_key_share_one_session() {
        let config = BuildConfig::new(".");
        let chunks = vec![chunk(None, "python"), chunk(None, "python")];
        let (sessions, sources) = group_chunks(chunks, &config);
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].chunks.len(), 2);
        assert!(sources.is_empty());
    }

    #[test]
    fn different_languages_get_different_sessions() {
        let config = BuildConfig::new(".");
        let chunks = vec![chunk(None, "python"), chunk(None, "bash")];
        let (sessions, _) = group_chunks(chunks, &config);
        assert_eq!(sessions.len(), 2);
    }
}
