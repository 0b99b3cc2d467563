/// Which flavor of code collection a `CodeKey` identifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollectionKind {
    Session,
    Source,
}

/// Uniquely identifies a session or source -- grounded on `CodeKey`
/// (`code_chunks.py`). `name: None` denotes the anonymous collection for a
/// given `(lang, kind, origin)` combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeKey {
    pub lang: Option<String>,
    pub name: Option<String>,
    pub kind: CollectionKind,
    pub origin_name: Option<String>,
}

impl CodeKey {
    pub fn new(lang: Option<String>, name: Option<String>, kind: CollectionKind, origin_name: Option<String>) -> Self {
        CodeKey { lang, name, kind, origin_name }
    }
}
