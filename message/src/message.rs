use crate::kind::MessageKind;
use serde::{Deserialize, Serialize};

/// A single error or warning attached to a chunk, session, or source.
///
/// `exit_code` is only ever populated on `ExecError`-family kinds, once the
/// owning subprocess has exited; it stays `None` for source/config errors
/// that are detected before any process is spawned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    pub message: Option<Vec<String>>,
    #[serde(default)]
    pub is_refed: bool,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl Message {
    pub fn new(kind: MessageKind, text: impl Into<MessageText>) -> Self {
        Message {
            kind,
            message: text.into().0,
            is_refed: false,
            exit_code: None,
        }
    }

    pub fn with_exit_code(kind: MessageKind, text: impl Into<MessageText>, exit_code: Option<i32>) -> Self {
        let mut m = Message::new(kind, text);
        m.exit_code = exit_code;
        m
    }

    pub fn is_cacheable(&self) -> bool {
        self.kind.is_cacheable()
    }

    pub fn prevent_caching(&self) -> bool {
        self.kind.prevent_caching()
    }

    pub fn prevent_exec(&self) -> bool {
        self.kind.prevent_exec()
    }

    pub fn is_stderr(&self) -> bool {
        self.kind.is_stderr()
    }

    pub fn is_ref(&self) -> bool {
        self.kind.is_ref()
    }
}

/// A `String` or a pre-split `Vec<String>` of message lines, accepted
/// interchangeably wherever a `Message` is constructed -- mirroring the
/// original constructor, which accepts either a raw string (split on `\n`)
/// or an already-split list shared by reference with a stderr buffer.
pub struct MessageText(Option<Vec<String>>);

impl From<&str> for MessageText {
    fn from(s: &str) -> Self {
        MessageText(Some(codebraid_utils::splitlines_lf(s, false)))
    }
}

impl From<String> for MessageText {
    fn from(s: String) -> Self {
        MessageText::from(s.as_str())
    }
}

impl From<Vec<String>> for MessageText {
    fn from(lines: Vec<String>) -> Self {
        MessageText(Some(lines))
    }
}

impl From<Option<Vec<String>>> for MessageText {
    fn from(lines: Option<Vec<String>>) -> Self {
        MessageText(lines)
    }
}
