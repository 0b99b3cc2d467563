use serde::{Deserialize, Serialize};

/// Every concrete error or warning kind the execution core can attach to a
/// chunk, session, or source.
///
/// The original derives these properties (`is_cacheable`, `prevent_caching`,
/// `prevent_exec`, `is_stderr`, `is_ref`) via a metaclass that inspects each
/// class's name and asserts consistency rules at class-creation time
/// (`Error` names must set `prevent_exec` unless also named `CanExec`;
/// `Warning` names must never set `prevent_caching`/`prevent_exec`;
/// non-cacheable messages must be `Source*` or `SysConfig*`). Rust has no
/// class-creation hook to run those assertions at, so they are encoded
/// directly in the `match` arms below and re-checked by `invariants_hold`,
/// which the test module asserts for every variant -- the same guarantee,
/// checked at test time instead of class-definition time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    SourceError,
    CanExecSourceError,
    RuntimeSourceError,
    SysConfigError,
    CompileError,
    PreRunError,
    RunError,
    StderrRunError,
    StderrRunErrorRef,
    RunConfigError,
    PostRunError,
    DecodeError,

    SourceWarning,
    RunWarning,
    StderrRunWarning,
    StderrRunWarningRef,
}

impl MessageKind {
    pub const ALL: [MessageKind; 16] = [
        MessageKind::SourceError,
        MessageKind::CanExecSourceError,
        MessageKind::RuntimeSourceError,
        MessageKind::SysConfigError,
        MessageKind::CompileError,
        MessageKind::PreRunError,
        MessageKind::RunError,
        MessageKind::StderrRunError,
        MessageKind::StderrRunErrorRef,
        MessageKind::RunConfigError,
        MessageKind::PostRunError,
        MessageKind::DecodeError,
        MessageKind::SourceWarning,
        MessageKind::RunWarning,
        MessageKind::StderrRunWarning,
        MessageKind::StderrRunWarningRef,
    ];

    pub const fn is_error(self) -> bool {
        !self.is_warning()
    }

    pub const fn is_warning(self) -> bool {
        matches!(
            self,
            MessageKind::SourceWarning
                | MessageKind::RunWarning
                | MessageKind::StderrRunWarning
                | MessageKind::StderrRunWarningRef
        )
    }

    /// General category this message belongs to, used for grouping in
    /// progress summaries.
    pub const fn category(self) -> &'static str {
        match self {
            MessageKind::SourceError | MessageKind::CanExecSourceError | MessageKind::SourceWarning => "source",
            MessageKind::RuntimeSourceError => "runtime_source",
            MessageKind::SysConfigError => "sys_config",
            MessageKind::CompileError => "compile",
            MessageKind::PreRunError => "pre-run",
            MessageKind::RunError
            | MessageKind::StderrRunError
            | MessageKind::StderrRunErrorRef
            | MessageKind::RunWarning
            | MessageKind::StderrRunWarning
            | MessageKind::StderrRunWarningRef => "run",
            MessageKind::RunConfigError => "run_config",
            MessageKind::PostRunError => "post-run",
            MessageKind::DecodeError => "encoding",
        }
    }

    /// Whether this message is preserved across a cache reload. Messages
    /// that are not cacheable must be regenerated every time the document
    /// is rebuilt (they are detected before any code ever executes, so
    /// regenerating them is trivial).
    pub const fn is_cacheable(self) -> bool {
        matches!(
            self,
            MessageKind::RuntimeSourceError
                | MessageKind::CompileError
                | MessageKind::PreRunError
                | MessageKind::RunError
                | MessageKind::StderrRunError
                | MessageKind::StderrRunErrorRef
                | MessageKind::RunConfigError
                | MessageKind::PostRunError
                | MessageKind::DecodeError
                | MessageKind::RunWarning
                | MessageKind::StderrRunWarning
                | MessageKind::StderrRunWarningRef
        )
    }

    /// Whether this message prevents *all* caching for its owning
    /// collection, not just its own cacheability.
    pub const fn prevent_caching(self) -> bool {
        matches!(self, MessageKind::SourceError | MessageKind::SysConfigError)
    }

    /// Whether this message is severe enough to halt any further code
    /// execution in its owning collection.
    pub const fn prevent_exec(self) -> bool {
        matches!(
            self,
            MessageKind::SourceError
                | MessageKind::RuntimeSourceError
                | MessageKind::SysConfigError
                | MessageKind::CompileError
                | MessageKind::PreRunError
                | MessageKind::RunError
                | MessageKind::StderrRunError
                | MessageKind::StderrRunErrorRef
                | MessageKind::RunConfigError
                | MessageKind::PostRunError
                | MessageKind::DecodeError
        )
    }

    /// Whether this message is simply a copy of text already present in
    /// stderr (as opposed to a synthesized message).
    pub const fn is_stderr(self) -> bool {
        matches!(
            self,
            MessageKind::StderrRunError
                | MessageKind::StderrRunErrorRef
                | MessageKind::StderrRunWarning
                | MessageKind::StderrRunWarningRef
        )
    }

    /// Whether this message is a reference to another message's text rather
    /// than an independent copy of it.
    pub const fn is_ref(self) -> bool {
        matches!(self, MessageKind::StderrRunErrorRef | MessageKind::StderrRunWarningRef)
    }

    /// Stable string identity used as the cache's `type` tag and for
    /// display. Kept distinct from `#[derive(Serialize)]`'s own tag so the
    /// cache format doesn't silently change if the enum's serde
    /// representation ever does.
    pub const fn type_name(self) -> &'static str {
        match self {
            MessageKind::SourceError => "SourceError",
            MessageKind::CanExecSourceError => "CanExecSourceError",
            MessageKind::RuntimeSourceError => "RuntimeSourceError",
            MessageKind::SysConfigError => "SysConfigError",
            MessageKind::CompileError => "CompileError",
            MessageKind::PreRunError => "PreRunError",
            MessageKind::RunError => "RunError",
            MessageKind::StderrRunError => "StderrRunError",
            MessageKind::StderrRunErrorRef => "StderrRunErrorRef",
            MessageKind::RunConfigError => "RunConfigError",
            MessageKind::PostRunError => "PostRunError",
            MessageKind::DecodeError => "DecodeError",
            MessageKind::SourceWarning => "SourceWarning",
            MessageKind::RunWarning => "RunWarning",
            MessageKind::StderrRunWarning => "StderrRunWarning",
            MessageKind::StderrRunWarningRef => "StderrRunWarningRef",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Re-derivation of `MetaMessage`'s class-creation assertions, checked
    /// once per variant instead of once per Python class statement.
    fn invariants_hold(kind: MessageKind) -> bool {
        if kind.prevent_caching() && kind.is_cacheable() {
            return false;
        }
        if !kind.is_cacheable() && kind.category() != "source" && kind.category() != "sys_config" {
            return false;
        }
        if kind.is_warning() && (kind.prevent_caching() || kind.prevent_exec()) {
            return false;
        }
        if kind.is_error() && !kind.prevent_exec() && kind != MessageKind::CanExecSourceError {
            return false;
        }
        true
    }

    #[test]
    fn every_kind_satisfies_metamessage_invariants() {
        for kind in MessageKind::ALL {
            assert!(invariants_hold(kind), "{:?} violates MetaMessage invariants", kind);
        }
    }

    #[test]
    fn stderr_and_ref_bits_follow_naming() {
        assert!(MessageKind::StderrRunError.is_stderr());
        assert!(!MessageKind::StderrRunError.is_ref());
        assert!(MessageKind::StderrRunErrorRef.is_stderr());
        assert!(MessageKind::StderrRunErrorRef.is_ref());
        assert!(!MessageKind::RunError.is_stderr());
    }
}
