use codebraid_collections::{Session, Source};

/// `0x04` if any session has `prevent_exec`; `0x08` if any session has
/// errors without `prevent_exec`, or any source has errors; `0x10` if any
/// session has warnings. Bits are XORed together -- grounded on spec §6's
/// exit-code bit table and invariant 7 (§8).
pub fn compute_exit_code(sessions: &[Session], sources: &[Source]) -> u8 {
    let any_prevent_exec = sessions.iter().any(|s| s.status.prevent_exec);
    let any_session_errors_unblocked = sessions.iter().any(|s| s.status.has_errors() && !s.status.prevent_exec);
    let any_source_errors = sources.iter().any(|s| s.status.has_errors());
    let any_warnings = sessions.iter().any(|s| s.status.has_warnings());

    let mut code = 0u8;
    if any_prevent_exec {
        code ^= 0x04;
    }
    if any_session_errors_unblocked || any_source_errors {
        code ^= 0x08;
    }
    if any_warnings {
        code ^= 0x10;
    }
    code
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebraid_chunk::{CodeKey, CollectionKind};

    fn session() -> Session {
        Session::new(CodeKey::new(Some("python".to_string()), None, CollectionKind::Session, None))
    }

    fn source() -> Source {
        Source::new(CodeKey::new(Some("python".to_string()), None, CollectionKind::Source, None))
    }

    #[test]
    fn clean_build_is_zero() {
        assert_eq!(compute_exit_code(&[session()], &[source()]), 0);
    }

    #[test]
    fn prevent_exec_sets_bit_four() {
        let mut s = session();
        s.status.prevent_exec = true;
        assert_eq!(compute_exit_code(&[s], &[]), 0x04);
    }

    #[test]
    fn errors_and_warnings_combine() {
        let mut s = session();
        s.status.error_count = 1;
        s.status.warning_count = 1;
        assert_eq!(compute_exit_code(&[s], &[]), 0x08 ^ 0x10);
    }

    #[test]
    fn errors_that_also_prevent_exec_do_not_double_count_bit_eight() {
        let mut s = session();
        s.status.prevent_exec = true;
        s.status.error_count = 1;
        assert_eq!(compute_exit_code(&[s], &[]), 0x04);
    }

    #[test]
    fn source_errors_alone_set_bit_eight() {
        let mut src = source();
        src.status.error_count = 1;
        assert_eq!(compute_exit_code(&[], &[src]), 0x08);
    }
}
