/// Split on `\n` only, never on the wider set of line separators
/// `str::lines()`-style helpers use internally.
///
/// Byte streams coming out of a child process have already had `\r\n?`
/// normalized to `\n` by the time they reach this function, so splitting on
/// anything else would silently fragment lines that contain a literal `\v`
/// or `\f` byte.
///
/// When `last_lf_stripped` is `false` (the common case), a trailing `\n`
/// does not produce an extra empty final element -- mirroring how a text
/// editor presents "this file has N lines" rather than "N+1, the last one
/// empty".
pub fn splitlines_lf(s: &str, last_lf_stripped: bool) -> Vec<String> {
    let mut lines: Vec<String> = s.split('\n').map(str::to_owned).collect();
    if !last_lf_stripped && (s.is_empty() || s.ends_with('\n')) {
        lines.pop();
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_lines() {
        assert_eq!(splitlines_lf("a\nb\nc", false), vec!["a", "b", "c"]);
    }

    #[test]
    fn trailing_newline_does_not_add_empty_line() {
        assert_eq!(splitlines_lf("a\nb\n", false), vec!["a", "b"]);
    }

    #[test]
    fn last_lf_stripped_keeps_trailing_empty_element() {
        assert_eq!(splitlines_lf("a\nb\n", true), vec!["a", "b", ""]);
    }

    #[test]
    fn empty_string_without_trailing_flag_yields_no_lines() {
        assert_eq!(splitlines_lf("", false), Vec::<String>::new());
    }

    #[test]
    fn never_splits_on_vertical_tab_or_form_feed() {
        assert_eq!(splitlines_lf("a\x0bb\nc", false), vec!["a\x0bb", "c"]);
    }
}
