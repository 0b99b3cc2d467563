use std::env;
use std::io::IsTerminal;

/// Output formatting for a single stream (stdout or stderr), selected once
/// at startup based on whether the stream is a TTY and which terminal
/// program is hosting it.
///
/// The original detects several additional special cases for Windows
/// consoles (legacy `conhost` column-wrap workarounds, `ConEmu`/`mintty`
/// ANSI support). This port targets the ANSI-capable terminals that make up
/// the overwhelming majority of CI and developer environments; the `Plain`
/// formatter is always a safe, correct fallback for anything else.
pub trait Formatter: Send + Sync {
    fn is_tty(&self) -> bool;
    fn columns(&self) -> usize;
    fn clearline(&self) -> &'static str;
    fn fmt_ok(&self, s: &str) -> String;
    fn fmt_error(&self, s: &str) -> String;
    fn fmt_warning(&self, s: &str) -> String;
    fn fmt_notify(&self, s: &str) -> String;
    fn fmt_delim(&self, s: &str) -> String;
}

pub struct PlainFormatter {
    is_tty: bool,
}

impl Formatter for PlainFormatter {
    fn is_tty(&self) -> bool {
        self.is_tty
    }
    fn columns(&self) -> usize {
        80
    }
    fn clearline(&self) -> &'static str {
        "\n"
    }
    fn fmt_ok(&self, s: &str) -> String {
        s.to_string()
    }
    fn fmt_error(&self, s: &str) -> String {
        s.to_string()
    }
    fn fmt_warning(&self, s: &str) -> String {
        s.to_string()
    }
    fn fmt_notify(&self, s: &str) -> String {
        s.to_string()
    }
    fn fmt_delim(&self, s: &str) -> String {
        s.to_string()
    }
}

pub struct AnsiFormatter;

impl Formatter for AnsiFormatter {
    fn is_tty(&self) -> bool {
        true
    }
    fn columns(&self) -> usize {
        terminal_size::terminal_size()
            .map(|(w, _)| w.0 as usize)
            .unwrap_or(80)
    }
    fn clearline(&self) -> &'static str {
        "\x1b[2K\r"
    }
    fn fmt_ok(&self, s: &str) -> String {
        format!("\x1b[92m{s}\x1b[0m")
    }
    fn fmt_error(&self, s: &str) -> String {
        format!("\x1b[91m{s}\x1b[0m")
    }
    fn fmt_warning(&self, s: &str) -> String {
        format!("\x1b[93m{s}\x1b[0m")
    }
    fn fmt_notify(&self, s: &str) -> String {
        format!("\x1b[96m{s}\x1b[0m")
    }
    fn fmt_delim(&self, s: &str) -> String {
        format!("\x1b[94m{s}\x1b[0m")
    }
}

/// Pick a formatter for a stream that is (or isn't) a terminal.
///
/// `supports_ansi` decides between the ANSI and plain formatter; the caller
/// passes the result of `std::io::IsTerminal` plus whatever additional
/// environment checks (`ALACRITTY_LOG`, `WT_SESSION`, `CONEMUANSI`,
/// `TERM_PROGRAM`) it wants to honor for its own platform.
pub fn select_formatter(is_tty: bool, supports_ansi: bool) -> Box<dyn Formatter> {
    if is_tty && supports_ansi {
        Box::new(AnsiFormatter)
    } else {
        Box::new(PlainFormatter { is_tty })
    }
}

/// Convenience constructor that inspects the real environment the way the
/// original inspects `ALACRITTY_LOG` / `WT_SESSION` / `CONEMUANSI` /
/// `TERM_PROGRAM` to decide whether a Windows host terminal supports ANSI.
/// On non-Windows hosts any TTY is assumed ANSI-capable.
pub fn formatter_for_stderr() -> Box<dyn Formatter> {
    let is_tty = std::io::stderr().is_terminal();
    let supports_ansi = !cfg!(windows)
        || env::var_os("ALACRITTY_LOG").is_some()
        || env::var_os("WT_SESSION").is_some()
        || env::var("CONEMUANSI").map(|v| v == "ON").unwrap_or(false)
        || env::var("TERM_PROGRAM").map(|v| v == "mintty").unwrap_or(false);
    select_formatter(is_tty, supports_ansi)
}

mod terminal_size {
    //! Minimal column-width probe via `TIOCGWINSZ`. Falls back to 80 when
    //! the ioctl is unavailable or the platform doesn't support it,
    //! matching the original's `_columns_default`.
    pub struct Width(pub u16);

    #[cfg(unix)]
    pub fn terminal_size() -> Option<(Width, Width)> {
        use std::mem::MaybeUninit;
        unsafe {
            let mut ws: MaybeUninit<libc::winsize> = MaybeUninit::zeroed();
            if libc::ioctl(libc::STDERR_FILENO, libc::TIOCGWINSZ, ws.as_mut_ptr()) == 0 {
                let ws = ws.assume_init();
                if ws.ws_col > 0 {
                    return Some((Width(ws.ws_col), Width(ws.ws_row)));
                }
            }
        }
        None
    }

    #[cfg(not(unix))]
    pub fn terminal_size() -> Option<(Width, Width)> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_formatter_passes_text_through_unchanged() {
        let f = PlainFormatter { is_tty: false };
        assert_eq!(f.fmt_error("boom"), "boom");
        assert_eq!(f.clearline(), "\n");
        assert_eq!(f.columns(), 80);
    }

    #[test]
    fn ansi_formatter_wraps_with_escape_codes() {
        let f = AnsiFormatter;
        assert_eq!(f.fmt_error("boom"), "\x1b[91mboom\x1b[0m");
        assert_eq!(f.fmt_ok("ok"), "\x1b[92mok\x1b[0m");
    }
}
