use codebraid_collections::{LiveEvent, LiveSink};
use codebraid_utils::Formatter;
use std::collections::VecDeque;
use std::io::Write;
use std::sync::Mutex;

/// Which half of a session's subprocess a live-output fragment came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

struct MuxState {
    /// The stream whose last write did not end in `\n`, if any -- the
    /// opposite stream's fragments queue behind it so a live-output line
    /// never gets interleaved mid-line (spec §4.J / §5).
    pending: Option<Stream>,
    queue: VecDeque<(Stream, String)>,
    current_chunk: Option<usize>,
}

/// Interleaves a session's live stdout/stderr for display as it runs,
/// wrapping each chunk's span in the original's "SESSION: START run" /
/// "CODE CHUNK: LIVE OUTPUT" framing -- grounded on spec §4.J.
///
/// [`LiveSink::on_event`] is called from the executor's `tokio::select!`
/// loop, which already delivers complete lines; [`Self::push_fragment`] is
/// exposed separately and takes arbitrary (possibly newline-less) text, so
/// the line-interleaving-avoidance rule is real and independently testable
/// rather than trivially always true for whole-line input.
pub struct LiveOutputMux {
    formatter: Box<dyn Formatter>,
    writer: Mutex<(Box<dyn Write + Send>, MuxState)>,
}

impl LiveOutputMux {
    pub fn new(formatter: Box<dyn Formatter>, writer: Box<dyn Write + Send>) -> Self {
        LiveOutputMux {
            formatter,
            writer: Mutex::new((
                writer,
                MuxState { pending: None, queue: VecDeque::new(), current_chunk: None },
            )),
        }
    }

    pub fn stderr(formatter: Box<dyn Formatter>) -> Self {
        LiveOutputMux::new(formatter, Box::new(std::io::stderr()))
    }

    /// Feed one raw fragment from `stream`. A fragment that doesn't end in
    /// `\n` marks `stream` as pending; fragments from the other stream are
    /// queued until the pending stream completes its line. A stderr
    /// fragment starting with `\r` forces the pending stdout line closed
    /// first, matching a carriage-return-driven progress refresh breaking
    /// into a live-output span.
    pub fn push_fragment(&self, stream: Stream, text: &str) {
        let mut guard = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        let (writer, state) = &mut *guard;
        Self::push_locked(writer, state, stream, text);
    }

    fn push_locked(writer: &mut Box<dyn Write + Send>, state: &mut MuxState, stream: Stream, text: &str) {
        if stream == Stream::Stderr && text.starts_with('\r') && state.pending == Some(Stream::Stdout) {
            let _ = writer.write_all(b"\n");
            state.pending = None;
        }
        if let Some(other) = state.pending {
            if other != stream {
                state.queue.push_back((stream, text.to_string()));
                return;
            }
        }
        let _ = writer.write_all(text.as_bytes());
        if text.ends_with('\n') {
            state.pending = None;
            while state.pending.is_none() {
                match state.queue.pop_front() {
                    Some((s, t)) => Self::push_locked(writer, state, s, &t),
                    None => break,
                }
            }
        } else {
            state.pending = Some(stream);
        }
    }

    fn write_framing_line(&self, line: &str) {
        let mut guard = self.writer.lock().unwrap_or_else(|p| p.into_inner());
        let (writer, state) = &mut *guard;
        if state.pending.is_some() {
            let _ = writer.write_all(b"\n");
            state.pending = None;
        }
        let _ = writeln!(writer, "{line}");
    }
}

impl LiveSink for LiveOutputMux {
    fn on_event(&self, event: LiveEvent) {
        match event {
            LiveEvent::SessionStart => {
                self.write_framing_line(&self.formatter.fmt_notify("SESSION: START run"));
            }
            LiveEvent::ChunkLine { chunk, stderr, line } => {
                let is_new_chunk = {
                    let mut guard = self.writer.lock().unwrap_or_else(|p| p.into_inner());
                    let (_, state) = &mut *guard;
                    let is_new = state.current_chunk != Some(chunk);
                    state.current_chunk = Some(chunk);
                    is_new
                };
                if is_new_chunk {
                    self.write_framing_line(&self.formatter.fmt_delim(&format!("CODE CHUNK: LIVE OUTPUT (chunk {chunk})")));
                }
                let stream = if stderr { Stream::Stderr } else { Stream::Stdout };
                self.push_fragment(stream, &format!("{line}\n"));
            }
            LiveEvent::SessionEnd => {
                self.write_framing_line(&self.formatter.fmt_notify("SESSION: END run"));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            #[allow(clippy::unwrap_used)]
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn mux() -> (LiveOutputMux, SharedBuf) {
        let buf = SharedBuf::default();
        let formatter = codebraid_utils::select_formatter(false, false);
        (LiveOutputMux::new(formatter, Box::new(buf.clone())), buf)
    }

    fn contents(buf: &SharedBuf) -> String {
        #[allow(clippy::unwrap_used)]
        String::from_utf8(buf.0.lock().unwrap().clone()).unwrap()
    }

    #[test]
    fn whole_lines_from_both_streams_pass_straight_through() {
        let (m, buf) = mux();
        m.push_fragment(Stream::Stdout, "hello\n");
        m.push_fragment(Stream::Stderr, "world\n");
        assert_eq!(contents(&buf), "hello\nworld\n");
    }

    #[test]
    fn an_unterminated_line_blocks_the_other_stream_until_flushed() {
        let (m, buf) = mux();
        m.push_fragment(Stream::Stdout, "partial");
        m.push_fragment(Stream::Stderr, "interrupt\n");
        // the stderr fragment is queued, not interleaved mid-line
        assert_eq!(contents(&buf), "partial");
        m.push_fragment(Stream::Stdout, " line\n");
        assert_eq!(contents(&buf), "partial line\ninterrupt\n");
    }

    #[test]
    fn stderr_leading_carriage_return_forces_a_new_line() {
        let (m, buf) = mux();
        m.push_fragment(Stream::Stdout, "building...");
        m.push_fragment(Stream::Stderr, "\rwarning: foo\n");
        assert_eq!(contents(&buf), "building...\nwarning: foo\n");
    }

    #[test]
    fn new_chunk_gets_a_framing_line_once() {
        let (m, buf) = mux();
        m.on_event(LiveEvent::SessionStart);
        m.on_event(LiveEvent::ChunkLine { chunk: 0, stderr: false, line: "a".to_string() });
        m.on_event(LiveEvent::ChunkLine { chunk: 0, stderr: false, line: "b".to_string() });
        m.on_event(LiveEvent::ChunkLine { chunk: 1, stderr: false, line: "c".to_string() });
        m.on_event(LiveEvent::SessionEnd);
        let text = contents(&buf);
        assert_eq!(text.matches("CODE CHUNK: LIVE OUTPUT").count(), 2);
        assert!(text.contains("SESSION: START run"));
        assert!(text.contains("SESSION: END run"));
    }
}
