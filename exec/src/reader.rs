use std::collections::HashMap;

/// The in-band literal every framing delimiter starts with -- grounded on
/// the "delim start search pattern" in spec §4.E'/§4.G.
pub const DELIM_PREFIX: &str = "#Codebraid(";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelimKind {
    Start,
    End,
}

/// A parsed `#Codebraid(output=..., delim=..., chunk=..., output_chunk=..., hash=...)` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delim {
    pub output: String,
    pub kind: DelimKind,
    pub chunk: usize,
    pub output_chunk: usize,
    pub hash: String,
}

fn parse_fields(body: &str) -> Option<HashMap<&str, &str>> {
    let mut fields = HashMap::new();
    for part in body.split(", ") {
        let (k, v) = part.split_once('=')?;
        fields.insert(k, v);
    }
    Some(fields)
}

/// Parse one complete delimiter line, without its trailing newline, and
/// validate it against `expected_hash`. Returns `None` for anything that
/// isn't a well-formed delimiter *or* whose `hash` field doesn't match --
/// such bytes are treated as ordinary output by the caller, never as a
/// parse error -- grounded on spec §4.G step 5 ("`hash` must equal
/// `run_delim_hash`") and §9 ("treat unparseable or hash-mismatched
/// delimiter candidates as ordinary output bytes").
pub fn parse_delim(line: &str, expected_hash: &str) -> Option<Delim> {
    let line = line.trim_end_matches('\r');
    let rest = line.strip_prefix(DELIM_PREFIX)?.strip_suffix(')')?;
    let fields = parse_fields(rest)?;
    let output = (*fields.get("output")?).to_string();
    let kind = match *fields.get("delim")? {
        "start" => DelimKind::Start,
        "end" => DelimKind::End,
        _ => return None,
    };
    let chunk = fields.get("chunk")?.parse().ok()?;
    let output_chunk = fields.get("output_chunk")?.parse().ok()?;
    let hash = *fields.get("hash")?;
    if hash != expected_hash {
        return None;
    }
    Some(Delim { output, kind, chunk, output_chunk, hash: hash.to_string() })
}

/// One event produced by feeding raw bytes into a [`StreamSplitter`].
#[derive(Debug, PartialEq, Eq)]
pub enum StreamEvent {
    /// Ordinary output bytes (including a failed delimiter candidate, which
    /// is re-emitted verbatim per spec §4.G step 5's parse-failure rule).
    Text(Vec<u8>),
    Delim(Delim),
}

/// Splits a single raw byte stream (one process pipe) into text runs and
/// parsed delimiters -- grounded on the per-read state machine in spec
/// §4.G. Pure and synchronous: owns only its accumulation buffer, so it can
/// be driven from a real pipe or from a test without any async runtime.
///
/// Simplification versus the literal algorithm: a lone trailing `\r` that
/// might be the first half of a `\r\n` pair is not specially withheld across
/// reads. Every bundled language in this crate only ever emits `\n`, so the
/// distinction is unobservable in practice; `finish()` flushes whatever is
/// left regardless.
#[derive(Debug)]
pub struct StreamSplitter {
    buf: Vec<u8>,
    expected_hash: String,
}

fn find_subslice(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || hay.len() < needle.len() {
        return None;
    }
    hay.windows(needle.len()).position(|w| w == needle)
}

impl StreamSplitter {
    /// `expected_hash` is the session's `run_delim_hash`; only delimiter
    /// candidates carrying this exact hash are accepted as real framing
    /// markers, so a user program printing a lookalike `#Codebraid(...)`
    /// line with a foreign or absent hash can never forge one.
    pub fn new(expected_hash: impl Into<String>) -> Self {
        StreamSplitter { buf: Vec::new(), expected_hash: expected_hash.into() }
    }

    /// Feed freshly-read bytes in, draining as many complete text runs and
    /// delimiters as the current buffer supports.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buf.extend_from_slice(bytes);
        let mut events = Vec::new();
        loop {
            match find_subslice(&self.buf, DELIM_PREFIX.as_bytes()) {
                Some(pos) => {
                    let mut text_end = pos;
                    if text_end > 0 && self.buf[text_end - 1] == b'\n' {
                        text_end -= 1;
                        if text_end > 0 && self.buf[text_end - 1] == b'\r' {
                            text_end -= 1;
                        }
                    }
                    if text_end > 0 {
                        events.push(StreamEvent::Text(self.buf[..text_end].to_vec()));
                    }
                    match self.buf[pos..].iter().position(|&b| b == b'\n') {
                        Some(rel_nl) => {
                            let line_end = pos + rel_nl;
                            let line = String::from_utf8_lossy(&self.buf[pos..line_end]).into_owned();
                            match parse_delim(&line, &self.expected_hash) {
                                Some(d) => events.push(StreamEvent::Delim(d)),
                                None => events.push(StreamEvent::Text(self.buf[pos..=line_end].to_vec())),
                            }
                            self.buf.drain(..=line_end);
                        }
                        None => {
                            // Incomplete delimiter line; wait for more bytes.
                            self.buf.drain(..pos);
                            break;
                        }
                    }
                }
                None => {
                    if let Some(last_nl) = self.buf.iter().rposition(|&b| b == b'\n') {
                        events.push(StreamEvent::Text(self.buf[..=last_nl].to_vec()));
                        self.buf.drain(..=last_nl);
                    }
                    break;
                }
            }
        }
        events
    }

    /// Flush whatever partial line remains once the stream has hit EOF.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        if self.buf.is_empty() {
            Vec::new()
        } else {
            vec![StreamEvent::Text(std::mem::take(&mut self.buf))]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_well_formed_delimiter() {
        let d = parse_delim("#Codebraid(output=stdout, delim=start, chunk=0, output_chunk=0, hash=abc123)", "abc123").unwrap();
        assert_eq!(d.output, "stdout");
        assert_eq!(d.kind, DelimKind::Start);
        assert_eq!(d.chunk, 0);
        assert_eq!(d.output_chunk, 0);
        assert_eq!(d.hash, "abc123");
    }

    #[test]
    fn rejects_malformed_delimiter_candidates() {
        assert!(parse_delim("#Codebraid(output=stdout, delim=maybe)", "abc123").is_none());
        assert!(parse_delim("#Codebraid(not even close)", "abc123").is_none());
    }

    #[test]
    fn rejects_a_delimiter_whose_hash_does_not_match() {
        let line = "#Codebraid(output=stdout, delim=start, chunk=0, output_chunk=0, hash=deadbeef)";
        assert!(parse_delim(line, "abc123").is_none());
    }

    #[test]
    fn feed_splits_plain_text_and_delimiter_in_one_call() {
        let mut s = StreamSplitter::new("h");
        let input = b"hi\n#Codebraid(output=stdout, delim=end, chunk=0, output_chunk=0, hash=h)\nmore\n";
        let events = s.feed(input);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::Text(b"hi\n".to_vec()));
        assert!(matches!(&events[1], StreamEvent::Delim(d) if d.kind == DelimKind::End));
        assert_eq!(events[2], StreamEvent::Text(b"more\n".to_vec()));
    }

    #[test]
    fn feed_holds_an_incomplete_delimiter_line_across_calls() {
        let mut s = StreamSplitter::new("zz");
        let first = s.feed(b"ok\n#Codebraid(output=stdout, delim=start");
        assert_eq!(first, vec![StreamEvent::Text(b"ok\n".to_vec())]);
        let second = s.feed(b", chunk=1, output_chunk=1, hash=zz)\n");
        assert_eq!(second.len(), 1);
        assert!(matches!(&second[0], StreamEvent::Delim(d) if d.chunk == 1));
    }

    #[test]
    fn bogus_hash_prefixed_text_is_kept_as_output() {
        let mut s = StreamSplitter::new("h");
        let events = s.feed(b"#Codebraid(this is not real)\nafter\n");
        assert_eq!(events[0], StreamEvent::Text(b"#Codebraid(this is not real)\n".to_vec()));
        assert_eq!(events[1], StreamEvent::Text(b"after\n".to_vec()));
    }

    #[test]
    fn a_delimiter_with_the_wrong_hash_is_emitted_as_text_not_delim() {
        let mut s = StreamSplitter::new("abc123");
        let input = b"#Codebraid(output=stdout, delim=start, chunk=0, output_chunk=0, hash=deadbeef)\n";
        let events = s.feed(input);
        assert_eq!(events, vec![StreamEvent::Text(input.to_vec())]);
    }

    #[test]
    fn finish_flushes_a_trailing_partial_line() {
        let mut s = StreamSplitter::new("h");
        s.feed(b"partial");
        assert_eq!(s.finish(), vec![StreamEvent::Text(b"partial".to_vec())]);
    }
}
