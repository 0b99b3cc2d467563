use std::sync::Arc;

/// One step of a session's run-stage execution that the live-output
/// multiplexer can display as it happens -- grounded on spec §4.J's
/// live_output framing blocks ("SESSION: START run", "CODE CHUNK: LIVE
/// OUTPUT"). Emitted only while `session.live_output` is set.
#[derive(Debug, Clone)]
pub enum LiveEvent {
    SessionStart,
    ChunkLine { chunk: usize, stderr: bool, line: String },
    SessionEnd,
}

/// Receives [`LiveEvent`]s from the subprocess executor's run stage.
///
/// The executor (`codebraid-exec`) only ever holds a shared reference to a
/// session's sink (`Arc<dyn LiveSink>`, stashed on [`crate::Session`]), so
/// implementations own their interior mutability -- grounded on spec §5's
/// "progress refreshes never interleave in the middle of a live-output
/// line", which requires a single serialized writer behind the trait.
pub trait LiveSink: Send + Sync {
    fn on_event(&self, event: LiveEvent);
}

pub type LiveSinkHandle = Arc<dyn LiveSink>;
