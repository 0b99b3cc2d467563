//! Runs one subprocess-backed execution session: assembles the session's
//! run program, spawns each of the language's exec stages, and parses the
//! in-band delimiters threaded through the child's stdout/stderr back onto
//! the originating chunks.

pub mod reader;
pub mod rewrite;
pub mod stage;
pub mod subprocess;

pub use reader::{parse_delim, Delim, DelimKind, StreamEvent, StreamSplitter, DELIM_PREFIX};
pub use rewrite::{rewrite_output, RewriteResult};
pub use stage::{build_command_line, build_stage_commands, StageError, StageVars};
pub use subprocess::{execute_session, ExecError};
