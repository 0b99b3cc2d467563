pub mod hash;
pub mod live;
pub mod run_program;
pub mod session;
pub mod source;

pub use hash::RollingHash;
pub use live::{LiveEvent, LiveSink, LiveSinkHandle};
pub use run_program::{delimiter, synthesize, RunProgram};
pub use session::Session;
pub use source::Source;
