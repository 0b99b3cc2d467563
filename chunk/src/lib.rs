pub mod chunk;
pub mod include;
pub mod key;
pub mod options;

pub use chunk::{split_code, ChunkError, CodeChunk, RichOutput, COMMANDS};
pub use include::{Include, IncludeOptions};
pub use key::{CodeKey, CollectionKind};
pub use options::{ChunkContext, OptionValue, Options, RawValue};
