pub mod resolver;

pub use resolver::{resolve_code_copying, resolve_output_copying};
