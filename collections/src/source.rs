use codebraid_chunk::CodeKey;
use codebraid_message::CodeStatus;

/// An ordered group of non-executed chunks displayed or exported together --
/// grounded on the `Source` half of `CodeCollection` (`code_collections.py`).
/// Sources never run, so they carry no hash, language, or output buffers --
/// only the chunk list and its message rollup.
pub struct Source {
    pub key: CodeKey,
    pub chunks: Vec<codebraid_chunk::CodeChunk>,
    pub status: CodeStatus,
}

impl Source {
    pub fn new(key: CodeKey) -> Self {
        Source {
            key,
            chunks: Vec::new(),
            status: CodeStatus::default(),
        }
    }

    pub fn push(&mut self, mut chunk: codebraid_chunk::CodeChunk) {
        chunk.index = Some(self.chunks.len());
        chunk.errors.register_status(&mut self.status);
        chunk.warnings.register_status(&mut self.status);
        self.chunks.push(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use codebraid_chunk::{CodeChunk, CollectionKind};
    use std::collections::HashMap;

    #[test]
    fn pushing_chunks_assigns_sequential_indices() {
        let key = CodeKey::new(Some("python".to_string()), None, CollectionKind::Source, None);
        let mut source = Source::new(key);
        for _ in 0..3 {
            source.push(CodeChunk::new(Some("code"), vec!["x = 1".to_string()], HashMap::new(), None, None, false));
        }
        assert_eq!(source.chunks[2].index, Some(2));
    }
}
