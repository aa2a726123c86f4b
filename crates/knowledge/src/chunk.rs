//! Overlapping fixed-size text chunking.

use cortex_core::ConfigError;

/// Splits text into overlapping windows measured in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Chunker producing windows of at most `size` characters, each sharing
    /// `overlap` characters with its predecessor.
    pub fn new(size: usize, overlap: usize) -> Result<Self, ConfigError> {
        if size == 0 {
            return Err(ConfigError::NotPositive("indexer.chunk_size"));
        }
        if overlap >= size {
            return Err(ConfigError::OverlapTooLarge { size, overlap });
        }
        Ok(Self { size, overlap })
    }

    /// Maximum chunk length.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Characters shared by consecutive chunks.
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `content` into chunks that together cover all of it.
    ///
    /// Content no longer than the chunk size yields exactly one chunk, so empty
    /// content yields one empty chunk.
    pub fn split(&self, content: &str) -> Vec<String> {
        // Byte offset of every char boundary, end of string included.
        let mut bounds: Vec<usize> = content.char_indices().map(|(i, _)| i).collect();
        bounds.push(content.len());
        let len = bounds.len() - 1;

        let step = self.size - self.overlap;
        let mut chunks = Vec::with_capacity(len / step + 1);
        let mut start = 0;
        loop {
            let end = (start + self.size).min(len);
            chunks.push(content[bounds[start]..bounds[end]].to_string());
            if end == len {
                break;
            }
            start += step;
        }
        chunks
    }
}
