//! Line-window fallback chunker.
//!
//! Accumulates lines until the pending chunk would exceed the maximum size,
//! emits it, and seeds the next chunk with a suffix overlap of whole lines.

use crate::types::CodeChunk;

/// Chunker that splits content into overlapping line windows.
#[derive(Debug, Clone)]
pub struct TextChunker {
    max_chunk_size: usize,
    min_chunk_size: usize,
    chunk_overlap: usize,
}

impl TextChunker {
    pub fn new(max_chunk_size: usize, min_chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            max_chunk_size,
            min_chunk_size,
            chunk_overlap,
        }
    }

    /// Chunk a file into `text_block` windows.
    ///
    /// A window is emitted when adding the next line would exceed
    /// `max_chunk_size` and the pending content meets `min_chunk_size`.
    /// If nothing ever meets the floor but the file is non-empty, one
    /// whole-file `module` chunk is emitted instead.
    pub fn chunk_file(&self, content: &str, path: &str, language: &str) -> Vec<CodeChunk> {
        let mut chunks = Vec::new();

        if content.trim().is_empty() {
            return chunks;
        }

        let lines: Vec<&str> = content.split('\n').collect();
        let mut pending: Vec<&str> = Vec::new();
        let mut pending_start_line = 1usize;
        let mut pending_size = 0usize;

        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx + 1;
            let line_size = line.len() + 1;

            if pending_size + line_size > self.max_chunk_size && !pending.is_empty() {
                let chunk_content = pending.join("\n");
                if chunk_content.len() >= self.min_chunk_size {
                    chunks.push(CodeChunk {
                        content: chunk_content,
                        path: path.to_string(),
                        start_line: pending_start_line as i64,
                        end_line: (line_no - 1) as i64,
                        language: language.to_string(),
                        chunk_type: "text_block".to_string(),
                        name: None,
                    });
                }

                let overlap = self.overlap_lines(&pending);
                pending_start_line = line_no - overlap.len();
                pending_size = overlap.iter().map(|l| l.len() + 1).sum();
                pending = overlap;
            }

            pending.push(line);
            pending_size += line_size;
        }

        if !pending.is_empty() {
            let chunk_content = pending.join("\n");
            if chunk_content.len() >= self.min_chunk_size {
                chunks.push(CodeChunk {
                    content: chunk_content,
                    path: path.to_string(),
                    start_line: pending_start_line as i64,
                    end_line: lines.len() as i64,
                    language: language.to_string(),
                    chunk_type: "text_block".to_string(),
                    name: None,
                });
            }
        }

        if chunks.is_empty() {
            chunks.push(CodeChunk {
                content: content.to_string(),
                path: path.to_string(),
                start_line: 1,
                end_line: lines.len() as i64,
                language: language.to_string(),
                chunk_type: "module".to_string(),
                name: None,
            });
        }

        chunks
    }

    /// Last whole lines whose combined length stays within `chunk_overlap`.
    fn overlap_lines<'a>(&self, lines: &[&'a str]) -> Vec<&'a str> {
        let mut overlap = Vec::new();
        let mut size = 0usize;

        for line in lines.iter().rev() {
            if size + line.len() > self.chunk_overlap {
                break;
            }
            overlap.insert(0, *line);
            size += line.len() + 1;
        }

        overlap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_yields_single_module_chunk() {
        let chunker = TextChunker::new(1500, 100, 200);
        let chunks = chunker.chunk_file("tiny\n", "/repo/f.txt", "text");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, "module");
        assert_eq!(chunks[0].start_line, 1);
    }

    #[test]
    fn empty_content_yields_nothing() {
        let chunker = TextChunker::new(1500, 100, 200);
        assert!(chunker.chunk_file("  \n \n", "/repo/f.txt", "text").is_empty());
    }

    #[test]
    fn long_content_splits_into_text_blocks() {
        let chunker = TextChunker::new(200, 50, 40);
        let content = (0..40)
            .map(|i| format!("line number {i} with some padding text"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunker.chunk_file(&content, "/repo/big.txt", "text");

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert_eq!(chunk.chunk_type, "text_block");
            assert!(chunk.start_line >= 1);
            assert!(chunk.end_line >= chunk.start_line);
        }
    }

    #[test]
    fn consecutive_chunks_overlap_by_whole_lines() {
        let chunker = TextChunker::new(120, 20, 50);
        let content = (0..20)
            .map(|i| format!("abcdefghij {i:02}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunker.chunk_file(&content, "/repo/b.txt", "text");
        assert!(chunks.len() > 1);

        // Each successor starts at or before the line after its predecessor's
        // end: the seeded overlap pulls the start back.
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line + 1);
        }
    }

    #[test]
    fn line_numbers_cover_the_file() {
        let chunker = TextChunker::new(100, 10, 0);
        let content = (0..12)
            .map(|i| format!("0123456789012345678901234567890 {i}"))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunker.chunk_file(&content, "/repo/c.txt", "text");
        assert_eq!(chunks.first().unwrap().start_line, 1);
        assert_eq!(chunks.last().unwrap().end_line, 12);
    }
}
