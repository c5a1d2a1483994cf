//! Line-based fallback chunking
//!
//! Segments a file by line count and byte budget. Used directly for
//! non-code files and as the escape hatch when AST parsing fails or a
//! merged AST chunk exceeds the size cap.

use super::LineIndex;
use crate::types::{Chunk, ChunkType};

/// Producer name stamped on line-based chunks
pub const READLINE_PARSER: &str = "readline_parser";

pub struct LineChunker {
    lines_per_chunk: usize,
    max_chunk_bytes: usize,
}

impl LineChunker {
    pub fn new(lines_per_chunk: usize, max_chunk_bytes: usize) -> Self {
        Self {
            lines_per_chunk,
            max_chunk_bytes,
        }
    }

    /// Chunk a whole file into `line_based` chunks
    pub fn chunk(&self, bytes: &[u8], path: &str, language: &str) -> Vec<Chunk> {
        self.chunk_with_type(bytes, path, language, ChunkType::LineBased)
    }

    /// Chunk a whole file as the AST chunker's escape hatch (`fallback`)
    pub fn chunk_as_fallback(&self, bytes: &[u8], path: &str, language: &str) -> Vec<Chunk> {
        self.chunk_with_type(bytes, path, language, ChunkType::Fallback)
    }

    fn chunk_with_type(
        &self,
        bytes: &[u8],
        path: &str,
        language: &str,
        chunk_type: ChunkType,
    ) -> Vec<Chunk> {
        let index = LineIndex::new(bytes);
        if index.line_count() == 0 {
            return Vec::new();
        }

        let mut chunks = Vec::new();
        for (start, end) in self.split_ranges(&index, 1, index.line_count()) {
            let content = bounded_content(&index, start, end, self.max_chunk_bytes, path);

            // Skip whitespace-only regions
            if content.trim().is_empty() {
                continue;
            }

            chunks.push(Chunk {
                chunk_id: Chunk::compute_id(path, start, end),
                file_path: path.to_string(),
                language: language.to_string(),
                start_line: start,
                end_line: end,
                content,
                chunk_type,
                parser: READLINE_PARSER.to_string(),
                name: None,
            });
        }
        chunks
    }

    /// Compute the line ranges a region splits into, honoring both the line
    /// budget and the byte cap. Ranges are 1-based inclusive.
    ///
    /// A single line longer than the byte cap still gets its own range; the
    /// caller bounds its content.
    pub(crate) fn split_ranges(
        &self,
        index: &LineIndex<'_>,
        start_line: usize,
        end_line: usize,
    ) -> Vec<(usize, usize)> {
        let mut ranges = Vec::new();
        let mut chunk_start = start_line;
        let mut chunk_lines = 0usize;
        let mut chunk_bytes = 0usize;

        for line in start_line..=end_line {
            let line_len = index.line_len(line);
            let projected = if chunk_lines == 0 {
                line_len
            } else {
                chunk_bytes + 1 + line_len
            };

            if chunk_lines > 0
                && (chunk_lines >= self.lines_per_chunk || projected > self.max_chunk_bytes)
            {
                ranges.push((chunk_start, line - 1));
                chunk_start = line;
                chunk_lines = 0;
                chunk_bytes = 0;
            }

            chunk_bytes = if chunk_lines == 0 {
                line_len
            } else {
                chunk_bytes + 1 + line_len
            };
            chunk_lines += 1;
        }

        if chunk_lines > 0 {
            ranges.push((chunk_start, end_line));
        }
        ranges
    }
}

/// Extract a range's content, enforcing the byte cap even for a single line
/// that exceeds it (truncated at a character boundary, with a warning).
pub(crate) fn bounded_content(
    index: &LineIndex<'_>,
    start: usize,
    end: usize,
    max_bytes: usize,
    path: &str,
) -> String {
    let mut content = index.slice_string(start, end);
    if content.len() > max_bytes {
        let mut cut = max_bytes;
        while cut > 0 && !content.is_char_boundary(cut) {
            cut -= 1;
        }
        tracing::warn!(
            "Truncating oversized single-line region {}:{}..{} from {} to {} bytes",
            path,
            start,
            end,
            content.len(),
            cut
        );
        content.truncate(cut);
    }
    content
}
