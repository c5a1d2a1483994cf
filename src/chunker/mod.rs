//! Code chunking: language registry, AST chunker, and line-based fallback
//!
//! The registry maps file extensions to language plugins; the AST chunker
//! walks tree-sitter syntax trees and emits typed, merged, size-bounded
//! chunks; the line chunker handles everything else.

mod ast;
mod languages;
mod line;
mod registry;

pub use ast::AstChunker;
pub use languages::{LanguagePlugin, NAME_KINDS};
pub use line::LineChunker;
pub use registry::{language_tag, plugin_for_extension, routes_to_line_chunker, LanguageRegistry};

/// Byte-offset index of line boundaries in a source buffer
///
/// All grammar offsets are byte offsets into the UTF-8 buffer; this index is
/// the only way chunk content is extracted, so character-indexed slicing can
/// never sneak in.
#[derive(Debug)]
pub struct LineIndex<'a> {
    bytes: &'a [u8],
    /// Byte offset of the start of each line; line numbers are 1-based,
    /// so line n starts at `starts[n - 1]`.
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        let mut starts = vec![0];
        for (i, &b) in bytes.iter().enumerate() {
            if b == b'\n' {
                starts.push(i + 1);
            }
        }
        // A trailing newline opens a phantom empty line; drop it so the
        // last line is the last one with content.
        if bytes.ends_with(b"\n") && starts.len() > 1 {
            starts.pop();
        }
        Self { bytes, starts }
    }

    /// Number of lines in the buffer (0 for an empty buffer)
    pub fn line_count(&self) -> usize {
        if self.bytes.is_empty() {
            0
        } else {
            self.starts.len()
        }
    }

    /// Byte length of line `n` (1-based), excluding the newline
    pub fn line_len(&self, line: usize) -> usize {
        let start = self.starts[line - 1];
        let end = self.line_end(line);
        end - start
    }

    /// Exact bytes of lines [start_line..=end_line], newline-joined,
    /// without trailing newline
    pub fn slice_lines(&self, start_line: usize, end_line: usize) -> &'a [u8] {
        debug_assert!(start_line >= 1 && end_line >= start_line);
        let start = self.starts[start_line - 1];
        let end = self.line_end(end_line.min(self.line_count().max(1)));
        &self.bytes[start..end]
    }

    /// Lines [start_line..=end_line] as a String (lossy for invalid UTF-8)
    pub fn slice_string(&self, start_line: usize, end_line: usize) -> String {
        String::from_utf8_lossy(self.slice_lines(start_line, end_line)).into_owned()
    }

    /// Byte length of the content for lines [start_line..=end_line]
    pub fn span_len(&self, start_line: usize, end_line: usize) -> usize {
        self.slice_lines(start_line, end_line).len()
    }

    fn line_end(&self, line: usize) -> usize {
        if line < self.starts.len() {
            // Exclude the newline that terminates this line
            self.starts[line] - 1
        } else {
            let mut end = self.bytes.len();
            if self.bytes.ends_with(b"\n") {
                end -= 1;
            }
            end
        }
    }
}
