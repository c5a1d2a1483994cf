//! AST-based chunk extraction
//!
//! Walks a tree-sitter syntax tree and emits typed chunks for declaration,
//! import, and comment nodes, merges adjacent same-type regions, and splits
//! anything over the byte cap back through the line chunker. Parsing is
//! failure-tolerant: a ladder of progressively cleaned inputs ends at the
//! line chunker, so a broken file never fails the pipeline.
//!
//! All grammar offsets are byte offsets into the UTF-8 buffer. Content is
//! extracted through [`LineIndex`] only.

use super::languages::{LanguagePlugin, NAME_KINDS};
use super::line::{bounded_content, LineChunker};
use super::LineIndex;
use crate::types::{Chunk, ChunkType};
use std::borrow::Cow;
use std::collections::HashSet;
use tree_sitter::{Node, Parser};

/// Only the first MiB of a file is parsed; the tail is left unchunked.
const MAX_PARSE_BYTES: usize = 1024 * 1024;

/// Line budget for the next-to-last ladder stage.
const RETRY_LINE_LIMIT: usize = 100;

/// Stages of the parse-failure ladder. Each stage's precondition is the
/// failure of the previous one; NUL-stripping happens unconditionally before
/// the first attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseStage {
    Initial,
    CtrlStripped,
    FirstLines,
}

impl ParseStage {
    fn label(&self) -> &'static str {
        match self {
            ParseStage::Initial => "initial",
            ParseStage::CtrlStripped => "ctrl_stripped",
            ParseStage::FirstLines => "first_lines",
        }
    }
}

/// A matched AST region before merging
#[derive(Debug, Clone)]
struct Candidate {
    start_line: usize,
    end_line: usize,
    chunk_type: ChunkType,
    name: Option<String>,
}

/// Per-language AST chunker
///
/// Stateless apart from its configuration; every call builds its own
/// parser, so instances never share grammar state across threads.
pub struct AstChunker {
    plugin: &'static LanguagePlugin,
    line_chunker: LineChunker,
    max_chunk_bytes: usize,
}

impl AstChunker {
    pub fn new(
        plugin: &'static LanguagePlugin,
        lines_per_chunk: usize,
        max_chunk_bytes: usize,
    ) -> Self {
        Self {
            plugin,
            line_chunker: LineChunker::new(lines_per_chunk, max_chunk_bytes),
            max_chunk_bytes,
        }
    }

    /// Chunk one file. Never fails: every parse failure degrades through the
    /// ladder and ends at line-based `fallback` chunks over the original
    /// content.
    pub fn chunk(&self, bytes: &[u8], path: &str) -> Vec<Chunk> {
        if bytes.is_empty() {
            return Vec::new();
        }

        let stripped = strip_nul(bytes);
        let parse_input: &[u8] = if stripped.len() > MAX_PARSE_BYTES {
            let cut = truncation_point(&stripped);
            tracing::warn!(
                "{}: parsing only the first {} of {} bytes",
                path,
                cut,
                stripped.len()
            );
            &stripped[..cut]
        } else {
            &stripped
        };

        if let Some(chunks) = self.try_stage(ParseStage::Initial, parse_input, path) {
            return chunks;
        }

        let cleaned = normalize_control(parse_input);
        if let Some(chunks) = self.try_stage(ParseStage::CtrlStripped, &cleaned, path) {
            return chunks;
        }

        let head = first_lines(&cleaned, RETRY_LINE_LIMIT);
        if let Some(chunks) = self.try_stage(ParseStage::FirstLines, head, path) {
            return chunks;
        }

        tracing::warn!(
            "{}: grammar rejected all parse attempts, falling back to line chunking",
            path
        );
        self.line_chunker
            .chunk_as_fallback(bytes, path, self.plugin.name)
    }

    fn try_stage(&self, stage: ParseStage, source: &[u8], path: &str) -> Option<Vec<Chunk>> {
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&self.plugin.language()) {
            tracing::warn!(
                "{}: grammar for {} failed to load: {}",
                path,
                self.plugin.name,
                e
            );
            return None;
        }

        let tree = match parser.parse(source, None) {
            Some(tree) => tree,
            None => {
                tracing::warn!("{}: parse returned nothing at stage {}", path, stage.label());
                return None;
            }
        };

        if tree.root_node().has_error() {
            tracing::warn!("{}: grammar errors at stage {}", path, stage.label());
            return None;
        }

        Some(self.extract(tree.root_node(), source, path))
    }

    /// Turn a parsed tree into merged, size-bounded chunks
    fn extract(&self, root: Node<'_>, source: &[u8], path: &str) -> Vec<Chunk> {
        let index = LineIndex::new(source);
        if index.line_count() == 0 {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        self.collect(root, source, 0, &mut candidates);

        let merged = merge_adjacent(candidates);

        let mut seen_ids = HashSet::new();
        let mut chunks = Vec::new();
        for candidate in merged {
            self.emit(&candidate, &index, path, &mut seen_ids, &mut chunks);
        }

        chunks.sort_by_key(|c| (c.start_line, c.end_line));
        chunks
    }

    fn collect(
        &self,
        node: Node<'_>,
        source: &[u8],
        depth: usize,
        out: &mut Vec<Candidate>,
    ) {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            if let Some(chunk_type) = self.plugin.category_for(child.kind()) {
                let (start_line, end_line) = node_lines(&child);
                out.push(Candidate {
                    start_line,
                    end_line,
                    chunk_type,
                    name: find_name(child, source),
                });
            } else if depth == 0 && child.is_named() {
                // Unmatched top-level children still get shipped, as `other`
                let (start_line, end_line) = node_lines(&child);
                out.push(Candidate {
                    start_line,
                    end_line,
                    chunk_type: ChunkType::Other,
                    name: None,
                });
            }
            self.collect(child, source, depth + 1, out);
        }
    }

    fn emit(
        &self,
        candidate: &Candidate,
        index: &LineIndex<'_>,
        path: &str,
        seen_ids: &mut HashSet<String>,
        out: &mut Vec<Chunk>,
    ) {
        let start = candidate.start_line;
        let end = candidate.end_line.min(index.line_count());
        if end < start {
            return;
        }

        if index.span_len(start, end) <= self.max_chunk_bytes {
            let chunk_id = Chunk::compute_id(path, start, end);
            // Range-identical candidates of different types collapse to the
            // same id; the first one in line order wins.
            if !seen_ids.insert(chunk_id.clone()) {
                return;
            }
            out.push(Chunk {
                chunk_id,
                file_path: path.to_string(),
                language: self.plugin.name.to_string(),
                start_line: start,
                end_line: end,
                content: index.slice_string(start, end),
                chunk_type: candidate.chunk_type,
                parser: self.plugin.parser_name.to_string(),
                name: candidate.name.clone(),
            });
            return;
        }

        // Oversized region: re-split by lines, parts keep the parent type
        // and link back through the id prefix.
        let parent_id = Chunk::compute_id(path, start, end);
        for (i, (part_start, part_end)) in self
            .line_chunker
            .split_ranges(index, start, end)
            .into_iter()
            .enumerate()
        {
            let chunk_id = format!("{}_part_{}", parent_id, i + 1);
            if !seen_ids.insert(chunk_id.clone()) {
                continue;
            }
            out.push(Chunk {
                chunk_id,
                file_path: path.to_string(),
                language: self.plugin.name.to_string(),
                start_line: part_start,
                end_line: part_end,
                content: bounded_content(index, part_start, part_end, self.max_chunk_bytes, path),
                chunk_type: candidate.chunk_type,
                parser: self.plugin.parser_name.to_string(),
                name: None,
            });
        }
    }
}

/// Merge adjacent same-type candidates: for each type, one forward pass over
/// the start-sorted sequence, merging whenever the next region starts within
/// two lines of the current end. Transitive by construction; no re-sorting
/// after merging.
fn merge_adjacent(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by_key(|c| (c.start_line, c.end_line));

    let mut by_type: Vec<(ChunkType, Vec<Candidate>)> = Vec::new();
    for candidate in candidates {
        match by_type.iter_mut().find(|(ty, _)| *ty == candidate.chunk_type) {
            Some((_, group)) => group.push(candidate),
            None => by_type.push((candidate.chunk_type, vec![candidate])),
        }
    }

    let mut merged = Vec::new();
    for (_, group) in by_type {
        let mut iter = group.into_iter();
        let mut current = match iter.next() {
            Some(first) => first,
            None => continue,
        };
        for next in iter {
            if next.start_line <= current.end_line + 2 {
                current.end_line = current.end_line.max(next.end_line);
                if current.name.is_none() {
                    current.name = next.name;
                }
            } else {
                merged.push(current);
                current = next;
            }
        }
        merged.push(current);
    }

    merged.sort_by_key(|c| (c.start_line, c.end_line));
    merged
}

/// 1-based inclusive line span of a node. Nodes whose range ends at column 0
/// (a trailing newline swallowed by the grammar) do not occupy that row.
fn node_lines(node: &Node<'_>) -> (usize, usize) {
    let start = node.start_position().row + 1;
    let end_position = node.end_position();
    let mut end = end_position.row + 1;
    if end_position.column == 0 && end > start {
        end -= 1;
    }
    (start, end)
}

/// First identifier-like descendant in left-most DFS order
fn find_name(node: Node<'_>, source: &[u8]) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if NAME_KINDS.contains(&child.kind()) {
            return child.utf8_text(source).ok().map(|s| s.to_string());
        }
        if let Some(name) = find_name(child, source) {
            return Some(name);
        }
    }
    None
}

/// Remove NUL bytes; borrows when the input is already clean
fn strip_nul(bytes: &[u8]) -> Cow<'_, [u8]> {
    if bytes.contains(&0) {
        Cow::Owned(bytes.iter().copied().filter(|&b| b != 0).collect())
    } else {
        Cow::Borrowed(bytes)
    }
}

/// Strip remaining control characters (except newline and tab) and
/// normalize CRLF to LF
fn normalize_control(bytes: &[u8]) -> Vec<u8> {
    bytes
        .iter()
        .copied()
        .filter(|&b| b == b'\n' || b == b'\t' || (b >= 0x20 && b != 0x7F))
        .collect()
}

/// Cut point at the last line boundary within the parse budget
fn truncation_point(bytes: &[u8]) -> usize {
    bytes[..MAX_PARSE_BYTES]
        .iter()
        .rposition(|&b| b == b'\n')
        .map(|pos| pos + 1)
        .unwrap_or(MAX_PARSE_BYTES)
}

/// Prefix of the buffer covering at most `limit` lines
fn first_lines(bytes: &[u8], limit: usize) -> &[u8] {
    let mut count = 0;
    for (i, &b) in bytes.iter().enumerate() {
        if b == b'\n' {
            count += 1;
            if count == limit {
                return &bytes[..=i];
            }
        }
    }
    bytes
}
