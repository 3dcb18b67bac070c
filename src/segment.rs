//! Line-window text segmenter.
//!
//! Splits extracted document text into [`Chunk`]s that respect a character
//! budget while keeping whole lines intact, so every chunk maps to a
//! citable 1-indexed line range. Consecutive chunks share a small line
//! overlap to preserve context across boundaries.
//!
//! Each chunk receives a UUID plus a SHA-256 hash of its text.
//!
//! # Algorithm
//!
//! 1. Split text into lines.
//! 2. Greedily accumulate whole lines until the next line would exceed
//!    `max_chars`; always take at least one line, even an oversized one.
//! 3. Emit the window as a chunk with its inclusive line range.
//! 4. Restart the window at `end − overlap_lines`, forcing at least one
//!    line of forward progress.
//! 5. A document with no non-whitespace content yields one sentinel
//!    "empty" chunk, never zero chunks.
//!
//! Tabular sources arrive pre-rendered as one line per row (see
//! [`crate::extract`]); their sheet metadata is carried through from the
//! extractor segments.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, Parsed};

/// Placeholder text stored for documents with no extractable content.
pub const EMPTY_CHUNK_TEXT: &str = "(empty document)";

/// Segment a parsed document into chunks.
///
/// When the extractor supplied location-annotated segments (PDF pages,
/// spreadsheet sheets), each segment is chunked independently so page and
/// sheet metadata stay accurate. Plain documents are chunked as one body.
///
/// # Guarantees
///
/// - At least one chunk is always returned.
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - Every chunk's line range is 1-indexed and inclusive.
pub fn segment_document(document_id: &str, parsed: &Parsed, opts: &ChunkingConfig) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    if parsed.segments.is_empty() {
        segment_lines(document_id, &parsed.text, 1, None, None, None, opts, &mut chunks);
    } else {
        for seg in &parsed.segments {
            segment_lines(
                document_id,
                &seg.text,
                seg.line_start,
                seg.page,
                seg.sheet.clone(),
                seg.sheet_index,
                opts,
                &mut chunks,
            );
        }
    }

    if chunks.is_empty() {
        chunks.push(make_chunk(
            document_id,
            0,
            EMPTY_CHUNK_TEXT,
            1,
            1,
            None,
            None,
            None,
        ));
    }

    // Indices are assigned after the fact so per-segment chunking stays simple.
    for (i, c) in chunks.iter_mut().enumerate() {
        c.chunk_index = i as i64;
    }

    chunks
}

/// Run the greedy line-window pass over one block of text.
///
/// `first_line` is the 1-indexed line number of the block's first line
/// within the whole document.
#[allow(clippy::too_many_arguments)]
fn segment_lines(
    document_id: &str,
    text: &str,
    first_line: usize,
    page: Option<u32>,
    sheet: Option<String>,
    sheet_index: Option<usize>,
    opts: &ChunkingConfig,
    out: &mut Vec<Chunk>,
) {
    if text.trim().is_empty() {
        return;
    }

    let lines: Vec<&str> = text.lines().collect();
    let mut start = 0usize;

    while start < lines.len() {
        let mut end = start; // exclusive
        let mut size = 0usize;

        while end < lines.len() {
            let add = lines[end].len() + 1; // +1 for the newline
            if size + add > opts.max_chars && end > start {
                break;
            }
            size += add;
            end += 1;
            if size > opts.max_chars {
                // Oversized single line was taken whole; stop the window here.
                break;
            }
        }

        let window = lines[start..end].join("\n");
        if !window.trim().is_empty() {
            out.push(make_chunk(
                document_id,
                0,
                &window,
                first_line + start,
                first_line + end - 1,
                page,
                sheet.clone(),
                sheet_index,
            ));
        }

        if end >= lines.len() {
            break;
        }

        // Overlap the next window, but always move forward at least one line.
        let next = end.saturating_sub(opts.overlap_lines);
        start = if next <= start { start + 1 } else { next };
    }
}

#[allow(clippy::too_many_arguments)]
fn make_chunk(
    document_id: &str,
    index: i64,
    text: &str,
    line_start: usize,
    line_end: usize,
    page: Option<u32>,
    sheet: Option<String>,
    sheet_index: Option<usize>,
) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        chunk_index: index,
        text: text.to_string(),
        line_start,
        line_end,
        page,
        sheet,
        sheet_index,
        hash,
    }
}
