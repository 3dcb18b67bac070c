//! Core data models used throughout docchat.
//!
//! These types represent the documents, chunks, turns, and answers that flow
//! through the upload and question-answering pipelines.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous slice of extracted text produced by the document extractor,
/// before chunking. Carries enough location metadata for citations.
#[derive(Debug, Clone)]
pub struct Segment {
    pub text: String,
    /// 1-indexed line range within the document's extracted text.
    pub line_start: usize,
    pub line_end: usize,
    pub page: Option<u32>,
    pub sheet: Option<String>,
    pub sheet_index: Option<usize>,
}

/// Output contract of the document extractor: full text plus
/// location-annotated segments (empty for plain files).
#[derive(Debug, Clone)]
pub struct Parsed {
    pub text: String,
    pub segments: Vec<Segment>,
}

/// The atomic retrieval unit. Immutable once created; belongs to exactly
/// one document.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub text: String,
    /// 1-indexed inclusive line range for `[filename lines A–B]` citations.
    pub line_start: usize,
    pub line_end: usize,
    pub page: Option<u32>,
    pub sheet: Option<String>,
    pub sheet_index: Option<usize>,
    /// SHA-256 of the chunk text.
    pub hash: String,
}

/// A scored chunk returned from the vector index.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub document_id: String,
    pub filename: String,
    pub text: String,
    pub score: f32,
    pub line_start: usize,
    pub line_end: usize,
    pub page: Option<u32>,
    pub sheet: Option<String>,
}

/// A citation attached to an answer, in the UI response shape.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub filename: String,
    pub score: f32,
    pub text_preview: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    pub line_start: usize,
    pub line_end: usize,
}

impl SourceRef {
    /// Build a citation from a search hit, truncating the preview.
    pub fn from_hit(hit: &SearchHit) -> Self {
        let text_preview: String = hit.text.chars().take(200).collect();
        Self {
            filename: hit.filename.clone(),
            score: hit.score,
            text_preview,
            page: hit.page,
            sheet: hit.sheet.clone(),
            line_start: hit.line_start,
            line_end: hit.line_end,
        }
    }
}

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
}

/// One entry in a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Assistant,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }
}

/// One executed tool call, recorded for the answer's audit log.
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: serde_json::Value,
    pub result: String,
    /// Relative path of a file the call created, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_path: Option<String>,
}

/// Final product of one answer cycle.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub reply: String,
    pub sources: Vec<SourceRef>,
    pub used_general_knowledge: bool,
    pub tool_calls: Vec<ToolCallRecord>,
}

/// Receipt returned from a document upload.
#[derive(Debug, Clone, Serialize)]
pub struct UploadReceipt {
    pub document_id: String,
    pub filename: String,
    pub chunk_count: usize,
}
