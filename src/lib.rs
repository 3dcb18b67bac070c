//! # docchat
//!
//! A local-first document question-answering engine.
//!
//! docchat ingests documents (plain text, PDF, DOCX, PPTX, XLSX), chunks
//! and embeds them into an in-memory vector index, and answers questions
//! through an agent loop that either grounds its reply in retrieved
//! excerpts with citations, or falls back to sandboxed file-system tools
//! when retrieval comes up empty.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌────────────┐
//! │  Extract  │──▶│   Segment    │──▶│   Vector   │
//! │ PDF/DOCX… │   │ line windows │   │   Index    │
//! └───────────┘   └──────────────┘   └─────┬──────┘
//!                                          │ retrieve
//!                   ┌──────────────────────┤
//!                   ▼                      ▼
//!              ┌─────────┐          ┌────────────┐
//!              │  Agent  │◀────────▶│ Chat model │
//!              │  loop   │  tools   │ (OpenAI)   │
//!              └────┬────┘          └────────────┘
//!                   ▼
//!              ┌─────────┐
//!              │ Sandbox │  list_dir / read_file / grep_files
//!              │  tools  │  extract_document / insert_text
//!              └─────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docchat upload report.pdf             # store and index a document
//! docchat ask "what are the Q3 risks?"  # grounded, cited answer
//! docchat search "revenue"              # raw retrieval hits
//! docchat stats                         # indexed documents
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`extract`] | Multi-format document text extraction |
//! | [`segment`] | Line-window chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | In-memory vector index |
//! | [`memory`] | Bounded per-session conversation history |
//! | [`workspace`] | Path-confinement sandbox |
//! | [`tools`] | Sandboxed file-system tools |
//! | [`intent`] | Meta-question and document-mention heuristics |
//! | [`llm`] | Chat model abstraction (OpenAI-compatible) |
//! | [`agent`] | Grounded/tool-enabled answer loop |
//! | [`engine`] | Upload/ask/delete facade |

pub mod agent;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod extract;
pub mod index;
pub mod intent;
pub mod llm;
pub mod memory;
pub mod models;
pub mod segment;
pub mod tools;
pub mod workspace;

pub use engine::{AskRequest, Engine};
pub use error::{EngineError, Result};
