//! Engine facade: upload, ask, delete, and workspace sync.
//!
//! Owns the vector index, session memory, sandbox, and agent loop, and
//! sequences one answer cycle: load history, retrieve, run the agent,
//! then persist the turn pair only after the answer succeeded.

use std::sync::Arc;
use std::time::Duration;

use crate::agent::{AgentLoop, AgentRun};
use crate::config::Config;
use crate::embedding::EmbeddingProvider;
use crate::error::{EngineError, Result};
use crate::extract;
use crate::index::VectorIndex;
use crate::llm::ChatProvider;
use crate::memory::MemoryStore;
use crate::models::{Answer, SearchHit, UploadReceipt};
use crate::segment;
use crate::tools::ToolRouter;
use crate::workspace::Workspace;

/// One question against the engine.
#[derive(Debug, Clone)]
pub struct AskRequest {
    pub session_id: String,
    pub message: String,
    /// Restricts retrieval to this document unless the question names
    /// another one or asks about the workspace itself.
    pub active_document: Option<String>,
}

pub struct Engine {
    config: Config,
    workspace: Workspace,
    index: VectorIndex,
    memory: MemoryStore,
    agent: AgentLoop,
}

impl Engine {
    pub fn new(
        config: Config,
        embedder: Arc<dyn EmbeddingProvider>,
        chat: Arc<dyn ChatProvider>,
    ) -> Result<Self> {
        let workspace = Workspace::open(&config.workspace.root)?;
        let index = VectorIndex::new(embedder);
        let memory = MemoryStore::new(config.memory.max_turns);
        let tools = ToolRouter::new(
            workspace.clone(),
            Duration::from_secs(config.agent.tool_timeout_secs),
        );
        let agent = AgentLoop::new(chat, tools, config.agent.clone());

        Ok(Self {
            config,
            workspace,
            index,
            memory,
            agent,
        })
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    /// Store a document in the workspace and index it. Re-uploading the
    /// same filename replaces the previous version atomically from the
    /// caller's point of view.
    pub async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadReceipt> {
        if filename.trim().is_empty() {
            return Err(EngineError::InvalidInput(
                "filename must not be empty".to_string(),
            ));
        }
        if filename.contains('/') || filename.contains('\\') {
            return Err(EngineError::InvalidInput(
                "filename must not contain path separators".to_string(),
            ));
        }

        let path = self.workspace.resolve(filename)?;
        std::fs::write(&path, bytes)?;

        let receipt = self.index_file(filename, bytes).await?;
        tracing::info!(
            filename,
            chunks = receipt.chunk_count,
            "document uploaded"
        );
        Ok(receipt)
    }

    /// Parse, chunk, and index already-stored bytes under `filename`.
    async fn index_file(&self, filename: &str, bytes: &[u8]) -> Result<UploadReceipt> {
        let parsed = extract::parse(bytes, filename)?;

        if let Some(old_id) = self.index.document_id_for(filename) {
            self.index.delete(&old_id);
        }

        let document_id = uuid::Uuid::new_v4().to_string();
        let chunks = segment::segment_document(&document_id, &parsed, &self.config.chunking);
        let chunk_count = self.index.index(&document_id, filename, chunks).await?;

        Ok(UploadReceipt {
            document_id,
            filename: filename.to_string(),
            chunk_count,
        })
    }

    /// Index every regular file in the workspace root. Used at startup
    /// so a fresh process sees documents stored by earlier runs; the
    /// index itself is in-memory only.
    pub async fn sync_workspace(&self) -> Result<usize> {
        let mut indexed = 0;
        for entry in std::fs::read_dir(self.workspace.root())? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let bytes = std::fs::read(entry.path())?;
            match self.index_file(&name, &bytes).await {
                Ok(_) => indexed += 1,
                Err(e) => {
                    tracing::warn!(filename = %name, error = %e, "skipping unindexable file")
                }
            }
        }
        tracing::debug!(indexed, "workspace sync complete");
        Ok(indexed)
    }

    /// Answer one question for a session.
    pub async fn ask(&self, request: &AskRequest) -> Result<Answer> {
        let message = request.message.trim();
        if message.is_empty() {
            return Err(EngineError::InvalidInput(
                "message must not be empty".to_string(),
            ));
        }

        let history = self.memory.get(&request.session_id);

        let restrict: Option<Vec<String>> = request
            .active_document
            .as_deref()
            .and_then(|name| self.index.document_id_for(name))
            .map(|id| vec![id]);

        let mut retrieved = self
            .index
            .search(message, self.config.retrieval.top_k, restrict.as_deref())
            .await?;
        retrieved.retain(|h| h.score >= self.config.retrieval.min_score);

        let known_documents = self.index.filenames();
        let answer = self
            .agent
            .run(AgentRun {
                message,
                history: &history,
                retrieved: &retrieved,
                active_document: request.active_document.as_deref(),
                known_documents: &known_documents,
            })
            .await?;

        // Files the model created become searchable immediately.
        for record in &answer.tool_calls {
            if let Some(created) = &record.created_path {
                if let Ok(bytes) = std::fs::read(self.workspace.resolve(created)?) {
                    if let Err(e) = self.index_file(created, &bytes).await {
                        tracing::warn!(path = %created, error = %e, "failed to index created file");
                    }
                }
            }
        }

        // History is persisted only after a successful answer, so a
        // failed cycle leaves the session unchanged.
        self.memory.append(
            &request.session_id,
            crate::models::Turn::user(message),
            crate::models::Turn::assistant(answer.reply.clone()),
        );

        Ok(answer)
    }

    /// Direct retrieval, bypassing the agent. Used by the CLI `search`
    /// command.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.index
            .search(query, self.config.retrieval.top_k, None)
            .await
    }

    /// Remove a document from the index and delete its workspace file.
    /// Returns false when no such document exists.
    pub fn delete_document(&self, filename: &str) -> Result<bool> {
        let Some(id) = self.index.document_id_for(filename) else {
            return Ok(false);
        };
        self.index.delete(&id);

        let path = self.workspace.resolve(filename)?;
        if path.is_file() {
            std::fs::remove_file(path)?;
        }
        tracing::info!(filename, "document deleted");
        Ok(true)
    }

    /// (filename, chunk count) for every indexed document.
    pub fn documents(&self) -> Vec<(String, String, usize)> {
        self.index.documents()
    }

    pub fn document_count(&self) -> usize {
        self.index.count()
    }

    pub fn clear_session(&self, session_id: &str) {
        self.memory.clear(session_id);
    }
}
