//! In-memory vector index.
//!
//! Stores per-document chunk vectors behind a coarse `RwLock`: many
//! concurrent searches, exclusive writers, and no half-updated chunk lists
//! ever visible. Embedding happens *outside* the lock, so an in-flight
//! provider call never blocks readers.
//!
//! Indexing is all-or-nothing: an embedding failure aborts the whole
//! document with no partial commit. Search ties are broken by original
//! insertion order via a monotonic counter.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::embedding::{dot, EmbeddingProvider};
use crate::error::{EngineError, Result};
use crate::models::{Chunk, SearchHit};

struct IndexedChunk {
    chunk: Chunk,
    vector: Vec<f32>,
    /// Global insertion order, for deterministic tie-breaking.
    order: u64,
}

struct IndexedDocument {
    filename: String,
    chunks: Vec<IndexedChunk>,
}

/// Vector index over uploaded documents.
pub struct VectorIndex {
    provider: Arc<dyn EmbeddingProvider>,
    dims: usize,
    docs: RwLock<HashMap<String, IndexedDocument>>,
    next_order: AtomicU64,
}

impl VectorIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>) -> Self {
        let dims = provider.dims();
        Self {
            provider,
            dims,
            docs: RwLock::new(HashMap::new()),
            next_order: AtomicU64::new(0),
        }
    }

    /// Embed and store a document's chunks. Re-indexing an existing
    /// document id replaces its previous chunks atomically.
    ///
    /// # Errors
    ///
    /// Any embedding failure aborts the whole document; nothing is
    /// committed.
    pub async fn index(
        &self,
        document_id: &str,
        filename: &str,
        chunks: Vec<Chunk>,
    ) -> Result<usize> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.provider.embed(&texts).await?;

        if vectors.len() != chunks.len() {
            return Err(EngineError::Upstream(format!(
                "Embedding count mismatch: {} texts, {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        for v in &vectors {
            if v.len() != self.dims {
                return Err(EngineError::Upstream(format!(
                    "Embedding dims mismatch: expected {}, got {}",
                    self.dims,
                    v.len()
                )));
            }
        }

        let indexed: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexedChunk {
                chunk,
                vector,
                order: self.next_order.fetch_add(1, Ordering::Relaxed),
            })
            .collect();
        let count = indexed.len();

        let mut docs = self.docs.write().unwrap();
        docs.insert(
            document_id.to_string(),
            IndexedDocument {
                filename: filename.to_string(),
                chunks: indexed,
            },
        );

        tracing::debug!(document_id, filename, chunks = count, "indexed document");
        Ok(count)
    }

    /// Score all chunks (optionally restricted to given document ids)
    /// against the query and return the top `top_k`, sorted by descending
    /// score with ties broken by insertion order.
    ///
    /// A corpus smaller than `top_k` returns fewer hits; never an error.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        restrict_to: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let query_vec = self
            .provider
            .embed(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::Upstream("Empty embedding response".to_string()))?;

        let docs = self.docs.read().unwrap();
        let mut scored: Vec<(f32, u64, SearchHit)> = Vec::new();

        for (doc_id, doc) in docs.iter() {
            if let Some(ids) = restrict_to {
                if !ids.iter().any(|id| id == doc_id) {
                    continue;
                }
            }
            for ic in &doc.chunks {
                let score = dot(&query_vec, &ic.vector);
                scored.push((
                    score,
                    ic.order,
                    SearchHit {
                        document_id: doc_id.clone(),
                        filename: doc.filename.clone(),
                        text: ic.chunk.text.clone(),
                        score,
                        line_start: ic.chunk.line_start,
                        line_end: ic.chunk.line_end,
                        page: ic.chunk.page,
                        sheet: ic.chunk.sheet.clone(),
                    },
                ));
            }
        }

        scored.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.1.cmp(&b.1))
        });
        scored.truncate(top_k);

        Ok(scored.into_iter().map(|(_, _, hit)| hit).collect())
    }

    /// Remove a document and all its chunks. Returns whether it existed.
    pub fn delete(&self, document_id: &str) -> bool {
        let removed = self.docs.write().unwrap().remove(document_id).is_some();
        if removed {
            tracing::debug!(document_id, "deleted document");
        }
        removed
    }

    /// Number of indexed documents.
    pub fn count(&self) -> usize {
        self.docs.read().unwrap().len()
    }

    /// `(document_id, filename, chunk_count)` for every indexed document.
    pub fn documents(&self) -> Vec<(String, String, usize)> {
        self.docs
            .read()
            .unwrap()
            .iter()
            .map(|(id, d)| (id.clone(), d.filename.clone(), d.chunks.len()))
            .collect()
    }

    /// Look up a document id by filename.
    pub fn document_id_for(&self, filename: &str) -> Option<String> {
        self.docs
            .read()
            .unwrap()
            .iter()
            .find(|(_, d)| d.filename == filename)
            .map(|(id, _)| id.clone())
    }

    /// Filenames of all indexed documents.
    pub fn filenames(&self) -> Vec<String> {
        self.docs
            .read()
            .unwrap()
            .values()
            .map(|d| d.filename.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChunkingConfig;
    use crate::embedding::HashingProvider;
    use crate::models::Parsed;
    use crate::segment::segment_document;

    fn index_with_hashing() -> VectorIndex {
        VectorIndex::new(Arc::new(HashingProvider::new(128)))
    }

    fn chunks_for(document_id: &str, text: &str) -> Vec<Chunk> {
        let parsed = Parsed {
            text: text.to_string(),
            segments: Vec::new(),
        };
        segment_document(document_id, &parsed, &ChunkingConfig::default())
    }

    #[tokio::test]
    async fn test_index_and_search_scenario() {
        let index = index_with_hashing();
        let chunks = chunks_for(
            "d1",
            "machine learning is great\nit powers search\nand ranking\nand recommendations\nthe end",
        );
        index.index("d1", "doc.txt", chunks).await.unwrap();

        let hits = index.search("machine learning", 3, None).await.unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].filename, "doc.txt");
        assert!(hits[0].score > 0.0);
        assert_eq!(hits[0].line_start, 1);
        assert!(hits[0].line_end <= 5);
    }

    #[tokio::test]
    async fn test_search_sorted_and_capped() {
        let index = index_with_hashing();
        index
            .index("d1", "a.txt", chunks_for("d1", "apples and oranges"))
            .await
            .unwrap();
        index
            .index("d2", "b.txt", chunks_for("d2", "apples apples apples"))
            .await
            .unwrap();
        index
            .index("d3", "c.txt", chunks_for("d3", "bicycle repair manual"))
            .await
            .unwrap();

        let hits = index.search("apples", 2, None).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_search_smaller_corpus_than_top_k() {
        let index = index_with_hashing();
        index
            .index("d1", "a.txt", chunks_for("d1", "only document"))
            .await
            .unwrap();
        let hits = index.search("anything", 10, None).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_then_restricted_search_is_empty() {
        let index = index_with_hashing();
        index
            .index("d1", "a.txt", chunks_for("d1", "hello world"))
            .await
            .unwrap();
        assert!(index.delete("d1"));

        let restrict = vec!["d1".to_string()];
        let hits = index.search("hello", 5, Some(&restrict)).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_is_signal_not_error() {
        let index = index_with_hashing();
        assert!(!index.delete("missing"));
    }

    #[tokio::test]
    async fn test_index_then_delete_leaves_count_unchanged() {
        let index = index_with_hashing();
        index
            .index("d0", "keep.txt", chunks_for("d0", "keep me around"))
            .await
            .unwrap();
        let before = index.count();

        index
            .index("d1", "temp.txt", chunks_for("d1", "temporary"))
            .await
            .unwrap();
        index.delete("d1");

        assert_eq!(index.count(), before);
    }

    #[tokio::test]
    async fn test_reindex_replaces_chunks() {
        let index = index_with_hashing();
        index
            .index("d1", "a.txt", chunks_for("d1", "first version"))
            .await
            .unwrap();
        index
            .index("d1", "a.txt", chunks_for("d1", "second version"))
            .await
            .unwrap();
        assert_eq!(index.count(), 1);

        let hits = index.search("second version", 5, None).await.unwrap();
        assert!(hits[0].text.contains("second"));
    }

    #[tokio::test]
    async fn test_restricted_search_filters_documents() {
        let index = index_with_hashing();
        index
            .index("d1", "a.txt", chunks_for("d1", "shared words here"))
            .await
            .unwrap();
        index
            .index("d2", "b.txt", chunks_for("d2", "shared words there"))
            .await
            .unwrap();

        let restrict = vec!["d2".to_string()];
        let hits = index.search("shared words", 10, Some(&restrict)).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.iter().all(|h| h.document_id == "d2"));
    }
}
