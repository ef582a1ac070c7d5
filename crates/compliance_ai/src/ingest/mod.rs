//! Document ingestion: normalize, chunk, embed, then swap the document's chunk-set in one
//! index transaction. Nothing touches the index until every chunk has a vector.
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use compliance_core::config::{ChunkingSettings, EmbeddingSettings};
use compliance_core::domain::{CorpusType, Document, SourceMetadata};
use compliance_core::error::AppError;
use compliance_core::normalize::{normalize_text, now_rfc3339_utc, sha256_hex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::chunking::{chunk_document, page_starts, Chunk, CriterionExtractor};
use crate::embeddings::{uniform_dims, Embedder};
use crate::index::{DualIndex, StoredDocument};

/// Inputs per embedding request.
const EMBED_BATCH_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStage {
    Received,
    Extracted,
    Chunked,
    Embedded,
    Indexed,
    Complete,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Complete,
    /// Content hash unchanged; nothing was rebuilt.
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestionResult {
    pub document_id: String,
    pub corpus: CorpusType,
    pub status: IngestStatus,
    /// Stage that was being entered when the failure happened.
    pub stage_failed: Option<IngestStage>,
    pub chunk_count: u32,
    pub content_sha256: Option<String>,
    pub error: Option<AppError>,
}

#[derive(Debug, Clone)]
pub struct IngestRequest<'a> {
    pub document_id: &'a str,
    pub corpus: CorpusType,
    pub raw_text: &'a str,
    pub metadata: &'a SourceMetadata,
    /// Rebuild even when the content hash is unchanged.
    pub force: bool,
}

/// Releases the document id when dropped, including on early return.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<String>>,
    document_id: String,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        let mut set = self.set.lock().unwrap_or_else(|p| p.into_inner());
        set.remove(&self.document_id);
    }
}

pub struct IngestionPipeline {
    index: Arc<DualIndex>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn CriterionExtractor>,
    chunking: ChunkingSettings,
    embedding: EmbeddingSettings,
    in_flight: Mutex<HashSet<String>>,
    /// Serializes the dims check with the write it guards, across both corpora.
    index_writes: Mutex<()>,
}

impl IngestionPipeline {
    pub fn new(
        index: Arc<DualIndex>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn CriterionExtractor>,
        chunking: ChunkingSettings,
        embedding: EmbeddingSettings,
    ) -> Self {
        Self {
            index,
            embedder,
            extractor,
            chunking,
            embedding,
            in_flight: Mutex::new(HashSet::new()),
            index_writes: Mutex::new(()),
        }
    }

    /// True while an ingest of `document_id` is running.
    pub fn is_in_flight(&self, document_id: &str) -> bool {
        let set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        set.contains(document_id)
    }

    fn claim(&self, document_id: &str) -> Result<InFlightGuard<'_>, AppError> {
        let mut set = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !set.insert(document_id.to_string()) {
            return Err(AppError::new(
                "INGEST_IN_PROGRESS",
                "Document is already being ingested",
            )
            .with_details(format!("document_id={document_id}"))
            .with_retryable(true));
        }
        Ok(InFlightGuard {
            set: &self.in_flight,
            document_id: document_id.to_string(),
        })
    }

    pub fn ingest(&self, req: IngestRequest<'_>) -> IngestionResult {
        let mut stage = IngestStage::Received;
        match self.run(&req, &mut stage) {
            Ok(result) => result,
            Err(err) => {
                warn!(
                    document_id = req.document_id,
                    corpus = %req.corpus,
                    stage = ?stage,
                    code = %err.code,
                    "ingestion failed"
                );
                IngestionResult {
                    document_id: req.document_id.to_string(),
                    corpus: req.corpus,
                    status: IngestStatus::Failed,
                    stage_failed: Some(stage),
                    chunk_count: 0,
                    content_sha256: None,
                    error: Some(err),
                }
            }
        }
    }

    fn run(&self, req: &IngestRequest<'_>, stage: &mut IngestStage) -> Result<IngestionResult, AppError> {
        if req.document_id.trim().is_empty() {
            return Err(AppError::new("INGEST_DOCUMENT_ID_MISSING", "Document id is required"));
        }
        let _guard = self.claim(req.document_id)?;

        *stage = IngestStage::Extracted;
        let normalized = normalize_text(req.raw_text);
        let content_sha256 = sha256_hex(normalized.as_bytes());

        if !req.force {
            if let Some(existing) = self.index.document(req.corpus, req.document_id)? {
                if existing.content_sha256 == content_sha256 {
                    info!(
                        document_id = req.document_id,
                        corpus = %req.corpus,
                        "content unchanged; skipping"
                    );
                    return Ok(IngestionResult {
                        document_id: req.document_id.to_string(),
                        corpus: req.corpus,
                        status: IngestStatus::Skipped,
                        stage_failed: None,
                        chunk_count: existing.chunk_count,
                        content_sha256: Some(content_sha256),
                        error: None,
                    });
                }
            }
        }

        *stage = IngestStage::Chunked;
        let chunked = chunk_document(
            req.document_id,
            req.corpus,
            &normalized,
            &req.metadata.page_starts,
            &self.chunking,
            self.extractor.as_ref(),
        )?;
        debug!(
            document_id = req.document_id,
            chunks = chunked.chunks.len(),
            pages = chunked.page_count,
            "chunked document"
        );

        *stage = IngestStage::Embedded;
        let with_vectors = self.embed_chunks(req.corpus, chunked.chunks)?;

        *stage = IngestStage::Indexed;
        let chunk_count = with_vectors.len().min(u32::MAX as usize) as u32;
        let stored = StoredDocument {
            document: Document {
                document_id: req.document_id.to_string(),
                corpus: req.corpus,
                filename: req.metadata.filename.clone(),
                content_sha256: content_sha256.clone(),
                ingested_at: now_rfc3339_utc(),
                page_count: req.metadata.page_count.unwrap_or(chunked.page_count),
                chunk_count,
                category: req.metadata.category.clone(),
                version: req.metadata.version.clone(),
            },
            page_starts: page_starts(&chunked.normalized_text, &req.metadata.page_starts),
            content: chunked.normalized_text,
        };
        let writes = self.index_writes.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((_, first)) = with_vectors.first() {
            self.check_dims(req.corpus, first.len())?;
        }
        let other = req.corpus.other();
        let moving = self.index.document(other, req.document_id)?.is_some();
        self.index
            .replace_document(&stored, &with_vectors, &self.embedding.model)?;

        // At most one live chunk-set per id: drop the copy left in the other corpus.
        if moving {
            if let Err(err) = self.index.delete_by_document(other, req.document_id) {
                return Err(self.roll_back_move(req, err));
            }
            info!(
                document_id = req.document_id,
                from = %other,
                to = %req.corpus,
                "document moved between corpora"
            );
        }
        drop(writes);

        *stage = IngestStage::Complete;
        info!(
            document_id = req.document_id,
            corpus = %req.corpus,
            chunks = chunk_count,
            "ingestion complete"
        );
        Ok(IngestionResult {
            document_id: req.document_id.to_string(),
            corpus: req.corpus,
            status: IngestStatus::Complete,
            stage_failed: None,
            chunk_count,
            content_sha256: Some(content_sha256),
            error: None,
        })
    }

    fn embed_chunks(
        &self,
        corpus: CorpusType,
        chunks: Vec<Chunk>,
    ) -> Result<Vec<(Chunk, Vec<f32>)>, AppError> {
        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBED_BATCH_SIZE) {
            let inputs: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let out = self.embed_with_retry(&inputs)?;
            if out.len() != inputs.len() {
                return Err(AppError::new(
                    "MODEL_EMBEDDINGS_FAILED",
                    "Embedder returned a different number of vectors than inputs",
                )
                .with_details(format!("inputs={}; vectors={}", inputs.len(), out.len())));
            }
            vectors.extend(out);
        }

        if let Some(dims) = uniform_dims(&vectors)? {
            self.check_dims(corpus, dims)?;
        }

        Ok(chunks.into_iter().zip(vectors).collect())
    }

    /// Both corpora are searched with one query vector, so a batch must match the configured
    /// dimension, or failing that whatever either collection already stores.
    fn check_dims(&self, corpus: CorpusType, dims: usize) -> Result<(), AppError> {
        let expected = match self.embedding.dims {
            Some(d) => Some(("embedding.dims".to_string(), d)),
            None => {
                let mut stored = None;
                for c in [corpus, corpus.other()] {
                    if let Some(d) = self.index.collection(c).dims()? {
                        stored = Some((c.to_string(), d));
                        break;
                    }
                }
                stored
            }
        };
        match expected {
            Some((origin, d)) if d != dims => Err(AppError::new(
                "CONFIG_EMBEDDING_DIMS_MISMATCH",
                "Embedding dimension does not match the configured or stored dimension",
            )
            .with_details(format!("corpus={corpus}; {origin}={d}; got={dims}"))),
            _ => Ok(()),
        }
    }

    /// The new copy was committed but the old one could not be removed. Undo the new copy so
    /// the id keeps its single chunk-set in the corpus it came from.
    fn roll_back_move(&self, req: &IngestRequest<'_>, err: AppError) -> AppError {
        let from = req.corpus.other();
        match self.index.delete_by_document(req.corpus, req.document_id) {
            Ok(_) => {
                let note = format!("new copy in {} rolled back; document remains in {from}", req.corpus);
                append_details(err, &note)
            }
            Err(rollback) => {
                warn!(
                    document_id = req.document_id,
                    corpus = %req.corpus,
                    code = %rollback.code,
                    "rollback of moved document failed"
                );
                let note = format!(
                    "new copy committed in {} and rollback failed; document is live in both corpora",
                    req.corpus
                );
                append_details(err, &note)
            }
        }
    }

    fn embed_with_retry(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, AppError> {
        let mut attempt: u32 = 0;
        loop {
            match self.embedder.embed_batch(&self.embedding.model, inputs) {
                Ok(v) => return Ok(v),
                Err(e) if e.retryable && attempt < self.embedding.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.embedding.max_retries,
                        code = %e.code,
                        "embedding batch failed; retrying"
                    );
                    let backoff = self.embedding.retry_backoff_ms.saturating_mul(u64::from(attempt));
                    thread::sleep(Duration::from_millis(backoff));
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn append_details(err: AppError, note: &str) -> AppError {
    let details = match err.details.as_deref() {
        Some(d) if !d.is_empty() => format!("{d}; {note}"),
        _ => note.to_string(),
    };
    err.with_details(details)
}
