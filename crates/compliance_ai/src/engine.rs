use std::sync::Arc;
use std::time::Duration;

use compliance_core::config::Settings;
use compliance_core::domain::{CorpusType, SourceMetadata, SyncSnapshot};
use compliance_core::error::{AppError, ErrorResponse};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::chunking::{CriterionExtractor, PatternCriterionExtractor};
use crate::embeddings::{Embedder, OllamaEmbedder};
use crate::index::{CollectionStats, DualIndex};
use crate::ingest::{IngestRequest, IngestStage, IngestStatus, IngestionPipeline, IngestionResult};
use crate::llm::{Llm, OllamaLlm};
use crate::mapping::map_hits;
use crate::ollama::OllamaClient;
use crate::retrieve::{KeywordTopicMapper, QueryOptions, QueryTopicMapper, Retriever};
use crate::synth::{ComplianceResponse, SynthesisInput, Synthesizer};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub requirement: CollectionStats,
    pub evidence: CollectionStats,
    pub last_ingested_at: Option<String>,
    /// Upstream sync state as injected at startup.
    pub sync: SyncSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthReport {
    pub index_ok: bool,
    pub index_error: Option<ErrorResponse>,
    /// `None` when no Ollama client is configured (custom embedder/generator).
    pub model_ok: Option<bool>,
    pub model_error: Option<ErrorResponse>,
}

/// Entry point for collaborators. `Send + Sync`; share it behind an `Arc`.
pub struct ComplianceEngine {
    settings: Settings,
    index: Arc<DualIndex>,
    pipeline: IngestionPipeline,
    retriever: Retriever,
    synthesizer: Synthesizer,
    sync: SyncSnapshot,
    ollama: Option<OllamaClient>,
}

impl ComplianceEngine {
    /// Open the on-disk index under `settings.storage.index_dir`.
    pub fn open(
        settings: Settings,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn Llm>,
        sync: SyncSnapshot,
    ) -> Result<Self, AppError> {
        settings.validate()?;
        let index = DualIndex::open(&settings.storage.index_dir)?;
        Self::with_index(settings, index, embedder, llm, sync)
    }

    /// Open with the Ollama-backed embedder and generator from `settings.ollama`.
    pub fn open_with_ollama(settings: Settings, sync: SyncSnapshot) -> Result<Self, AppError> {
        let client = OllamaClient::new(&settings.ollama.base_url)?;
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(client.clone()));
        let llm: Arc<dyn Llm> = Arc::new(OllamaLlm::new(
            client.clone(),
            Duration::from_secs(settings.generation.timeout_secs),
        ));
        let mut engine = Self::open(settings, embedder, llm, sync)?;
        engine.ollama = Some(client);
        Ok(engine)
    }

    /// Build around an already-open index (an in-memory one in tests).
    pub fn with_index(
        settings: Settings,
        index: DualIndex,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn Llm>,
        sync: SyncSnapshot,
    ) -> Result<Self, AppError> {
        settings.validate()?;
        check_dims(&index, settings.embedding.dims)?;

        let index = Arc::new(index);
        let extractor: Arc<dyn CriterionExtractor> = Arc::new(PatternCriterionExtractor::new()?);
        let pipeline = IngestionPipeline::new(
            index.clone(),
            embedder.clone(),
            extractor.clone(),
            settings.chunking.clone(),
            settings.embedding.clone(),
        );
        let topics: Arc<dyn QueryTopicMapper> =
            Arc::new(KeywordTopicMapper::new(&settings.query_mapping)?);
        let retriever = Retriever::new(
            index.clone(),
            embedder,
            extractor,
            topics,
            settings.retrieval.clone(),
            settings.embedding.model.clone(),
        );
        let synthesizer = Synthesizer::new(
            llm,
            settings.generation.model.clone(),
            settings.generation.top_pairs,
        );

        info!(
            index_dir = %settings.storage.index_dir.display(),
            embedding_model = %settings.embedding.model,
            generation_model = %settings.generation.model,
            "compliance engine ready"
        );
        Ok(Self {
            settings,
            index,
            pipeline,
            retriever,
            synthesizer,
            sync,
            ollama: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn ingest(
        &self,
        document_id: &str,
        corpus: CorpusType,
        raw_text: &str,
        metadata: &SourceMetadata,
    ) -> IngestionResult {
        self.pipeline.ingest(IngestRequest {
            document_id,
            corpus,
            raw_text,
            metadata,
            force: false,
        })
    }

    /// Like [`ComplianceEngine::ingest`], but rebuilds even when the content is unchanged.
    pub fn force_ingest(
        &self,
        document_id: &str,
        corpus: CorpusType,
        raw_text: &str,
        metadata: &SourceMetadata,
    ) -> IngestionResult {
        self.pipeline.ingest(IngestRequest {
            document_id,
            corpus,
            raw_text,
            metadata,
            force: true,
        })
    }

    /// Rebuild a document from its stored text, ignoring the unchanged-hash shortcut.
    pub fn reindex(&self, document_id: &str) -> IngestionResult {
        let stored = match self.index.find_document(document_id) {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                return failed_at_received(
                    document_id,
                    AppError::new("INGEST_DOCUMENT_NOT_FOUND", "Document is not indexed")
                        .with_details(format!("document_id={document_id}")),
                )
            }
            Err(e) => return failed_at_received(document_id, e),
        };

        let doc = &stored.document;
        let metadata = SourceMetadata {
            filename: doc.filename.clone(),
            page_count: Some(doc.page_count),
            page_starts: stored.page_starts.clone(),
            category: doc.category.clone(),
            version: doc.version.clone(),
        };
        self.pipeline.ingest(IngestRequest {
            document_id,
            corpus: doc.corpus,
            raw_text: &stored.content,
            metadata: &metadata,
            force: true,
        })
    }

    pub fn query(&self, text: &str, opts: &QueryOptions) -> Result<ComplianceResponse, AppError> {
        let outcome = self.retriever.retrieve(text, opts)?;
        let mapping = map_hits(&outcome.requirement_hits, &outcome.evidence_hits);
        let response = self.synthesizer.synthesize(SynthesisInput {
            query: text.trim(),
            analysis: &outcome.analysis,
            requirement_hits: &outcome.requirement_hits,
            evidence_hits: &outcome.evidence_hits,
            mapping: &mapping,
        })?;
        info!(
            status = response.status.as_str(),
            confidence = response.confidence,
            pairs = mapping.pairs.len(),
            "query answered"
        );
        Ok(response)
    }

    pub fn stats(&self) -> Result<IndexStats, AppError> {
        let requirement = self.index.stats(CorpusType::Requirement)?;
        let evidence = self.index.stats(CorpusType::Evidence)?;
        let last_ingested_at = match (&requirement.last_ingested_at, &evidence.last_ingested_at) {
            (Some(a), Some(b)) => Some(a.max(b).clone()),
            (a, b) => a.clone().or_else(|| b.clone()),
        };
        Ok(IndexStats {
            requirement,
            evidence,
            last_ingested_at,
            sync: self.sync.clone(),
        })
    }

    pub fn health(&self) -> HealthReport {
        let index_error = CorpusType::ALL
            .iter()
            .find_map(|c| self.index.stats(*c).err())
            .map(|e| e.to_response());
        let (model_ok, model_error) = match &self.ollama {
            None => (None, None),
            Some(client) => match client.health_check() {
                Ok(()) => (Some(true), None),
                Err(e) => {
                    warn!(code = %e.code, "model backend health check failed");
                    (Some(false), Some(e.to_response()))
                }
            },
        };
        HealthReport {
            index_ok: index_error.is_none(),
            index_error,
            model_ok,
            model_error,
        }
    }
}

fn failed_at_received(document_id: &str, err: AppError) -> IngestionResult {
    IngestionResult {
        document_id: document_id.to_string(),
        // Unknown for a missing document; requirement is reported by convention.
        corpus: CorpusType::Requirement,
        status: IngestStatus::Failed,
        stage_failed: Some(IngestStage::Received),
        chunk_count: 0,
        content_sha256: None,
        error: Some(err),
    }
}

/// Both collections are searched with one query vector, so their stored dimensions must agree
/// with each other and with the configured dimension when one is set.
fn check_dims(index: &DualIndex, configured: Option<usize>) -> Result<(), AppError> {
    let mut expected: Option<(String, usize)> =
        configured.map(|d| ("embedding.dims".to_string(), d));
    for corpus in CorpusType::ALL {
        let Some(stored) = index.collection(corpus).dims()? else {
            continue;
        };
        match &expected {
            Some((origin, d)) if *d != stored => {
                return Err(AppError::new(
                    "CONFIG_EMBEDDING_DIMS_MISMATCH",
                    "Stored embedding dimension does not match",
                )
                .with_details(format!("{origin}={d}; {corpus}={stored}")));
            }
            Some(_) => {}
            None => expected = Some((corpus.to_string(), stored)),
        }
    }
    Ok(())
}
