use std::sync::Arc;
use std::thread;

use compliance_core::config::RetrievalSettings;
use compliance_core::domain::CorpusType;
use compliance_core::error::AppError;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chunking::CriterionExtractor;
use crate::embeddings::Embedder;
use crate::index::{CorpusFilter, DualIndex, RetrievalHit};

mod analysis;
mod topics;

pub use analysis::{analyze_query, QueryAnalysis, QueryType};
pub use topics::{KeywordTopicMapper, QueryTopicMapper, TopicMatch};

/// Per-query overrides. Unset fields fall back to the configured retrieval settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryOptions {
    pub k_requirement: Option<usize>,
    pub k_evidence: Option<usize>,
    pub score_floor: Option<f32>,
    #[serde(default)]
    pub requirement_filter: CorpusFilter,
    #[serde(default)]
    pub evidence_filter: CorpusFilter,
    /// Fill unset filters from the query analysis: criterion on the requirement side,
    /// category on the evidence side.
    #[serde(default)]
    pub apply_suggested_filters: bool,
    /// Embed the query with criterion and query-type context appended.
    #[serde(default)]
    pub expand_query: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalOutcome {
    pub requirement_hits: Vec<RetrievalHit>,
    pub evidence_hits: Vec<RetrievalHit>,
    pub analysis: QueryAnalysis,
    /// Filters actually applied, after suggestions.
    pub requirement_filter: CorpusFilter,
    pub evidence_filter: CorpusFilter,
}

pub struct Retriever {
    index: Arc<DualIndex>,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn CriterionExtractor>,
    topics: Arc<dyn QueryTopicMapper>,
    settings: RetrievalSettings,
    embedding_model: String,
}

impl Retriever {
    pub fn new(
        index: Arc<DualIndex>,
        embedder: Arc<dyn Embedder>,
        extractor: Arc<dyn CriterionExtractor>,
        topics: Arc<dyn QueryTopicMapper>,
        settings: RetrievalSettings,
        embedding_model: String,
    ) -> Self {
        Self {
            index,
            embedder,
            extractor,
            topics,
            settings,
            embedding_model,
        }
    }

    /// Embed the query once and search both corpora in parallel. Both searches finish before
    /// this returns; either failing fails the query.
    pub fn retrieve(&self, query: &str, opts: &QueryOptions) -> Result<RetrievalOutcome, AppError> {
        let q = query.trim();
        if q.is_empty() {
            return Err(AppError::new("QUERY_INVALID", "Query must not be empty"));
        }

        let k_requirement = opts.k_requirement.unwrap_or(self.settings.k_requirement);
        let k_evidence = opts.k_evidence.unwrap_or(self.settings.k_evidence);
        if k_requirement == 0 || k_evidence == 0 {
            return Err(AppError::new("QUERY_INVALID", "k must be at least 1")
                .with_details(format!("k_requirement={k_requirement}; k_evidence={k_evidence}")));
        }
        let floor = opts.score_floor.unwrap_or(self.settings.score_floor);
        if !(0.0..=1.0).contains(&floor) {
            return Err(AppError::new("QUERY_INVALID", "score_floor must be within [0, 1]")
                .with_details(format!("score_floor={floor}")));
        }

        let analysis = analyze_query(q, self.extractor.as_ref(), self.topics.as_ref());
        let mut requirement_filter = opts.requirement_filter.clone();
        let mut evidence_filter = opts.evidence_filter.clone();
        if opts.apply_suggested_filters {
            if requirement_filter.criterion.is_none() {
                requirement_filter.criterion = analysis.requirement_criterion();
            }
            if evidence_filter.category.is_none() {
                evidence_filter.category = analysis.evidence_category().map(str::to_string);
            }
        }

        let qv = if opts.expand_query {
            let expanded = analysis.expanded_query(q);
            debug!(expanded = %expanded, "embedding expanded query");
            self.embedder.embed(&self.embedding_model, &expanded)?
        } else {
            self.embedder.embed(&self.embedding_model, q)?
        };

        let index = self.index.as_ref();
        let (requirement, evidence) = thread::scope(|s| {
            let req = s.spawn(|| {
                index.search_filtered(
                    CorpusType::Requirement,
                    &qv,
                    k_requirement,
                    floor,
                    &requirement_filter,
                )
            });
            let evid = s.spawn(|| {
                index.search_filtered(
                    CorpusType::Evidence,
                    &qv,
                    k_evidence,
                    floor,
                    &evidence_filter,
                )
            });
            (join_search(req.join()), join_search(evid.join()))
        });
        let requirement_hits = requirement?;
        let evidence_hits = evidence?;

        debug!(
            query_type = analysis.query_type.as_str(),
            requirement_hits = requirement_hits.len(),
            evidence_hits = evidence_hits.len(),
            requirement_criterion = ?requirement_filter.criterion,
            evidence_category = ?evidence_filter.category,
            "retrieval complete"
        );
        Ok(RetrievalOutcome {
            requirement_hits,
            evidence_hits,
            analysis,
            requirement_filter,
            evidence_filter,
        })
    }
}

fn join_search(
    joined: thread::Result<Result<Vec<RetrievalHit>, AppError>>,
) -> Result<Vec<RetrievalHit>, AppError> {
    joined.unwrap_or_else(|_| {
        Err(AppError::new(
            "INDEX_UNAVAILABLE",
            "Corpus search thread panicked",
        ))
    })
}
