use std::fs;
use std::path::Path;

use compliance_core::domain::{CorpusType, Document};
use compliance_core::error::AppError;
use serde::{Deserialize, Serialize};

use crate::chunking::Chunk;

mod collection;
pub mod similarity;

pub use collection::Collection;

/// One scored chunk from a corpus search. `rank` is 1-based within its corpus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalHit {
    pub chunk_id: String,
    pub document_id: String,
    pub corpus: CorpusType,
    pub ordinal: u32,
    pub page: u32,
    pub criteria: Vec<String>,
    pub text: String,
    pub score: f32,
    pub rank: usize,
}

impl RetrievalHit {
    pub fn primary_criterion(&self) -> Option<&str> {
        self.criteria.first().map(String::as_str)
    }
}

/// Per-corpus narrowing applied before scoring. Empty fields admit everything.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorpusFilter {
    #[serde(default)]
    pub document_ids: Vec<String>,
    pub category: Option<String>,
    /// Matches the id itself or any finer id under it (`"2"` admits `"2.3"`).
    pub criterion: Option<String>,
}

impl CorpusFilter {
    pub fn is_empty(&self) -> bool {
        self.document_ids.is_empty() && self.category.is_none() && self.criterion.is_none()
    }

    pub fn admits(&self, document_id: &str, category: Option<&str>, criteria: &[String]) -> bool {
        if !self.document_ids.is_empty() && !self.document_ids.iter().any(|d| d == document_id) {
            return false;
        }
        if let Some(want) = self.category.as_deref() {
            match category {
                Some(have) if have.eq_ignore_ascii_case(want) => {}
                _ => return false,
            }
        }
        if let Some(want) = self.criterion.as_deref() {
            let prefix = format!("{want}.");
            if !criteria.iter().any(|c| c == want || c.starts_with(&prefix)) {
                return false;
            }
        }
        true
    }
}

/// A document row plus what is needed to rebuild its chunks without the collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredDocument {
    pub document: Document,
    /// Normalized text the chunks were cut from.
    pub content: String,
    pub page_starts: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionStats {
    pub corpus: CorpusType,
    pub chunk_count: u64,
    pub document_count: u64,
    pub last_ingested_at: Option<String>,
    pub dims: Option<usize>,
    pub model: Option<String>,
}

/// The two corpora, stored in physically separate databases so each can be rebuilt alone.
pub struct DualIndex {
    requirement: Collection,
    evidence: Collection,
}

impl DualIndex {
    pub fn open(root: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(root).map_err(|e| {
            AppError::new("INDEX_UNAVAILABLE", "Failed to create index directory")
                .with_details(format!("path={}; err={}", root.display(), e))
        })?;
        Ok(Self {
            requirement: Collection::open(
                CorpusType::Requirement,
                &root.join(CorpusType::Requirement.collection_file()),
            )?,
            evidence: Collection::open(
                CorpusType::Evidence,
                &root.join(CorpusType::Evidence.collection_file()),
            )?,
        })
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Ok(Self {
            requirement: Collection::open_in_memory(CorpusType::Requirement)?,
            evidence: Collection::open_in_memory(CorpusType::Evidence)?,
        })
    }

    pub fn collection(&self, corpus: CorpusType) -> &Collection {
        match corpus {
            CorpusType::Requirement => &self.requirement,
            CorpusType::Evidence => &self.evidence,
        }
    }

    pub fn upsert(
        &self,
        corpus: CorpusType,
        chunk: &Chunk,
        vector: &[f32],
        model: &str,
    ) -> Result<(), AppError> {
        self.collection(corpus).upsert(chunk, vector, model)
    }

    pub fn delete_by_document(&self, corpus: CorpusType, document_id: &str) -> Result<usize, AppError> {
        self.collection(corpus).delete_by_document(document_id)
    }

    pub fn replace_document(
        &self,
        stored: &StoredDocument,
        chunks: &[(Chunk, Vec<f32>)],
        model: &str,
    ) -> Result<(), AppError> {
        self.collection(stored.document.corpus)
            .replace_document(stored, chunks, model)
    }

    pub fn search(
        &self,
        corpus: CorpusType,
        query: &[f32],
        k: usize,
        score_floor: f32,
    ) -> Result<Vec<RetrievalHit>, AppError> {
        self.search_filtered(corpus, query, k, score_floor, &CorpusFilter::default())
    }

    pub fn search_filtered(
        &self,
        corpus: CorpusType,
        query: &[f32],
        k: usize,
        score_floor: f32,
        filter: &CorpusFilter,
    ) -> Result<Vec<RetrievalHit>, AppError> {
        self.collection(corpus).search(query, k, score_floor, filter)
    }

    pub fn document(&self, corpus: CorpusType, document_id: &str) -> Result<Option<Document>, AppError> {
        self.collection(corpus).document(document_id)
    }

    /// Look a document id up in both corpora. Requirement is checked first.
    pub fn find_document(&self, document_id: &str) -> Result<Option<StoredDocument>, AppError> {
        for corpus in CorpusType::ALL {
            if let Some(doc) = self.collection(corpus).stored_document(document_id)? {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    pub fn stats(&self, corpus: CorpusType) -> Result<CollectionStats, AppError> {
        self.collection(corpus).stats()
    }
}
