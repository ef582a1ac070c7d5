use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Which of the two independently indexed corpora a document belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CorpusType {
    /// Regulatory documents that define what is required.
    Requirement,
    /// Institutional documents that show what exists.
    Evidence,
}

impl CorpusType {
    pub const ALL: [CorpusType; 2] = [CorpusType::Requirement, CorpusType::Evidence];

    pub fn as_str(&self) -> &'static str {
        match self {
            CorpusType::Requirement => "requirement",
            CorpusType::Evidence => "evidence",
        }
    }

    /// File name of this corpus's collection under the index root.
    pub fn collection_file(&self) -> &'static str {
        match self {
            CorpusType::Requirement => "requirement.sqlite",
            CorpusType::Evidence => "evidence.sqlite",
        }
    }

    pub fn other(&self) -> CorpusType {
        match self {
            CorpusType::Requirement => CorpusType::Evidence,
            CorpusType::Evidence => CorpusType::Requirement,
        }
    }

    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "requirement" | "requirements" => Ok(CorpusType::Requirement),
            "evidence" => Ok(CorpusType::Evidence),
            other => Err(AppError::new("QUERY_CORPUS_INVALID", "Unknown corpus type")
                .with_details(format!("corpus={other}"))),
        }
    }
}

impl std::fmt::Display for CorpusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata the text-extraction collaborator hands over with the raw text.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceMetadata {
    pub filename: String,
    /// Page count reported by the extractor. Derived from page breaks when absent.
    pub page_count: Option<u32>,
    /// Character offsets (into the normalized text) where pages 2..N begin.
    #[serde(default)]
    pub page_starts: Vec<usize>,
    pub category: Option<String>,
    pub version: Option<String>,
}

/// One ingested source file. Replaced wholesale by a superseding re-ingest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Document {
    pub document_id: String,
    pub corpus: CorpusType,
    pub filename: String,
    pub content_sha256: String,
    /// RFC3339 UTC.
    pub ingested_at: String,
    pub page_count: u32,
    pub chunk_count: u32,
    pub category: Option<String>,
    pub version: Option<String>,
}

/// Last-sync state owned by the scheduler collaborator, injected at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub last_sync_at: Option<String>,
    pub last_sync_status: Option<String>,
    pub documents_discovered: u32,
}
