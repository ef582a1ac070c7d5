//! Fixed-size character chunking with exact overlap.
//!
//! Text is normalized (line endings only) before slicing, and all offsets are character
//! offsets into that normalized text. Slicing never splits a UTF-8 sequence.
use compliance_core::config::ChunkingSettings;
use compliance_core::domain::CorpusType;
use compliance_core::error::AppError;
use compliance_core::normalize::{normalize_text, sha256_hex};
use serde::{Deserialize, Serialize};

mod criteria;

pub use criteria::{
    CriterionExtractor, PatternCriterionExtractor, DEFAULT_BARE_PATTERN, DEFAULT_LABELED_PATTERN,
};

pub const PAGE_BREAK: char = '\x0c';

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    /// `{document_id}#{ordinal:05}`
    pub chunk_id: String,
    pub document_id: String,
    pub corpus: CorpusType,
    pub ordinal: u32,
    pub text: String,
    pub char_len: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub page: u32,
    pub criteria: Vec<String>,
    pub text_sha256: String,
}

impl Chunk {
    pub fn primary_criterion(&self) -> Option<&str> {
        self.criteria.first().map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedDocument {
    pub normalized_text: String,
    pub page_count: u32,
    pub chunks: Vec<Chunk>,
}

pub fn chunk_id(document_id: &str, ordinal: u32) -> String {
    format!("{document_id}#{ordinal:05}")
}

/// Character offsets where pages 2..N begin. Explicit starts win over form-feed breaks.
pub fn page_starts(normalized: &str, explicit: &[usize]) -> Vec<usize> {
    if !explicit.is_empty() {
        let mut starts = explicit.to_vec();
        starts.sort_unstable();
        starts.dedup();
        starts.retain(|&s| s > 0);
        return starts;
    }
    normalized
        .chars()
        .enumerate()
        .filter(|(_, c)| *c == PAGE_BREAK)
        .map(|(i, _)| i + 1)
        .collect()
}

fn page_at(starts: &[usize], offset: usize) -> u32 {
    let before = starts.partition_point(|&s| s <= offset);
    (before + 1).min(u32::MAX as usize) as u32
}

pub fn chunk_document(
    document_id: &str,
    corpus: CorpusType,
    raw_text: &str,
    explicit_page_starts: &[usize],
    settings: &ChunkingSettings,
    extractor: &dyn CriterionExtractor,
) -> Result<ChunkedDocument, AppError> {
    let size = settings.chunk_size;
    let overlap = settings.chunk_overlap;
    if size == 0 || overlap >= size {
        return Err(AppError::new(
            "CONFIG_CHUNKING_INVALID",
            "chunk_overlap must be smaller than a non-zero chunk_size",
        )
        .with_details(format!("chunk_size={size}; chunk_overlap={overlap}")));
    }

    let normalized = normalize_text(raw_text);
    if normalized.trim().is_empty() {
        return Err(AppError::new("DOCUMENT_EMPTY", "Document text is empty")
            .with_details(format!("document_id={document_id}")));
    }

    // Byte index of every char, plus the end, so char offsets slice in O(1).
    let mut bounds: Vec<usize> = normalized.char_indices().map(|(b, _)| b).collect();
    bounds.push(normalized.len());
    let total = bounds.len() - 1;

    let starts = page_starts(&normalized, explicit_page_starts);
    let step = size - overlap;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut ordinal = 0u32;
    loop {
        let end = (start + size).min(total);
        let text = &normalized[bounds[start]..bounds[end]];
        chunks.push(Chunk {
            chunk_id: chunk_id(document_id, ordinal),
            document_id: document_id.to_string(),
            corpus,
            ordinal,
            text: text.to_string(),
            char_len: end - start,
            start_offset: start,
            end_offset: end,
            page: page_at(&starts, start),
            criteria: extractor.extract(text),
            text_sha256: sha256_hex(text.as_bytes()),
        });
        if end == total {
            break;
        }
        start += step;
        ordinal += 1;
    }

    Ok(ChunkedDocument {
        page_count: (starts.len() + 1).min(u32::MAX as usize) as u32,
        normalized_text: normalized,
        chunks,
    })
}
