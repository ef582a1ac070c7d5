//! Layered configuration for the compliance core.
//!
//! Uses Figment to merge built-in defaults, an optional `compliance.toml`, and
//! `COMPLIANCE_*` environment variables (nested keys split on `__`, e.g.
//! `COMPLIANCE_RETRIEVAL__SCORE_FLOOR=0.7`).
use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_CONFIG_FILE: &str = "compliance.toml";
pub const ENV_PREFIX: &str = "COMPLIANCE_";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    /// Directory holding one SQLite file per corpus collection.
    pub index_dir: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("./compliance_index"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ChunkingSettings {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,
    /// Characters shared by consecutive chunks. Must be smaller than `chunk_size`.
    pub chunk_overlap: usize,
}

impl Default for ChunkingSettings {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrievalSettings {
    pub k_requirement: usize,
    pub k_evidence: usize,
    pub score_floor: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            k_requirement: 10,
            k_evidence: 10,
            score_floor: 0.65,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model: String,
    /// Expected vector dimension. When set, stored collections are checked against it at startup.
    pub dims: Option<usize>,
    /// Retries for retryable batch-embedding failures during ingestion.
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            model: "all-minilm".to_string(),
            dims: None,
            max_retries: 3,
            retry_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerationSettings {
    pub model: String,
    pub timeout_secs: u64,
    /// Mapped pairs included in the generation prompt.
    pub top_pairs: usize,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "llama3.2:1b".to_string(),
            timeout_secs: 120,
            top_pairs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaSettings {
    pub base_url: String,
}

impl Default for OllamaSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:11434".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Keywords that point a query at one criterion or evidence category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeywordGroup {
    pub id: String,
    pub keywords: Vec<String>,
}

fn group(id: &str, keywords: &[&str]) -> KeywordGroup {
    KeywordGroup {
        id: id.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
    }
}

/// Keyword tables for mapping free-text queries onto criteria (requirement side) and
/// evidence categories (evidence side). A TOML array replaces the built-in table wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct QueryMappingSettings {
    pub criteria: Vec<KeywordGroup>,
    pub categories: Vec<KeywordGroup>,
}

impl Default for QueryMappingSettings {
    fn default() -> Self {
        Self {
            criteria: vec![
                group(
                    "1",
                    &[
                        "curriculum", "syllabus", "course", "academic program", "degree program",
                        "academic calendar", "course outcomes", "program outcomes",
                        "choice based credit system", "cbcs", "credit system",
                    ],
                ),
                group(
                    "2",
                    &[
                        "teaching", "learning", "faculty", "teacher", "professor", "evaluation",
                        "assessment", "examination", "student teacher ratio", "mentoring",
                        "pedagogy", "learning outcomes", "blended learning", "online learning",
                    ],
                ),
                group(
                    "3",
                    &[
                        "research", "innovation", "extension", "consultancy", "publication",
                        "funded research", "patent", "intellectual property",
                        "community engagement", "outreach programs",
                    ],
                ),
                group(
                    "4",
                    &[
                        "infrastructure", "facilities", "library", "laboratory", "equipment",
                        "ict", "campus", "building", "classrooms", "labs", "learning resources",
                        "digital resources", "maintenance",
                    ],
                ),
                group(
                    "5",
                    &[
                        "student support", "student services", "counseling", "guidance",
                        "placement", "career guidance", "alumni", "student progression",
                        "scholarships", "financial aid", "student welfare", "grievance redressal",
                    ],
                ),
                group(
                    "6",
                    &[
                        "governance", "leadership", "management", "administration", "policy",
                        "strategic planning", "institutional planning", "quality assurance",
                        "organizational structure", "financial management", "iqac",
                    ],
                ),
                group(
                    "7",
                    &[
                        "institutional values", "best practices", "sustainability",
                        "green practices", "social responsibility", "gender equity",
                        "inclusivity", "diversity", "core values", "ethical practices",
                    ],
                ),
            ],
            categories: vec![
                group(
                    "policies",
                    &[
                        "policy", "policies", "guidelines", "rules", "regulations", "procedures",
                        "code of conduct", "anti-ragging", "grievance",
                    ],
                ),
                group(
                    "iqac",
                    &[
                        "iqac", "internal quality", "quality assurance", "academic audit",
                        "quality enhancement", "continuous improvement", "quality manual",
                    ],
                ),
                group(
                    "governance",
                    &[
                        "governance", "management", "leadership", "administration", "board",
                        "governing body", "academic council", "finance committee",
                    ],
                ),
                group(
                    "student_support",
                    &[
                        "student support", "student services", "counseling", "guidance",
                        "placement", "career services", "alumni", "scholarships", "welfare",
                        "mentoring",
                    ],
                ),
                group(
                    "reports",
                    &[
                        "report", "annual report", "self study report", "ssr", "aqar",
                        "audit report", "progress report",
                    ],
                ),
            ],
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub storage: StorageSettings,
    pub chunking: ChunkingSettings,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub ollama: OllamaSettings,
    pub logging: LoggingSettings,
    pub query_mapping: QueryMappingSettings,
}

impl Settings {
    /// Load defaults, then `compliance.toml` from the working directory, then env overrides.
    pub fn load() -> Result<Self, AppError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Like [`Settings::load`] with an explicit TOML path. A missing file is not an error.
    pub fn load_from(path: &Path) -> Result<Self, AppError> {
        let figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, AppError> {
        let settings: Settings = figment.extract().map_err(|e| {
            AppError::new("CONFIG_LOAD_FAILED", "Failed to load configuration")
                .with_details(e.to_string())
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let c = &self.chunking;
        if c.chunk_size == 0 {
            return Err(AppError::new(
                "CONFIG_CHUNKING_INVALID",
                "chunk_size must be greater than zero",
            ));
        }
        if c.chunk_overlap >= c.chunk_size {
            return Err(AppError::new(
                "CONFIG_CHUNKING_INVALID",
                "chunk_overlap must be smaller than chunk_size",
            )
            .with_details(format!(
                "chunk_size={}; chunk_overlap={}",
                c.chunk_size, c.chunk_overlap
            )));
        }

        let r = &self.retrieval;
        if r.k_requirement == 0 || r.k_evidence == 0 {
            return Err(AppError::new(
                "CONFIG_RETRIEVAL_INVALID",
                "Retrieval k must be at least 1 for both corpora",
            )
            .with_details(format!(
                "k_requirement={}; k_evidence={}",
                r.k_requirement, r.k_evidence
            )));
        }
        if !(0.0..=1.0).contains(&r.score_floor) {
            return Err(AppError::new(
                "CONFIG_RETRIEVAL_INVALID",
                "score_floor must be within [0, 1]",
            )
            .with_details(format!("score_floor={}", r.score_floor)));
        }

        if self.embedding.model.trim().is_empty() || self.generation.model.trim().is_empty() {
            return Err(AppError::new(
                "CONFIG_MODEL_MISSING",
                "Embedding and generation model names are required",
            ));
        }
        if self.embedding.dims == Some(0) {
            return Err(AppError::new(
                "CONFIG_EMBEDDING_DIMS_INVALID",
                "embedding.dims must be greater than zero when set",
            ));
        }
        if self.generation.top_pairs == 0 {
            return Err(AppError::new(
                "CONFIG_GENERATION_INVALID",
                "generation.top_pairs must be at least 1",
            ));
        }
        if self.generation.timeout_secs == 0 {
            return Err(AppError::new(
                "CONFIG_GENERATION_INVALID",
                "generation.timeout_secs must be at least 1",
            ));
        }

        let q = &self.query_mapping;
        for (table, groups) in [("criteria", &q.criteria), ("categories", &q.categories)] {
            for g in groups {
                if g.id.trim().is_empty() || g.keywords.iter().any(|k| k.trim().is_empty()) {
                    return Err(AppError::new(
                        "CONFIG_QUERY_MAPPING_INVALID",
                        "Query mapping groups need an id and non-empty keywords",
                    )
                    .with_details(format!("table={table}; id={}", g.id)));
                }
            }
        }
        Ok(())
    }
}
