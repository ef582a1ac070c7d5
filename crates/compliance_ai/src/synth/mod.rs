//! Single-shot answer synthesis.
//!
//! Builds one prompt from the mapped pairs, calls the generator exactly once, applies the
//! section contract, and fills every field of the response deterministically when the model
//! leaves something out. Status overrides from the retrieval facts always win over the model.
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use compliance_core::error::AppError;
use compliance_core::normalize::snippet_first_chars;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::guardrails::{extract_cited_chunk_ids, unknown_citations};
use crate::index::RetrievalHit;
use crate::llm::Llm;
use crate::mapping::{MappingResult, PairKind};
use crate::retrieve::{QueryAnalysis, QueryType};

mod confidence;
mod parse;
mod prompts;

pub use confidence::{
    compliance_score, confidence, grade, priority, round3, ComplianceScore, ConfidenceInputs,
    Priority,
};
pub use parse::{list_items, parse_output, ParsedOutput, Section};
pub use prompts::compliance_prompt;

pub const PREVIEW_CHARS: usize = 150;

pub const NO_EVIDENCE_SUMMARY: &str =
    "No supporting evidence was found in the evidence corpus for this query.";
const NO_REQUIREMENT_SUMMARY: &str =
    "No matching requirement passages were found in the requirement corpus.";
const FALLBACK_MAPPING: &str = "No criterion mapping could be established from the retrieved passages.";
const FALLBACK_ANALYSIS: &str =
    "The generated answer did not include an analysis; see the cited sources for details.";
const FALLBACK_RECOMMENDATIONS: &str =
    "Review the cited requirement passages and collect evidence for any uncovered criteria.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ComplianceStatus {
    Compliant,
    PartiallyCompliant,
    NonCompliant,
    GapIdentified,
    Informational,
}

impl ComplianceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComplianceStatus::Compliant => "compliant",
            ComplianceStatus::PartiallyCompliant => "partially-compliant",
            ComplianceStatus::NonCompliant => "non-compliant",
            ComplianceStatus::GapIdentified => "gap-identified",
            ComplianceStatus::Informational => "informational",
        }
    }

    /// Lenient label parsing on word tokens. Negations are checked first, since a negated
    /// label still contains the word it negates.
    pub fn from_label(raw: &str) -> Option<Self> {
        let lower = raw.to_lowercase();
        let tokens: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();
        let has = |word: &str| tokens.contains(&word);
        let affirmative = |t: &&str| matches!(*t, "compliant" | "supported" | "met");

        let negated = tokens
            .iter()
            .any(|t| matches!(*t, "noncompliant" | "incompliant" | "unsupported" | "unmet"))
            || tokens.iter().enumerate().any(|(i, t)| {
                matches!(*t, "non" | "not") && tokens[i + 1..].iter().any(affirmative)
            });

        if negated {
            Some(ComplianceStatus::NonCompliant)
        } else if tokens.iter().any(|t| t.starts_with("partial")) {
            Some(ComplianceStatus::PartiallyCompliant)
        } else if has("gap") || has("gaps") {
            Some(ComplianceStatus::GapIdentified)
        } else if has("informational") || has("insufficient") {
            Some(ComplianceStatus::Informational)
        } else if tokens.iter().any(affirmative) {
            Some(ComplianceStatus::Compliant)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ParseOutcome {
    /// Every required section was present.
    Complete,
    /// Some sections were filled from fallbacks.
    Partial,
    /// Nothing recognizable; every section came from fallbacks.
    Unparseable,
    /// No model call was made.
    NotInvoked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceCitation {
    pub document_id: String,
    pub chunk_id: String,
    pub page: u32,
    pub relevance_score: f32,
    pub preview: String,
    pub criteria: Vec<String>,
    pub cited_by_model: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GapItem {
    pub criterion: Option<String>,
    pub description: String,
    pub requirement_chunk_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceResponse {
    pub query: String,
    pub query_type: QueryType,
    pub requirement_summary: String,
    pub evidence_summary: String,
    pub mapping_narrative: String,
    pub compliance_analysis: String,
    pub status: ComplianceStatus,
    pub recommendations: String,
    pub confidence: f32,
    pub category_scores: BTreeMap<String, f32>,
    pub gaps: Vec<GapItem>,
    pub requirement_sources: Vec<SourceCitation>,
    pub evidence_sources: Vec<SourceCitation>,
    pub compliance_score: ComplianceScore,
    pub priority: Option<Priority>,
    pub implementation_timeline: Option<String>,
    pub warnings: Vec<String>,
    pub parse_outcome: ParseOutcome,
}

/// Everything the synthesizer needs from retrieval and mapping.
#[derive(Debug, Clone, Copy)]
pub struct SynthesisInput<'a> {
    pub query: &'a str,
    pub analysis: &'a QueryAnalysis,
    pub requirement_hits: &'a [RetrievalHit],
    pub evidence_hits: &'a [RetrievalHit],
    pub mapping: &'a MappingResult,
}

impl SynthesisInput<'_> {
    fn avg_similarity(&self) -> f32 {
        mean_score(self.requirement_hits.iter().chain(self.evidence_hits.iter()))
    }

    fn source_count(&self) -> usize {
        self.requirement_hits.len() + self.evidence_hits.len()
    }
}

fn mean_score<'a>(hits: impl Iterator<Item = &'a RetrievalHit>) -> f32 {
    let (sum, n) = hits.fold((0.0f32, 0usize), |(s, n), h| (s + h.score, n + 1));
    if n == 0 {
        0.0
    } else {
        sum / n as f32
    }
}

pub struct Synthesizer {
    llm: Arc<dyn Llm>,
    model: String,
    top_pairs: usize,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn Llm>, model: String, top_pairs: usize) -> Self {
        Self {
            llm,
            model,
            top_pairs,
        }
    }

    pub fn synthesize(&self, input: SynthesisInput<'_>) -> Result<ComplianceResponse, AppError> {
        if input.requirement_hits.is_empty() && input.evidence_hits.is_empty() {
            info!("no passages retrieved; returning informational response without generation");
            return Ok(informational_response(input));
        }

        let prompt = compliance_prompt(input.query, input.analysis, input.mapping, self.top_pairs);
        let raw = self.llm.generate(&self.model, &prompt)?;
        debug!(chars = raw.len(), "generation returned");
        Ok(assemble(input, &raw, self.top_pairs))
    }
}

/// Status implied by the mapping alone. Used when the model gives none.
pub fn derive_status(input: &SynthesisInput<'_>) -> ComplianceStatus {
    if input.requirement_hits.is_empty() {
        return ComplianceStatus::Informational;
    }
    if input.evidence_hits.is_empty() {
        return ComplianceStatus::GapIdentified;
    }
    let matched = input
        .mapping
        .pairs
        .iter()
        .any(|p| p.kind == PairKind::Matched);
    match (matched, input.mapping.gap_criteria.is_empty()) {
        (true, true) => ComplianceStatus::Compliant,
        (true, false) => ComplianceStatus::PartiallyCompliant,
        (false, false) => ComplianceStatus::GapIdentified,
        (false, true) => ComplianceStatus::PartiallyCompliant,
    }
}

fn citations(hits: &[RetrievalHit], cited: &BTreeSet<String>) -> Vec<SourceCitation> {
    hits.iter()
        .map(|h| SourceCitation {
            document_id: h.document_id.clone(),
            chunk_id: h.chunk_id.clone(),
            page: h.page,
            relevance_score: round3(h.score),
            preview: snippet_first_chars(&h.text, PREVIEW_CHARS),
            criteria: h.criteria.clone(),
            cited_by_model: cited.contains(&h.chunk_id),
        })
        .collect()
}

fn category_scores(input: &SynthesisInput<'_>, completeness: f32) -> BTreeMap<String, f32> {
    let mut out = BTreeMap::new();
    out.insert(
        "criterion_alignment".to_string(),
        round3(input.mapping.labeled_fraction()),
    );
    out.insert(
        "evidence_coverage".to_string(),
        round3(input.mapping.two_sided_fraction()),
    );
    out.insert(
        "requirement_relevance".to_string(),
        round3(mean_score(input.requirement_hits.iter())),
    );
    out.insert(
        "evidence_strength".to_string(),
        round3(mean_score(input.evidence_hits.iter())),
    );
    out.insert("response_completeness".to_string(), round3(completeness));
    out
}

fn gap_items(input: &SynthesisInput<'_>, parsed: &ParsedOutput) -> Vec<GapItem> {
    let mut out: Vec<GapItem> = input
        .mapping
        .gap_criteria
        .iter()
        .map(|c| GapItem {
            criterion: Some(c.clone()),
            description: format!("No evidence was retrieved for criterion {c}."),
            requirement_chunk_id: input
                .mapping
                .pairs
                .iter()
                .find(|p| p.criterion.as_deref() == Some(c.as_str()))
                .and_then(|p| p.requirement.as_ref())
                .map(|h| h.chunk_id.clone()),
        })
        .collect();
    if let Some(body) = parsed.section(Section::Gaps) {
        out.extend(list_items(body).into_iter().map(|description| GapItem {
            criterion: None,
            description,
            requirement_chunk_id: None,
        }));
    }
    out
}

fn fallback_requirement_summary(input: &SynthesisInput<'_>) -> String {
    match input.requirement_hits.first() {
        Some(h) => format!(
            "Top requirement passage ({}): {}",
            h.chunk_id,
            snippet_first_chars(&h.text, PREVIEW_CHARS)
        ),
        None => NO_REQUIREMENT_SUMMARY.to_string(),
    }
}

fn fallback_evidence_summary(input: &SynthesisInput<'_>) -> String {
    match input.evidence_hits.first() {
        Some(h) => format!(
            "Top evidence passage ({}): {}",
            h.chunk_id,
            snippet_first_chars(&h.text, PREVIEW_CHARS)
        ),
        None => NO_EVIDENCE_SUMMARY.to_string(),
    }
}

fn fallback_mapping(input: &SynthesisInput<'_>) -> String {
    let matched: Vec<&str> = input
        .mapping
        .pairs
        .iter()
        .filter(|p| p.kind == PairKind::Matched)
        .filter_map(|p| p.criterion.as_deref())
        .collect();
    if matched.is_empty() {
        return FALLBACK_MAPPING.to_string();
    }
    let mut unique: Vec<&str> = Vec::new();
    for c in matched {
        if !unique.contains(&c) {
            unique.push(c);
        }
    }
    format!("Evidence maps to criteria: {}.", unique.join(", "))
}

fn assemble(input: SynthesisInput<'_>, raw: &str, top_pairs: usize) -> ComplianceResponse {
    let parsed = parse_output(raw);
    let completeness = parsed.completeness();
    let missing = parsed.missing_required();
    let parse_outcome = match (&parsed, missing.is_empty()) {
        (ParsedOutput::Unparseable, _) => ParseOutcome::Unparseable,
        (_, true) => ParseOutcome::Complete,
        (_, false) => ParseOutcome::Partial,
    };

    let mut warnings: Vec<String> = Vec::new();
    if !missing.is_empty() {
        let tags: Vec<&str> = missing.iter().map(|s| s.tag()).collect();
        warn!(missing = ?tags, "generated answer missing sections; using fallbacks");
        warnings.push(format!(
            "Generated answer was missing sections: {}.",
            tags.join(", ")
        ));
    }

    let cited = extract_cited_chunk_ids(raw);
    let allowed: BTreeSet<&str> = input
        .mapping
        .pairs
        .iter()
        .take(top_pairs)
        .flat_map(|p| p.hits())
        .map(|h| h.chunk_id.as_str())
        .collect();
    let unknown = unknown_citations(&cited, &allowed);
    if !unknown.is_empty() {
        warnings.push(format!(
            "Generated answer cited passages that were not provided: {}.",
            unknown.join(", ")
        ));
    }
    for c in input.mapping.unmatched_evidence_criteria.iter() {
        warnings.push(format!(
            "Evidence mentions criterion {c} but no matching requirement was retrieved; it may be irrelevant."
        ));
    }

    let mut status = parsed
        .section(Section::Status)
        .and_then(ComplianceStatus::from_label)
        .unwrap_or_else(|| derive_status(&input));

    let requirement_summary = parsed
        .section(Section::RequirementSummary)
        .map(str::to_string)
        .unwrap_or_else(|| fallback_requirement_summary(&input));
    let mut evidence_summary = parsed
        .section(Section::EvidenceSummary)
        .map(str::to_string)
        .unwrap_or_else(|| fallback_evidence_summary(&input));

    // Requirements with no evidence at all is a gap, whatever the model says.
    if !input.requirement_hits.is_empty() && input.evidence_hits.is_empty() {
        if status != ComplianceStatus::GapIdentified {
            debug!(model_status = status.as_str(), "overriding status to gap-identified");
        }
        status = ComplianceStatus::GapIdentified;
        evidence_summary = NO_EVIDENCE_SUMMARY.to_string();
    }

    let confidence = confidence(ConfidenceInputs {
        labeled_fraction: input.mapping.labeled_fraction(),
        avg_similarity: input.avg_similarity(),
        section_completeness: completeness,
        evidence_coverage: input.mapping.two_sided_fraction(),
    });
    let score = compliance_score(status, confidence, input.source_count());
    let priority = priority(status, &score);

    ComplianceResponse {
        query: input.query.to_string(),
        query_type: input.analysis.query_type,
        requirement_summary,
        evidence_summary,
        mapping_narrative: parsed
            .section(Section::Mapping)
            .map(str::to_string)
            .unwrap_or_else(|| fallback_mapping(&input)),
        compliance_analysis: parsed
            .section(Section::ComplianceAnalysis)
            .unwrap_or(FALLBACK_ANALYSIS)
            .to_string(),
        status,
        recommendations: parsed
            .section(Section::Recommendations)
            .unwrap_or(FALLBACK_RECOMMENDATIONS)
            .to_string(),
        confidence,
        category_scores: category_scores(&input, completeness),
        gaps: gap_items(&input, &parsed),
        requirement_sources: citations(input.requirement_hits, &cited),
        evidence_sources: citations(input.evidence_hits, &cited),
        implementation_timeline: priority.map(|p| p.timeline().to_string()),
        priority,
        compliance_score: score,
        warnings,
        parse_outcome,
    }
}

fn informational_response(input: SynthesisInput<'_>) -> ComplianceResponse {
    let status = ComplianceStatus::Informational;
    let confidence = confidence(ConfidenceInputs {
        labeled_fraction: 0.0,
        avg_similarity: 0.0,
        section_completeness: 0.0,
        evidence_coverage: 0.0,
    });
    let score = compliance_score(status, confidence, 0);
    let none = BTreeSet::new();
    ComplianceResponse {
        query: input.query.to_string(),
        query_type: input.analysis.query_type,
        requirement_summary: NO_REQUIREMENT_SUMMARY.to_string(),
        evidence_summary: NO_EVIDENCE_SUMMARY.to_string(),
        mapping_narrative: FALLBACK_MAPPING.to_string(),
        compliance_analysis:
            "Neither corpus returned passages above the relevance floor, so no compliance judgement can be grounded."
                .to_string(),
        status,
        recommendations:
            "Rephrase the query, lower the score floor, or ingest the relevant requirement and evidence documents."
                .to_string(),
        confidence,
        category_scores: category_scores(&input, 0.0),
        gaps: Vec::new(),
        requirement_sources: citations(input.requirement_hits, &none),
        evidence_sources: citations(input.evidence_hits, &none),
        compliance_score: score,
        priority: None,
        implementation_timeline: None,
        warnings: input
            .mapping
            .unmatched_evidence_criteria
            .iter()
            .map(|c| format!("Evidence mentions criterion {c} but no matching requirement was retrieved; it may be irrelevant."))
            .collect(),
        parse_outcome: ParseOutcome::NotInvoked,
    }
}
