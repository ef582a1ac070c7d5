use serde::{Deserialize, Serialize};

use super::ComplianceStatus;

const W_LABELED: f32 = 0.35;
const W_SIMILARITY: f32 = 0.25;
const W_COMPLETENESS: f32 = 0.20;
const W_COVERAGE: f32 = 0.20;

/// Deterministic inputs to the confidence score. The model's own certainty is never used.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidenceInputs {
    /// Pairs joined by a shared criterion / all pairs.
    pub labeled_fraction: f32,
    /// Mean similarity of every retained hit in both corpora.
    pub avg_similarity: f32,
    /// Required output sections present / required sections.
    pub section_completeness: f32,
    /// Pairs with both a requirement and an evidence side / all pairs.
    pub evidence_coverage: f32,
}

pub fn round3(x: f32) -> f32 {
    (x * 1000.0).round() / 1000.0
}

fn unit(x: f32) -> f32 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

pub fn confidence(i: ConfidenceInputs) -> f32 {
    let raw = W_LABELED * unit(i.labeled_fraction)
        + W_SIMILARITY * unit(i.avg_similarity)
        + W_COMPLETENESS * unit(i.section_completeness)
        + W_COVERAGE * unit(i.evidence_coverage);
    round3(unit(raw))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceScore {
    pub overall: f32,
    pub grade: String,
    pub status_score: f32,
    pub confidence_factor: f32,
    pub evidence_factor: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub fn timeline(&self) -> &'static str {
        match self {
            Priority::High => "Immediate (1-3 months)",
            Priority::Medium => "Short-term (3-6 months)",
            Priority::Low => "Long-term (6-12 months)",
        }
    }
}

fn status_score(status: ComplianceStatus) -> f32 {
    match status {
        ComplianceStatus::Compliant => 0.9,
        ComplianceStatus::PartiallyCompliant => 0.6,
        ComplianceStatus::GapIdentified => 0.3,
        ComplianceStatus::NonCompliant => 0.2,
        ComplianceStatus::Informational => 0.1,
    }
}

pub fn grade(score: f32) -> &'static str {
    if score >= 0.85 {
        "A"
    } else if score >= 0.70 {
        "B"
    } else if score >= 0.55 {
        "C"
    } else if score >= 0.40 {
        "D"
    } else {
        "F"
    }
}

/// `status base × confidence × evidence factor`, where the evidence factor saturates at
/// eight retrieved sources.
pub fn compliance_score(status: ComplianceStatus, confidence: f32, sources: usize) -> ComplianceScore {
    let base = status_score(status);
    let evidence_factor = (sources as f32 / 8.0).min(1.0);
    let overall = (base * unit(confidence) * evidence_factor * 100.0).round() / 100.0;
    ComplianceScore {
        overall,
        grade: grade(overall).to_string(),
        status_score: base,
        confidence_factor: confidence,
        evidence_factor: round3(evidence_factor),
    }
}

/// Only verdicts that call for action get a priority.
pub fn priority(status: ComplianceStatus, score: &ComplianceScore) -> Option<Priority> {
    match status {
        ComplianceStatus::GapIdentified | ComplianceStatus::NonCompliant => {
            Some(if score.overall < 0.3 {
                Priority::High
            } else {
                Priority::Low
            })
        }
        ComplianceStatus::PartiallyCompliant => Some(if score.overall < 0.6 {
            Priority::Medium
        } else {
            Priority::Low
        }),
        ComplianceStatus::Compliant | ComplianceStatus::Informational => None,
    }
}
