use serde::{Deserialize, Serialize};

use super::topics::{QueryTopicMapper, TopicMatch};
use crate::chunking::CriterionExtractor;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryType {
    GapAnalysis,
    EvidenceLookup,
    ComplianceCheck,
    Requirements,
    CriterionSpecific,
    #[default]
    General,
}

impl QueryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryType::GapAnalysis => "gap_analysis",
            QueryType::EvidenceLookup => "evidence_lookup",
            QueryType::ComplianceCheck => "compliance_check",
            QueryType::Requirements => "requirements",
            QueryType::CriterionSpecific => "criterion_specific",
            QueryType::General => "general",
        }
    }

    /// Retrieval context appended by query expansion.
    fn expansion(&self) -> Option<&'static str> {
        match self {
            QueryType::GapAnalysis => Some("compliance gap analysis requirements"),
            QueryType::EvidenceLookup => Some("institutional evidence documentation"),
            QueryType::ComplianceCheck => Some("standards compliance verification"),
            QueryType::Requirements => Some("accreditation requirements"),
            QueryType::CriterionSpecific | QueryType::General => None,
        }
    }
}

/// Keyword table, checked in order; the first type with a hit wins.
const QUERY_TYPE_KEYWORDS: &[(QueryType, &[&str])] = &[
    (
        QueryType::GapAnalysis,
        &["gap", "missing", "lacking", "shortfall", "deficiency"],
    ),
    (
        QueryType::EvidenceLookup,
        &["evidence", "proof", "support", "documentation"],
    ),
    (
        QueryType::ComplianceCheck,
        &["compliant", "meets", "satisfies", "fulfills", "fulfils"],
    ),
    (
        QueryType::Requirements,
        &["requirement", "expects", "mandates", "standard"],
    ),
];

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct QueryAnalysis {
    pub query_type: QueryType,
    /// Criterion ids named in the query, in order of appearance.
    pub criteria: Vec<String>,
    /// Criteria and evidence categories suggested by query keywords.
    #[serde(default)]
    pub topics: TopicMatch,
}

impl QueryAnalysis {
    /// Criterion to narrow the requirement corpus by: the major number of the first criterion
    /// named in the query, else the strongest keyword suggestion.
    pub fn requirement_criterion(&self) -> Option<String> {
        match self.criteria.first() {
            Some(named) => named.split('.').next().map(str::to_string),
            None => self.topics.criteria.first().cloned(),
        }
    }

    /// Category to narrow the evidence corpus by.
    pub fn evidence_category(&self) -> Option<&str> {
        self.topics.categories.first().map(String::as_str)
    }

    /// The query plus criterion and query-type context, for embedding only.
    pub fn expanded_query(&self, query: &str) -> String {
        let mut parts = vec![query.trim().to_string(), "compliance".to_string()];
        if let Some(c) = self.requirement_criterion() {
            parts.push(format!("criterion {c}"));
        }
        if let Some(ctx) = self.query_type.expansion() {
            parts.push(ctx.to_string());
        }
        parts.join(" ")
    }
}

/// Classify a query and collect criterion and category suggestions.
pub fn analyze_query(
    query: &str,
    extractor: &dyn CriterionExtractor,
    topics: &dyn QueryTopicMapper,
) -> QueryAnalysis {
    let criteria = extractor.extract(query);
    let lower = query.to_lowercase();

    let mut query_type = QUERY_TYPE_KEYWORDS
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(t, _)| *t)
        .unwrap_or(QueryType::General);
    if !criteria.is_empty() {
        query_type = QueryType::CriterionSpecific;
    }

    QueryAnalysis {
        query_type,
        criteria,
        topics: topics.map_query(query),
    }
}
