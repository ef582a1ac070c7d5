//! Keyword mapping of free-text queries onto criteria and evidence categories.
//!
//! Each group scores `2 × distinct keywords + total keyword hits`. Groups within a fraction of
//! the best score are kept, strongest first, ties in table order.
use compliance_core::config::{KeywordGroup, QueryMappingSettings};
use compliance_core::error::AppError;
use regex::Regex;
use serde::{Deserialize, Serialize};

const MAX_CRITERIA: usize = 3;
const MAX_CATEGORIES: usize = 2;
const CRITERION_CUTOFF: f32 = 0.6;
const CATEGORY_CUTOFF: f32 = 0.5;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TopicMatch {
    /// Criterion ids, strongest first.
    pub criteria: Vec<String>,
    /// Evidence categories, strongest first.
    pub categories: Vec<String>,
    /// Distinct keywords that matched, lowercased.
    pub keywords: Vec<String>,
    /// 0.5 criterion strength + 0.3 category strength + 0.2 query length, in [0, 1].
    pub confidence: f32,
}

impl TopicMatch {
    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty() && self.categories.is_empty()
    }
}

/// Suggests criteria and evidence categories for a query. Suggestions are advisory; they
/// narrow retrieval only when a query opts in.
pub trait QueryTopicMapper: Send + Sync {
    fn map_query(&self, query: &str) -> TopicMatch;
}

struct CompiledGroup {
    id: String,
    pattern: Regex,
}

pub struct KeywordTopicMapper {
    criteria: Vec<CompiledGroup>,
    categories: Vec<CompiledGroup>,
}

impl KeywordTopicMapper {
    pub fn new(settings: &QueryMappingSettings) -> Result<Self, AppError> {
        Ok(Self {
            criteria: compile(&settings.criteria)?,
            categories: compile(&settings.categories)?,
        })
    }

    /// Never suggests anything.
    pub fn empty() -> Self {
        Self {
            criteria: Vec::new(),
            categories: Vec::new(),
        }
    }
}

fn compile(groups: &[KeywordGroup]) -> Result<Vec<CompiledGroup>, AppError> {
    let mut out = Vec::with_capacity(groups.len());
    for g in groups {
        let mut words: Vec<String> = g
            .keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if words.is_empty() {
            continue;
        }
        // Longest first, so a phrase wins over a word it starts with.
        words.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
        let alternation: Vec<String> = words.iter().map(|w| regex::escape(w)).collect();
        let pattern = format!(r"\b(?:{})\b", alternation.join("|"));
        let pattern = Regex::new(&pattern).map_err(|e| {
            AppError::new("CONFIG_QUERY_MAPPING_INVALID", "Invalid query mapping keywords")
                .with_details(format!("id={}; err={e}", g.id))
        })?;
        out.push(CompiledGroup {
            id: g.id.trim().to_string(),
            pattern,
        });
    }
    Ok(out)
}

fn score_groups<'a>(
    groups: &'a [CompiledGroup],
    text: &str,
    keywords: &mut Vec<String>,
) -> Vec<(&'a str, usize)> {
    let mut scored: Vec<(&str, usize)> = Vec::new();
    for g in groups {
        let hits: Vec<&str> = g.pattern.find_iter(text).map(|m| m.as_str()).collect();
        if hits.is_empty() {
            continue;
        }
        let mut distinct: Vec<&str> = Vec::new();
        for h in hits.iter() {
            if !distinct.contains(h) {
                distinct.push(h);
            }
        }
        for d in distinct.iter() {
            if !keywords.iter().any(|k| k == d) {
                keywords.push(d.to_string());
            }
        }
        scored.push((g.id.as_str(), distinct.len() * 2 + hits.len()));
    }
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored
}

fn best_score(scored: &[(&str, usize)]) -> f32 {
    scored.first().map_or(0.0, |(_, v)| *v as f32)
}

fn select(scored: &[(&str, usize)], cutoff: f32, limit: usize) -> Vec<String> {
    let Some(&(_, top)) = scored.first() else {
        return Vec::new();
    };
    let threshold = (top as f32 * cutoff).max(1.0);
    scored
        .iter()
        .filter(|(_, s)| *s as f32 >= threshold)
        .take(limit)
        .map(|(id, _)| id.to_string())
        .collect()
}

impl QueryTopicMapper for KeywordTopicMapper {
    fn map_query(&self, query: &str) -> TopicMatch {
        let lower = query.to_lowercase();
        let mut keywords = Vec::new();
        let criteria = score_groups(&self.criteria, &lower, &mut keywords);
        let categories = score_groups(&self.categories, &lower, &mut keywords);

        let words = lower.split_whitespace().count() as f32;
        let confidence = 0.5 * (best_score(&criteria) / 10.0).min(1.0)
            + 0.3 * (best_score(&categories) / 5.0).min(1.0)
            + 0.2 * (words / 15.0).min(1.0);

        TopicMatch {
            criteria: select(&criteria, CRITERION_CUTOFF, MAX_CRITERIA),
            categories: select(&categories, CATEGORY_CUTOFF, MAX_CATEGORIES),
            keywords,
            confidence: (confidence * 1000.0).round() / 1000.0,
        }
    }
}
