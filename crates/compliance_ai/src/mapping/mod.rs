//! Criterion-level alignment of requirement hits with evidence hits.
//!
//! Pure and deterministic: the same two hit lists always produce the same pairs in the same
//! order. Only the criterion ids already attached to hits are consulted.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::index::RetrievalHit;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PairKind {
    /// Same criterion on both sides.
    Matched,
    /// Labeled requirement with no evidence at this rank.
    RequirementOnly,
    /// Labeled evidence with no requirement at this rank.
    EvidenceOnly,
    /// Unlabeled hits zipped by rank.
    Positional,
    /// Unlabeled leftover with no partner.
    Singleton,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MappedPair {
    pub requirement: Option<RetrievalHit>,
    pub evidence: Option<RetrievalHit>,
    pub criterion: Option<String>,
    /// 1.0 when joined by a shared label, 0.0 when joined by position or unjoined.
    pub confidence: f32,
    pub kind: PairKind,
}

impl MappedPair {
    pub fn is_two_sided(&self) -> bool {
        self.requirement.is_some() && self.evidence.is_some()
    }

    pub fn is_labeled(&self) -> bool {
        self.criterion.is_some()
    }

    fn min_rank(&self) -> usize {
        let r = self.requirement.as_ref().map_or(usize::MAX, |h| h.rank);
        let e = self.evidence.as_ref().map_or(usize::MAX, |h| h.rank);
        r.min(e)
    }

    pub fn hits(&self) -> impl Iterator<Item = &RetrievalHit> {
        self.requirement.iter().chain(self.evidence.iter())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MappingResult {
    pub pairs: Vec<MappedPair>,
    /// Criteria present only on the requirement side.
    pub gap_criteria: Vec<String>,
    /// Criteria present only on the evidence side (possibly irrelevant evidence).
    pub unmatched_evidence_criteria: Vec<String>,
}

impl MappingResult {
    pub fn labeled_fraction(&self) -> f32 {
        if self.pairs.is_empty() {
            return 0.0;
        }
        let labeled = self.pairs.iter().filter(|p| p.confidence >= 1.0).count();
        labeled as f32 / self.pairs.len() as f32
    }

    pub fn two_sided_fraction(&self) -> f32 {
        if self.pairs.is_empty() {
            return 0.0;
        }
        let both = self.pairs.iter().filter(|p| p.is_two_sided()).count();
        both as f32 / self.pairs.len() as f32
    }
}

#[derive(Default)]
struct Group<'a> {
    requirement: Vec<&'a RetrievalHit>,
    evidence: Vec<&'a RetrievalHit>,
}

fn by_rank(hits: &[RetrievalHit]) -> Vec<&RetrievalHit> {
    let mut out: Vec<&RetrievalHit> = hits.iter().collect();
    out.sort_by(|a, b| a.rank.cmp(&b.rank).then(a.chunk_id.cmp(&b.chunk_id)));
    out
}

fn pair(
    requirement: Option<&RetrievalHit>,
    evidence: Option<&RetrievalHit>,
    criterion: Option<&str>,
    confidence: f32,
    kind: PairKind,
) -> MappedPair {
    MappedPair {
        requirement: requirement.cloned(),
        evidence: evidence.cloned(),
        criterion: criterion.map(str::to_string),
        confidence,
        kind,
    }
}

fn rank_of(hit: &Option<RetrievalHit>) -> usize {
    hit.as_ref().map_or(usize::MAX, |h| h.rank)
}

pub fn map_hits(requirement_hits: &[RetrievalHit], evidence_hits: &[RetrievalHit]) -> MappingResult {
    let mut groups: BTreeMap<&str, Group<'_>> = BTreeMap::new();
    let mut unlabeled_req: Vec<&RetrievalHit> = Vec::new();
    let mut unlabeled_evid: Vec<&RetrievalHit> = Vec::new();

    for hit in by_rank(requirement_hits) {
        match hit.primary_criterion() {
            Some(c) => groups.entry(c).or_default().requirement.push(hit),
            None => unlabeled_req.push(hit),
        }
    }
    for hit in by_rank(evidence_hits) {
        match hit.primary_criterion() {
            Some(c) => groups.entry(c).or_default().evidence.push(hit),
            None => unlabeled_evid.push(hit),
        }
    }

    let mut labeled: Vec<MappedPair> = Vec::new();
    let mut gap_set: Vec<&str> = Vec::new();
    let mut unmatched_set: Vec<&str> = Vec::new();
    for (criterion, g) in groups.iter() {
        match (g.requirement.is_empty(), g.evidence.is_empty()) {
            (false, false) => {
                let n = g.requirement.len().max(g.evidence.len());
                for i in 0..n {
                    let r = g.requirement.get(i).copied();
                    let e = g.evidence.get(i).copied();
                    let kind = match (r, e) {
                        (Some(_), Some(_)) => PairKind::Matched,
                        (Some(_), None) => PairKind::RequirementOnly,
                        _ => PairKind::EvidenceOnly,
                    };
                    labeled.push(pair(r, e, Some(*criterion), 1.0, kind));
                }
            }
            (false, true) => {
                gap_set.push(*criterion);
                for r in g.requirement.iter() {
                    labeled.push(pair(Some(*r), None, Some(*criterion), 1.0, PairKind::RequirementOnly));
                }
            }
            (true, false) => {
                unmatched_set.push(*criterion);
                for e in g.evidence.iter() {
                    labeled.push(pair(None, Some(*e), Some(*criterion), 1.0, PairKind::EvidenceOnly));
                }
            }
            (true, true) => {}
        }
    }
    labeled.sort_by(|a, b| {
        a.min_rank()
            .cmp(&b.min_rank())
            .then(b.is_two_sided().cmp(&a.is_two_sided()))
            .then(rank_of(&a.requirement).cmp(&rank_of(&b.requirement)))
            .then(rank_of(&a.evidence).cmp(&rank_of(&b.evidence)))
            .then(a.criterion.cmp(&b.criterion))
    });

    let zipped = unlabeled_req.len().min(unlabeled_evid.len());
    let mut positional: Vec<MappedPair> = (0..zipped)
        .map(|i| {
            pair(
                Some(unlabeled_req[i]),
                Some(unlabeled_evid[i]),
                None,
                0.0,
                PairKind::Positional,
            )
        })
        .collect();
    positional.sort_by(|a, b| {
        a.min_rank()
            .cmp(&b.min_rank())
            .then(rank_of(&a.requirement).cmp(&rank_of(&b.requirement)))
    });

    let mut singletons: Vec<MappedPair> = unlabeled_req[zipped..]
        .iter()
        .map(|r| pair(Some(*r), None, None, 0.0, PairKind::Singleton))
        .chain(
            unlabeled_evid[zipped..]
                .iter()
                .map(|e| pair(None, Some(*e), None, 0.0, PairKind::Singleton)),
        )
        .collect();
    // Requirement side first on equal rank.
    singletons.sort_by(|a, b| {
        a.min_rank()
            .cmp(&b.min_rank())
            .then(b.requirement.is_some().cmp(&a.requirement.is_some()))
    });

    // Criterion lists follow the final pair order.
    let mut gap_criteria: Vec<String> = Vec::new();
    let mut unmatched_evidence_criteria: Vec<String> = Vec::new();
    for p in labeled.iter() {
        let Some(c) = p.criterion.as_deref() else {
            continue;
        };
        if gap_set.contains(&c) && !gap_criteria.iter().any(|g| g == c) {
            gap_criteria.push(c.to_string());
        }
        if unmatched_set.contains(&c) && !unmatched_evidence_criteria.iter().any(|g| g == c) {
            unmatched_evidence_criteria.push(c.to_string());
        }
    }

    let mut pairs = labeled;
    pairs.extend(positional);
    pairs.extend(singletons);
    MappingResult {
        pairs,
        gap_criteria,
        unmatched_evidence_criteria,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compliance_core::domain::CorpusType;

    fn hit(corpus: CorpusType, id: &str, rank: usize, criteria: &[&str]) -> RetrievalHit {
        RetrievalHit {
            chunk_id: id.to_string(),
            document_id: "doc".to_string(),
            corpus,
            ordinal: 0,
            page: 1,
            criteria: criteria.iter().map(|c| c.to_string()).collect(),
            text: format!("text of {id}"),
            score: 0.9 - rank as f32 * 0.01,
            rank,
        }
    }

    #[test]
    fn empty_inputs_map_to_nothing() {
        let m = map_hits(&[], &[]);
        assert!(m.pairs.is_empty());
        assert_eq!(m.labeled_fraction(), 0.0);
    }

    #[test]
    fn surplus_hits_of_shared_criterion_are_not_gaps() {
        let req = vec![
            hit(CorpusType::Requirement, "r1", 1, &["1.1"]),
            hit(CorpusType::Requirement, "r2", 2, &["1.1"]),
        ];
        let evid = vec![hit(CorpusType::Evidence, "e1", 1, &["1.1"])];
        let m = map_hits(&req, &evid);
        assert_eq!(m.pairs.len(), 2);
        assert_eq!(m.pairs[0].kind, PairKind::Matched);
        assert_eq!(m.pairs[1].kind, PairKind::RequirementOnly);
        assert_eq!(m.pairs[1].confidence, 1.0);
        assert!(m.gap_criteria.is_empty());
    }

    #[test]
    fn singletons_put_requirement_first_on_equal_rank() {
        let req = vec![
            hit(CorpusType::Requirement, "r1", 1, &[]),
            hit(CorpusType::Requirement, "r2", 2, &[]),
        ];
        let evid = vec![
            hit(CorpusType::Evidence, "e1", 1, &[]),
            hit(CorpusType::Evidence, "e2", 2, &[]),
            hit(CorpusType::Evidence, "e3", 3, &[]),
        ];
        let m = map_hits(&req, &evid);
        let kinds: Vec<PairKind> = m.pairs.iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![PairKind::Positional, PairKind::Positional, PairKind::Singleton]
        );
        assert_eq!(
            m.pairs[2].evidence.as_ref().map(|h| h.chunk_id.as_str()),
            Some("e3")
        );
    }
}
