use crate::index::RetrievalHit;
use crate::mapping::{MappedPair, MappingResult};
use crate::retrieve::QueryAnalysis;

fn hit_block(label: &str, hit: Option<&RetrievalHit>) -> String {
    match hit {
        Some(h) => format!(
            "{label} [[chunk:{}]] document_id={} page={} score={:.3}\n{}",
            h.chunk_id,
            h.document_id,
            h.page,
            h.score,
            h.text.trim()
        ),
        None => format!("{label}: none retrieved"),
    }
}

fn pair_block(i: usize, p: &MappedPair) -> String {
    let criterion = p.criterion.as_deref().unwrap_or("unlabeled");
    format!(
        "Pair {} (criterion={criterion}; pairing_confidence={:.0})\n{}\n{}",
        i + 1,
        p.confidence,
        hit_block("REQUIREMENT", p.requirement.as_ref()),
        hit_block("EVIDENCE", p.evidence.as_ref()),
    )
}

pub fn context_blocks(mapping: &MappingResult, top_pairs: usize) -> String {
    let blocks: Vec<String> = mapping
        .pairs
        .iter()
        .take(top_pairs)
        .enumerate()
        .map(|(i, p)| pair_block(i, p))
        .collect();
    if blocks.is_empty() {
        return "(no passages retrieved)".to_string();
    }
    blocks.join("\n\n---\n\n")
}

pub fn compliance_prompt(
    query: &str,
    analysis: &QueryAnalysis,
    mapping: &MappingResult,
    top_pairs: usize,
) -> String {
    let criteria = if analysis.criteria.is_empty() {
        "none".to_string()
    } else {
        analysis.criteria.join(", ")
    };
    let suggested = if analysis.topics.criteria.is_empty() {
        "none".to_string()
    } else {
        analysis.topics.criteria.join(", ")
    };
    let gaps = if mapping.gap_criteria.is_empty() {
        "none".to_string()
    } else {
        mapping.gap_criteria.join(", ")
    };
    let context = context_blocks(mapping, top_pairs);

    // Keep the contract explicit:
    // - Use ONLY the passages provided.
    // - Cite passages inline as [[chunk:<chunk_id>]].
    // - Answer inside the fixed tag set so the output can be parsed.
    format!(
        r#"You are a compliance analyst comparing regulatory requirements with institutional evidence.

Rules (non-negotiable):
1) Use ONLY the passages provided below. Do not invent requirements or evidence.
2) Cite every concrete claim inline with the marker [[chunk:<chunk_id>]] of the passage it comes from.
3) If the evidence does not cover a requirement, say so plainly. Do not assume it exists.
4) Fill every tag below exactly once, in this order, and nothing outside <response></response>.

User query: {query}
Query type: {query_type}
Criteria named in the query: {criteria}
Criteria suggested by query keywords: {suggested}
Criteria with requirements but no retrieved evidence: {gaps}

Passages (requirement/evidence pairs, most relevant first):
{context}

Output format:
<response>
<requirement_summary>What the requirement passages expect.</requirement_summary>
<evidence_summary>What the evidence passages show.</evidence_summary>
<mapping>Which criteria the evidence maps to.</mapping>
<compliance_analysis>How the evidence meets or falls short of the requirements.</compliance_analysis>
<status>One of: compliant, partially-compliant, non-compliant, gap-identified, informational</status>
<recommendations>Concrete next steps.</recommendations>
<gaps>Optional. One missing item per line, each starting with "- ".</gaps>
</response>
"#,
        query_type = analysis.query_type.as_str(),
    )
}
