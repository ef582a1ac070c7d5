use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use compliance_ai::chunking::{Chunk, PatternCriterionExtractor};
use compliance_ai::embeddings::Embedder;
use compliance_ai::index::{CorpusFilter, DualIndex, StoredDocument};
use compliance_ai::retrieve::{KeywordTopicMapper, QueryOptions, QueryType, Retriever};
use compliance_core::config::{KeywordGroup, QueryMappingSettings, RetrievalSettings};
use compliance_core::domain::{CorpusType, Document};
use compliance_core::error::AppError;

/// Counts of 'a' and 'b', the smallest embedder with controllable angles.
#[derive(Default)]
struct CountABEmbedder {
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

impl Embedder for CountABEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs.lock().expect("lock").push(input.to_string());
        let a = input.chars().filter(|c| *c == 'a').count() as f32;
        let b = input.chars().filter(|c| *c == 'b').count() as f32;
        Ok(vec![a, b])
    }
}

fn chunk(corpus: CorpusType, document_id: &str, text: &str, criteria: &[&str]) -> Chunk {
    Chunk {
        chunk_id: format!("{document_id}#00000"),
        document_id: document_id.to_string(),
        corpus,
        ordinal: 0,
        text: text.to_string(),
        char_len: text.chars().count(),
        start_offset: 0,
        end_offset: text.chars().count(),
        page: 1,
        criteria: criteria.iter().map(|c| c.to_string()).collect(),
        text_sha256: String::new(),
    }
}

fn seeded() -> (Arc<DualIndex>, Arc<CountABEmbedder>, Retriever) {
    let index = Arc::new(DualIndex::open_in_memory().expect("index"));
    let embedder = Arc::new(CountABEmbedder::default());
    let rows = [
        (CorpusType::Requirement, "req-aa", "aa", vec!["1.1"]),
        (CorpusType::Requirement, "req-ab", "ab", vec!["1.2"]),
        (CorpusType::Requirement, "req-bb", "bb", vec![]),
        (CorpusType::Evidence, "ev-aa", "aaa", vec!["1.1"]),
        (CorpusType::Evidence, "ev-b", "b", vec![]),
    ];
    for (corpus, id, text, criteria) in rows {
        let v = embedder.embed("m", text).expect("embed");
        index
            .upsert(corpus, &chunk(corpus, id, text, &criteria), &v, "m")
            .expect("upsert");
    }
    embedder.calls.store(0, Ordering::SeqCst);

    let retriever = Retriever::new(
        index.clone(),
        embedder.clone(),
        Arc::new(PatternCriterionExtractor::new().expect("patterns")),
        Arc::new(KeywordTopicMapper::empty()),
        RetrievalSettings {
            k_requirement: 10,
            k_evidence: 10,
            score_floor: 0.65,
        },
        "m".to_string(),
    );
    (index, embedder, retriever)
}

#[test]
fn searches_both_corpora_with_one_query_embedding() {
    let (_index, embedder, retriever) = seeded();
    let out = retriever
        .retrieve("a a", &QueryOptions::default())
        .expect("retrieve");

    assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    let req: Vec<&str> = out.requirement_hits.iter().map(|h| h.document_id.as_str()).collect();
    // "ab" sits at cos 0.707, "bb" at 0.
    assert_eq!(req, vec!["req-aa", "req-ab"]);
    let ev: Vec<&str> = out.evidence_hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(ev, vec!["ev-aa"]);
    assert!(out.requirement_hits.iter().all(|h| h.corpus == CorpusType::Requirement));
    assert!(out.evidence_hits.iter().all(|h| h.corpus == CorpusType::Evidence));
}

#[test]
fn per_query_overrides_win_over_settings() {
    let (_index, _embedder, retriever) = seeded();
    let opts = QueryOptions {
        k_requirement: Some(1),
        score_floor: Some(0.0),
        ..QueryOptions::default()
    };
    let out = retriever.retrieve("a", &opts).expect("retrieve");
    assert_eq!(out.requirement_hits.len(), 1);
    assert_eq!(out.evidence_hits.len(), 2);

    let filtered = QueryOptions {
        score_floor: Some(0.0),
        requirement_filter: CorpusFilter {
            criterion: Some("1".to_string()),
            ..CorpusFilter::default()
        },
        ..QueryOptions::default()
    };
    let out = retriever.retrieve("a", &filtered).expect("retrieve");
    let req: Vec<&str> = out.requirement_hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(req, vec!["req-aa", "req-ab"]);
}

#[test]
fn invalid_queries_are_rejected_before_embedding() {
    let (_index, embedder, retriever) = seeded();
    for q in ["", "   \n"] {
        let err = retriever.retrieve(q, &QueryOptions::default()).expect_err("empty");
        assert_eq!(err.code, "QUERY_INVALID");
    }
    let zero_k = QueryOptions {
        k_evidence: Some(0),
        ..QueryOptions::default()
    };
    assert_eq!(
        retriever.retrieve("a", &zero_k).expect_err("k=0").code,
        "QUERY_INVALID"
    );
    let bad_floor = QueryOptions {
        score_floor: Some(1.5),
        ..QueryOptions::default()
    };
    assert_eq!(
        retriever.retrieve("a", &bad_floor).expect_err("floor").code,
        "QUERY_INVALID"
    );
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn query_is_classified_with_named_criteria() {
    let (_index, _embedder, retriever) = seeded();
    let out = retriever
        .retrieve("Is there evidence for criterion 1.1? a", &QueryOptions::default())
        .expect("retrieve");
    assert_eq!(out.analysis.query_type, QueryType::CriterionSpecific);
    assert_eq!(out.analysis.criteria, vec!["1.1"]);

    let out = retriever
        .retrieve("what evidence supports this? ab", &QueryOptions::default())
        .expect("retrieve");
    assert_eq!(out.analysis.query_type, QueryType::EvidenceLookup);
}

#[test]
fn zero_query_embedding_is_reported() {
    let (_index, _embedder, retriever) = seeded();
    // No 'a' or 'b' characters: the query vector is zero and cannot be scored.
    let err = retriever
        .retrieve("xyz", &QueryOptions::default())
        .expect_err("zero vector");
    assert_eq!(err.code, "MODEL_EMBEDDINGS_FAILED");
}

fn categorized(
    index: &DualIndex,
    embedder: &CountABEmbedder,
    corpus: CorpusType,
    document_id: &str,
    text: &str,
    criteria: &[&str],
    category: Option<&str>,
) {
    let stored = StoredDocument {
        document: Document {
            document_id: document_id.to_string(),
            corpus,
            filename: format!("{document_id}.txt"),
            content_sha256: document_id.to_string(),
            ingested_at: "2026-01-01T00:00:00Z".to_string(),
            page_count: 1,
            chunk_count: 1,
            category: category.map(str::to_string),
            version: None,
        },
        content: text.to_string(),
        page_starts: Vec::new(),
    };
    let v = embedder.embed("m", text).expect("embed");
    index
        .replace_document(&stored, &[(chunk(corpus, document_id, text, criteria), v)], "m")
        .expect("replace");
}

fn keyword(id: &str, words: &[&str]) -> KeywordGroup {
    KeywordGroup {
        id: id.to_string(),
        keywords: words.iter().map(|w| w.to_string()).collect(),
    }
}

#[test]
fn keyword_suggestions_narrow_retrieval_only_when_requested() {
    let index = Arc::new(DualIndex::open_in_memory().expect("index"));
    let embedder = Arc::new(CountABEmbedder::default());
    let e = embedder.as_ref();
    categorized(&index, e, CorpusType::Requirement, "req-teach", "aa", &["2.1"], None);
    categorized(&index, e, CorpusType::Requirement, "req-lib", "aa", &["4.1"], None);
    categorized(&index, e, CorpusType::Evidence, "ev-mentor", "aaa", &[], Some("Student_Support"));
    categorized(&index, e, CorpusType::Evidence, "ev-rules", "aa", &[], Some("policies"));
    embedder.inputs.lock().expect("lock").clear();

    let topics = KeywordTopicMapper::new(&QueryMappingSettings {
        criteria: vec![keyword("2", &["mentoring", "teaching"]), keyword("4", &["library"])],
        categories: vec![keyword("student_support", &["mentoring"])],
    })
    .expect("topics");
    let retriever = Retriever::new(
        index.clone(),
        embedder.clone(),
        Arc::new(PatternCriterionExtractor::new().expect("patterns")),
        Arc::new(topics),
        RetrievalSettings::default(),
        "m".to_string(),
    );
    let query = "mentoring a";

    let plain = retriever.retrieve(query, &QueryOptions::default()).expect("retrieve");
    assert_eq!(plain.analysis.topics.criteria, vec!["2"]);
    assert_eq!(plain.analysis.topics.categories, vec!["student_support"]);
    assert_eq!(plain.requirement_hits.len(), 2);
    assert_eq!(plain.evidence_hits.len(), 2);
    assert_eq!(plain.requirement_filter, CorpusFilter::default());

    let narrowed = retriever
        .retrieve(
            query,
            &QueryOptions {
                apply_suggested_filters: true,
                expand_query: true,
                ..QueryOptions::default()
            },
        )
        .expect("retrieve");
    let req: Vec<&str> = narrowed.requirement_hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(req, vec!["req-teach"]);
    let ev: Vec<&str> = narrowed.evidence_hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(ev, vec!["ev-mentor"]);
    assert_eq!(narrowed.requirement_filter.criterion.as_deref(), Some("2"));
    assert_eq!(narrowed.evidence_filter.category.as_deref(), Some("student_support"));

    let inputs = embedder.inputs.lock().expect("lock").clone();
    assert_eq!(inputs, vec!["mentoring a".to_string(), "mentoring a compliance criterion 2".to_string()]);

    // Explicit filters are never overridden by suggestions.
    let explicit = retriever
        .retrieve(
            query,
            &QueryOptions {
                apply_suggested_filters: true,
                requirement_filter: CorpusFilter {
                    criterion: Some("4".to_string()),
                    ..CorpusFilter::default()
                },
                ..QueryOptions::default()
            },
        )
        .expect("retrieve");
    let req: Vec<&str> = explicit.requirement_hits.iter().map(|h| h.document_id.as_str()).collect();
    assert_eq!(req, vec!["req-lib"]);
}
