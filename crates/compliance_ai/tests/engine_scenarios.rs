use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use compliance_ai::embeddings::Embedder;
use compliance_ai::index::DualIndex;
use compliance_ai::ingest::IngestStatus;
use compliance_ai::llm::Llm;
use compliance_ai::retrieve::{QueryOptions, QueryType};
use compliance_ai::synth::{ComplianceStatus, NO_EVIDENCE_SUMMARY};
use compliance_ai::ComplianceEngine;
use compliance_core::config::Settings;
use compliance_core::domain::{CorpusType, SourceMetadata, SyncSnapshot};
use compliance_core::error::{AppError, ErrorKind};

const QUERY: &str = "How is student mentoring handled under criterion 1.1?";
const QUERY_2_3: &str = "Show the assessment moderation arrangements";

const REQ_1_1: &str = "Criterion 1.1: Every student is assigned a personal tutor for the full programme.";
const EV_1_1: &str = "Criterion 1.1 tutor log: 412 of 412 students met their tutor this year.";
const REQ_2_3: &str = "Criterion 2.3: Assessment is moderated by a second marker.";
const EV_2_3: &str = "Criterion 2.3 moderation report signed by second markers.";
const REQ_PLAIN: &str = "Assessment regulations are reviewed annually.";
const EV_PLAIN: &str = "Exam board minutes, June session.";

fn unit_at(c: f32) -> Vec<f32> {
    vec![c, (1.0 - c * c).sqrt(), 0.0]
}

/// Maps known passages to fixed vectors so scores are exact. Unknown text is orthogonal to
/// every query.
#[derive(Default)]
struct TableEmbedder {
    calls: AtomicUsize,
}

impl Embedder for TableEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let v = match input {
            QUERY | QUERY_2_3 => vec![1.0, 0.0, 0.0],
            REQ_1_1 => unit_at(0.82),
            EV_1_1 => unit_at(0.9),
            REQ_2_3 => unit_at(0.9),
            EV_2_3 => unit_at(0.85),
            REQ_PLAIN => unit_at(0.8),
            EV_PLAIN => unit_at(0.75),
            _ => vec![0.0, 0.0, 1.0],
        };
        Ok(v)
    }
}

/// Always claims compliance, to show the engine does not trust it blindly.
struct OverconfidentLlm {
    calls: AtomicUsize,
    last_prompt: Mutex<String>,
}

impl OverconfidentLlm {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            last_prompt: Mutex::new(String::new()),
        })
    }
}

impl Llm for OverconfidentLlm {
    fn generate(&self, _model: &str, prompt: &str) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().expect("lock") = prompt.to_string();
        Ok("<response>\n<requirement_summary>Students need a personal tutor.</requirement_summary>\n\
            <evidence_summary>Everything is covered.</evidence_summary>\n\
            <mapping>Criterion 1.1.</mapping>\n\
            <compliance_analysis>Fully met.</compliance_analysis>\n\
            <status>compliant</status>\n\
            <recommendations>None.</recommendations>\n</response>"
            .to_string())
    }
}

fn engine_with(llm: Arc<OverconfidentLlm>, sync: SyncSnapshot) -> ComplianceEngine {
    let index = DualIndex::open_in_memory().expect("index");
    ComplianceEngine::with_index(
        Settings::default(),
        index,
        Arc::new(TableEmbedder::default()),
        llm,
        sync,
    )
    .expect("engine")
}

fn meta(name: &str) -> SourceMetadata {
    SourceMetadata {
        filename: name.to_string(),
        ..SourceMetadata::default()
    }
}

fn ingest_ok(engine: &ComplianceEngine, id: &str, corpus: CorpusType, text: &str) {
    let result = engine.ingest(id, corpus, text, &meta(&format!("{id}.txt")));
    assert_eq!(result.status, IngestStatus::Complete, "{:?}", result.error);
}

#[test]
fn requirement_without_evidence_is_reported_as_gap() {
    let llm = OverconfidentLlm::new();
    let engine = engine_with(llm.clone(), SyncSnapshot::default());
    ingest_ok(&engine, "handbook", CorpusType::Requirement, REQ_1_1);

    let resp = engine.query(QUERY, &QueryOptions::default()).expect("query");
    assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    assert_eq!(resp.query_type, QueryType::CriterionSpecific);
    assert_eq!(resp.status, ComplianceStatus::GapIdentified);
    assert_eq!(resp.evidence_summary, NO_EVIDENCE_SUMMARY);
    assert_eq!(resp.requirement_summary, "Students need a personal tutor.");
    assert_eq!(resp.requirement_sources.len(), 1);
    assert!((resp.requirement_sources[0].relevance_score - 0.82).abs() < 1e-3);
    assert!(resp.evidence_sources.is_empty());
    assert_eq!(resp.gaps[0].criterion.as_deref(), Some("1.1"));

    // The same question with evidence in place scores higher.
    let llm_matched = OverconfidentLlm::new();
    let matched_engine = engine_with(llm_matched, SyncSnapshot::default());
    ingest_ok(&matched_engine, "handbook", CorpusType::Requirement, REQ_1_1);
    ingest_ok(&matched_engine, "tutor-log", CorpusType::Evidence, EV_1_1);
    let matched = matched_engine.query(QUERY, &QueryOptions::default()).expect("query");
    assert_eq!(matched.status, ComplianceStatus::Compliant);
    assert!(resp.confidence < matched.confidence, "{} vs {}", resp.confidence, matched.confidence);
}

#[test]
fn shared_criterion_pair_leads_the_generation_context() {
    let llm = OverconfidentLlm::new();
    let engine = engine_with(llm.clone(), SyncSnapshot::default());
    ingest_ok(&engine, "regs", CorpusType::Requirement, REQ_PLAIN);
    ingest_ok(&engine, "moderation-policy", CorpusType::Requirement, REQ_2_3);
    ingest_ok(&engine, "board-minutes", CorpusType::Evidence, EV_PLAIN);
    ingest_ok(&engine, "moderation-report", CorpusType::Evidence, EV_2_3);

    let resp = engine.query(QUERY_2_3, &QueryOptions::default()).expect("query");
    assert_eq!(resp.requirement_sources.len(), 2);
    assert_eq!(resp.requirement_sources[0].chunk_id, "moderation-policy#00000");
    assert_eq!(resp.evidence_sources[0].chunk_id, "moderation-report#00000");

    let prompt = llm.last_prompt.lock().expect("lock").clone();
    assert!(prompt.contains("Pair 1 (criterion=2.3; pairing_confidence=1)"), "{prompt}");
    assert!(prompt.contains("Pair 2 (criterion=unlabeled; pairing_confidence=0)"));
    let labeled_at = prompt.find("[[chunk:moderation-policy#00000]]").expect("labeled pair");
    let positional_at = prompt.find("[[chunk:regs#00000]]").expect("positional pair");
    assert!(labeled_at < positional_at);
}

#[test]
fn reingesting_identical_content_is_skipped() {
    let engine = engine_with(OverconfidentLlm::new(), SyncSnapshot::default());
    ingest_ok(&engine, "handbook", CorpusType::Requirement, REQ_1_1);
    let before = engine.stats().expect("stats");

    let again = engine.ingest("handbook", CorpusType::Requirement, REQ_1_1, &meta("handbook.txt"));
    assert_eq!(again.status, IngestStatus::Skipped);
    let after = engine.stats().expect("stats");
    assert_eq!(after.requirement.chunk_count, before.requirement.chunk_count);
    assert_eq!(after.requirement.last_ingested_at, before.requirement.last_ingested_at);
}

#[test]
fn reindex_rebuilds_from_stored_text() {
    let engine = engine_with(OverconfidentLlm::new(), SyncSnapshot::default());
    ingest_ok(&engine, "tutor-log", CorpusType::Evidence, EV_1_1);

    let rebuilt = engine.reindex("tutor-log");
    assert_eq!(rebuilt.status, IngestStatus::Complete);
    assert_eq!(rebuilt.corpus, CorpusType::Evidence);

    let missing = engine.reindex("nope");
    assert_eq!(missing.status, IngestStatus::Failed);
    assert_eq!(
        missing.error.map(|e| e.code),
        Some("INGEST_DOCUMENT_NOT_FOUND".to_string())
    );
}

#[test]
fn empty_corpora_answer_without_calling_the_model() {
    let llm = OverconfidentLlm::new();
    let engine = engine_with(llm.clone(), SyncSnapshot::default());
    let resp = engine.query(QUERY, &QueryOptions::default()).expect("query");
    assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    assert_eq!(resp.status, ComplianceStatus::Informational);
    assert!(!resp.recommendations.is_empty());
}

#[test]
fn stats_include_counts_and_sync_snapshot() {
    let sync = SyncSnapshot {
        last_sync_at: Some("2026-03-01T08:00:00Z".to_string()),
        last_sync_status: Some("ok".to_string()),
        documents_discovered: 7,
    };
    let engine = engine_with(OverconfidentLlm::new(), sync.clone());
    ingest_ok(&engine, "handbook", CorpusType::Requirement, REQ_1_1);
    ingest_ok(&engine, "tutor-log", CorpusType::Evidence, EV_1_1);

    let stats = engine.stats().expect("stats");
    assert_eq!(stats.sync, sync);
    assert_eq!(stats.requirement.document_count, 1);
    assert_eq!(stats.evidence.document_count, 1);
    assert_eq!(stats.requirement.dims, Some(3));
    assert!(stats.last_ingested_at.is_some());

    let health = engine.health();
    assert!(health.index_ok);
    assert_eq!(health.model_ok, None);
}

#[test]
fn stored_dims_that_disagree_with_config_fail_at_startup() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut settings = Settings::default();
    settings.storage.index_dir = dir.path().to_path_buf();
    {
        let engine = ComplianceEngine::open(
            settings.clone(),
            Arc::new(TableEmbedder::default()),
            OverconfidentLlm::new(),
            SyncSnapshot::default(),
        )
        .expect("engine");
        ingest_ok(&engine, "handbook", CorpusType::Requirement, REQ_1_1);
    }

    settings.embedding.dims = Some(768);
    let Err(err) = ComplianceEngine::open(
        settings,
        Arc::new(TableEmbedder::default()),
        OverconfidentLlm::new(),
        SyncSnapshot::default(),
    ) else {
        panic!("expected a dimension mismatch");
    };
    assert_eq!(err.code, "CONFIG_EMBEDDING_DIMS_MISMATCH");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(err.is_fatal_configuration());
}
