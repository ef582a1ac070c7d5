/// Scale checks for the dual index: bulk upserts, search latency, and ranking stability
/// with many near-identical vectors.
use std::time::Instant;

use compliance_ai::chunking::Chunk;
use compliance_ai::index::DualIndex;
use compliance_core::domain::CorpusType;

const DIMS: usize = 64;

fn synthetic_vector(i: usize) -> Vec<f32> {
    (0..DIMS)
        .map(|d| (((i * 31 + d * 17) % 97) as f32 / 97.0) + 0.01)
        .collect()
}

fn synthetic_chunk(corpus: CorpusType, i: usize) -> Chunk {
    let text = format!(
        "Criterion {}.{} passage #{i}. {}",
        i % 9 + 1,
        i % 5 + 1,
        "Institutional evidence text. ".repeat(5 + i % 10)
    );
    Chunk {
        chunk_id: format!("doc-{:04}#{:05}", i / 10, i % 10),
        document_id: format!("doc-{:04}", i / 10),
        corpus,
        ordinal: (i % 10) as u32,
        char_len: text.chars().count(),
        start_offset: 0,
        end_offset: text.chars().count(),
        page: 1,
        criteria: vec![format!("{}.{}", i % 9 + 1, i % 5 + 1)],
        text_sha256: String::new(),
        text,
    }
}

fn fill(index: &DualIndex, corpus: CorpusType, n: usize) {
    for i in 0..n {
        index
            .upsert(corpus, &synthetic_chunk(corpus, i), &synthetic_vector(i), "stress")
            .expect("upsert");
    }
}

#[test]
fn identical_vectors_tie_in_insertion_order() {
    let index = DualIndex::open_in_memory().expect("index");
    fill(&index, CorpusType::Evidence, 500);

    // Vectors repeat every 97 rows, so rows 30, 127, 224, 321 and 418 are identical.
    let target = 321;
    let hits = index
        .search(CorpusType::Evidence, &synthetic_vector(target), 10, 0.0)
        .expect("search");
    assert_eq!(hits.len(), 10);
    let top: Vec<String> = hits[..5].iter().map(|h| h.chunk_id.clone()).collect();
    let expected: Vec<String> = [30, 127, 224, 321, 418]
        .iter()
        .map(|i| synthetic_chunk(CorpusType::Evidence, *i).chunk_id)
        .collect();
    assert_eq!(top, expected);
    assert!(hits[5].score < hits[4].score);
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    let again = index
        .search(CorpusType::Evidence, &synthetic_vector(target), 10, 0.0)
        .expect("search");
    assert_eq!(hits, again);
}

#[test]
#[ignore]
fn stress_dual_index_20k_chunks() {
    let dir = tempfile::tempdir().expect("tempdir");
    let index = DualIndex::open(dir.path()).expect("index");

    let start = Instant::now();
    fill(&index, CorpusType::Requirement, 10_000);
    fill(&index, CorpusType::Evidence, 10_000);
    eprintln!("upsert 20k chunks: {:?}", start.elapsed());

    let start = Instant::now();
    for i in 0..20 {
        let hits = index
            .search(CorpusType::Evidence, &synthetic_vector(i), 10, 0.65)
            .expect("search");
        assert!(!hits.is_empty());
    }
    let per_query = start.elapsed() / 20;
    eprintln!("search 10k chunks: {:?} per query", per_query);
    assert!(per_query.as_secs() < 2, "search should stay interactive");

    let stats = index.stats(CorpusType::Requirement).expect("stats");
    assert_eq!(stats.chunk_count, 10_000);
    assert_eq!(stats.dims, Some(DIMS));
}
