use std::fs;
use std::path::{Path, PathBuf};

fn collect_rs_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(p) = stack.pop() {
        if p.is_file() {
            out.push(p);
            continue;
        }
        let entries = match fs::read_dir(&p) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for ent in entries.flatten() {
            let path = ent.path();
            if path.is_dir() {
                stack.push(path);
            } else if path.extension().and_then(|s| s.to_str()) == Some("rs") {
                out.push(path);
            }
        }
    }
    out.sort();
    out
}

fn src(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src").join(rel)
}

fn assert_absent(files: &[PathBuf], forbidden: &[&str]) {
    assert!(!files.is_empty());
    for f in files {
        let text = fs::read_to_string(f).unwrap_or_default();
        for needle in forbidden {
            assert!(
                !text.contains(needle),
                "forbidden reference `{needle}` found in {}",
                f.display()
            );
        }
    }
}

#[test]
fn mapping_only_reads_criteria_already_on_hits() {
    // Guardrail: mapping is pure. It must not re-extract criteria, touch the index,
    // or call a model.
    let files = collect_rs_files(&src("mapping"));
    assert_absent(
        &files,
        &["crate::chunking", "CriterionExtractor", "Embedder", "Llm", "DualIndex", "regex"],
    );
}

#[test]
fn synthesis_never_embeds_or_searches() {
    let files = collect_rs_files(&src("synth"));
    assert_absent(&files, &["Embedder", "DualIndex", "Collection", "embed("]);
}

#[test]
fn model_endpoints_come_from_the_guarded_client() {
    // Only OllamaClient parses base URLs, and it only accepts 127.0.0.1.
    let files: Vec<PathBuf> = collect_rs_files(&src(""))
        .into_iter()
        .filter(|f| !f.ends_with("ollama.rs"))
        .collect();
    assert_absent(&files, &["http://", "https://", "127.0.0.1", "localhost"]);
}
