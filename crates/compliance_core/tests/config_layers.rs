use std::fs;

use compliance_core::config::Settings;
use figment::{
    providers::{Format, Serialized, Toml},
    Figment,
};

#[test]
fn toml_file_overrides_defaults_and_missing_keys_keep_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("compliance.toml");
    fs::write(
        &path,
        r#"
[chunking]
chunk_size = 512
chunk_overlap = 50

[retrieval]
score_floor = 0.5
"#,
    )
    .expect("write toml");

    let s = Settings::load_from(&path).expect("load");
    assert_eq!(s.chunking.chunk_size, 512);
    assert_eq!(s.chunking.chunk_overlap, 50);
    assert!((s.retrieval.score_floor - 0.5).abs() < f32::EPSILON);
    assert_eq!(s.retrieval.k_evidence, 10);
    assert_eq!(s.generation.model, "llama3.2:1b");
}

#[test]
fn missing_file_yields_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let s = Settings::load_from(&dir.path().join("absent.toml")).expect("load");
    assert_eq!(s.chunking.chunk_size, 1000);
    assert_eq!(s.chunking.chunk_overlap, 200);
}

#[test]
fn invalid_layered_values_fail_validation() {
    let figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(
        r#"
[chunking]
chunk_size = 100
chunk_overlap = 100
"#,
    ));
    let err = Settings::from_figment(figment).expect_err("must reject");
    assert_eq!(err.code, "CONFIG_CHUNKING_INVALID");
}

#[test]
fn malformed_toml_is_a_configuration_error() {
    let figment = Figment::from(Serialized::defaults(Settings::default()))
        .merge(Toml::string("[retrieval]\nk_requirement = \"ten\"\n"));
    let err = Settings::from_figment(figment).expect_err("must reject");
    assert_eq!(err.code, "CONFIG_LOAD_FAILED");
    assert!(err.is_fatal_configuration());
}

#[test]
fn toml_keyword_table_replaces_the_builtin_one() {
    let figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::string(
        r#"
[[query_mapping.categories]]
id = "minutes"
keywords = ["meeting minutes", "board minutes"]
"#,
    ));
    let s = Settings::from_figment(figment).expect("load");
    assert_eq!(s.query_mapping.categories.len(), 1);
    assert_eq!(s.query_mapping.categories[0].id, "minutes");
    assert_eq!(s.query_mapping.criteria.len(), 7);
}
