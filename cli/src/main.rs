use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use compliance_ai::index::CorpusFilter;
use compliance_ai::retrieve::QueryOptions;
use compliance_ai::ComplianceEngine;
use compliance_core::config::{Settings, DEFAULT_CONFIG_FILE};
use compliance_core::domain::{CorpusType, SourceMetadata, SyncSnapshot};
use compliance_core::error::AppError;
use compliance_core::logging;
use serde::Serialize;
use tracing::debug;

#[derive(Parser)]
#[command(name = "compliance")]
#[command(about = "Ask compliance questions against requirement and evidence corpora", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (defaults, then this file, then COMPLIANCE_* env vars)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// JSON file with the last upstream sync state, reported by `stats`
    #[arg(long, global = true)]
    sync_file: Option<PathBuf>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest (or re-ingest) one extracted text file into a corpus
    Ingest(IngestArgs),
    /// Answer a question from both corpora
    Query(QueryArgs),
    /// Rebuild a document's chunks from its stored text
    Reindex {
        document_id: String,
    },
    /// Per-corpus counts, dimensions and sync state
    Stats,
    /// Check the index and the local model backend
    Health,
}

#[derive(Args)]
struct IngestArgs {
    /// UTF-8 text already extracted from the source document
    file: PathBuf,
    /// `requirement` or `evidence`
    #[arg(long, value_parser = CorpusType::parse)]
    corpus: CorpusType,
    /// Stable document id; defaults to the file stem
    #[arg(long)]
    id: Option<String>,
    /// Original filename to record; defaults to the file name
    #[arg(long)]
    filename: Option<String>,
    #[arg(long)]
    category: Option<String>,
    #[arg(long)]
    version: Option<String>,
    /// Page count reported by the extractor
    #[arg(long)]
    pages: Option<u32>,
    /// Rebuild even if the content is unchanged
    #[arg(long)]
    force: bool,
}

#[derive(Args)]
struct QueryArgs {
    text: String,
    #[arg(long)]
    k_requirement: Option<usize>,
    #[arg(long)]
    k_evidence: Option<usize>,
    /// Minimum cosine similarity in [0, 1]
    #[arg(long)]
    floor: Option<f32>,
    /// Only search under this criterion (e.g. `2` or `2.3`)
    #[arg(long)]
    criterion: Option<String>,
    /// Only search evidence documents in this category
    #[arg(long)]
    category: Option<String>,
    /// Fill unset criterion/category filters from keywords in the query
    #[arg(long)]
    suggested_filters: bool,
    /// Embed the query with criterion and query-type context appended
    #[arg(long)]
    expand: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let body = serde_json::to_string(&err.to_response()).unwrap_or_else(|_| err.to_string());
            eprintln!("{body}");
            if let Some(details) = err.details.as_deref() {
                debug!(code = %err.code, details, "command failed");
            }
            if err.is_fatal_configuration() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: &Cli) -> Result<(), AppError> {
    let settings = Settings::load_from(&cli.config)?;
    // A second subscriber (e.g. under a test harness) is not an error for the CLI.
    let _ = logging::init(&settings.logging.level);

    let sync = match cli.sync_file.as_deref() {
        Some(path) => read_sync_snapshot(path)?,
        None => SyncSnapshot::default(),
    };
    let engine = ComplianceEngine::open_with_ollama(settings, sync)?;

    match &cli.command {
        Commands::Ingest(args) => ingest(&engine, args, cli.pretty),
        Commands::Query(args) => {
            let opts = QueryOptions {
                k_requirement: args.k_requirement,
                k_evidence: args.k_evidence,
                score_floor: args.floor,
                requirement_filter: CorpusFilter {
                    criterion: args.criterion.clone(),
                    ..CorpusFilter::default()
                },
                evidence_filter: CorpusFilter {
                    criterion: args.criterion.clone(),
                    category: args.category.clone(),
                    ..CorpusFilter::default()
                },
                apply_suggested_filters: args.suggested_filters,
                expand_query: args.expand,
            };
            print_json(&engine.query(&args.text, &opts)?, cli.pretty)
        }
        Commands::Reindex { document_id } => {
            let result = engine.reindex(document_id);
            print_json(&result, cli.pretty)?;
            match result.error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
        Commands::Stats => print_json(&engine.stats()?, cli.pretty),
        Commands::Health => print_json(&engine.health(), cli.pretty),
    }
}

fn ingest(engine: &ComplianceEngine, args: &IngestArgs, pretty: bool) -> Result<(), AppError> {
    let text = fs::read_to_string(&args.file).map_err(|e| {
        AppError::new("DOCUMENT_READ_FAILED", "Failed to read document text")
            .with_details(format!("path={}; err={}", args.file.display(), e))
    })?;
    let stem = args
        .file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string();
    let document_id = args.id.clone().unwrap_or(stem);
    let filename = args.filename.clone().unwrap_or_else(|| {
        args.file
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_string()
    });
    let metadata = SourceMetadata {
        filename,
        page_count: args.pages,
        page_starts: Vec::new(),
        category: args.category.clone(),
        version: args.version.clone(),
    };

    let result = if args.force {
        engine.force_ingest(&document_id, args.corpus, &text, &metadata)
    } else {
        engine.ingest(&document_id, args.corpus, &text, &metadata)
    };
    print_json(&result, pretty)?;
    match result.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn read_sync_snapshot(path: &Path) -> Result<SyncSnapshot, AppError> {
    let raw = fs::read_to_string(path).map_err(|e| {
        AppError::new("CONFIG_SYNC_FILE_READ_FAILED", "Failed to read sync snapshot")
            .with_details(format!("path={}; err={}", path.display(), e))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        AppError::new("CONFIG_SYNC_FILE_INVALID", "Sync snapshot is not valid JSON")
            .with_details(format!("path={}; err={}", path.display(), e))
    })
}

fn print_json<T: Serialize>(value: &T, pretty: bool) -> Result<(), AppError> {
    let out = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| AppError::new("OUTPUT_SERIALIZE_FAILED", "Failed to serialize output").with_details(e.to_string()))?;
    println!("{out}");
    Ok(())
}
