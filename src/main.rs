// src/main.rs
mod config;
mod evaluation;
mod extractors;
mod llm;
mod rubric;
mod storage;
mod tables;
mod utils;

use clap::Parser;
use std::path::{Path, PathBuf};

use config::{PipelineConfig, PromptMode};
use evaluation::{DocumentEvaluator, EvaluatedDocument};
use extractors::SectionSegmenter;
use llm::client::{DEFAULT_MODEL, DEFAULT_OLLAMA_URL};
use llm::OllamaClient;
use rubric::Rubric;
use storage::StorageManager;
use tables::{JsonTableSource, TableSource};
use utils::AppError;

/// Command Line Interface for the project report grader
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Rubric definition (JSON, or YAML with a .yaml/.yml extension)
    #[arg(short, long)]
    rubric: PathBuf,

    /// Table dump of a document to grade (repeatable)
    #[arg(short, long)]
    input: Vec<PathBuf>,

    /// Directory of table dumps (*.json) to grade
    #[arg(long)]
    input_dir: Option<PathBuf>,

    /// Output directory for results
    #[arg(short, long, default_value = "./output")]
    output_dir: PathBuf,

    /// Pipeline configuration file (JSON); missing fields use defaults
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Ollama model used for evaluation
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// Base URL of the Ollama service
    #[arg(long, default_value = DEFAULT_OLLAMA_URL)]
    ollama_url: String,

    /// Timeout for each generation request, in seconds (overrides the config file)
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Send one request per section instead of one per criterion
    #[arg(long)]
    per_section: bool,

    /// Include every rubric section in the results, unscored where nothing was obtained
    #[arg(long)]
    require_all_sections: bool,

    /// Debug mode - save reconstructed and annotated text for each document
    #[arg(short, long)]
    debug: bool,
}

fn load_config(args: &Args) -> Result<PipelineConfig, AppError> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_path(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(secs) = args.timeout_secs {
        config.service_timeout_secs = secs;
    }
    if args.per_section {
        config.prompt_mode = PromptMode::PerSection;
    }
    if args.require_all_sections {
        config.require_all_sections = true;
    }

    config.validate()?;
    Ok(config)
}

/// Explicit inputs first, then the directory's `*.json` files in name order.
fn collect_inputs(args: &Args) -> Result<Vec<PathBuf>, AppError> {
    let mut inputs = args.input.clone();

    if let Some(dir) = &args.input_dir {
        let mut found: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|e| e.eq_ignore_ascii_case("json")))
            .collect();
        found.sort();
        inputs.extend(found);
    }

    Ok(inputs)
}

fn document_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Writes the reconstructed text and its annotated copy for inspection.
fn save_debug_outputs(storage: &StorageManager, config: &PipelineConfig, document: &str, evaluated: &EvaluatedDocument) {
    for section in evaluated.sections.iter() {
        tracing::debug!("{}: section '{}' ({} bytes)", document, section.name, section.content.len());
    }

    if let Err(e) = storage.save_stream_text(document, &evaluated.text) {
        tracing::warn!("Failed to save reconstructed text: {}", e);
    }
    let marks = SectionSegmenter::new(&config.section_titles, &config.disambiguation).find_titles(&evaluated.text);
    let saved = storage
        .sections_debug_path(document)
        .and_then(|p| utils::text_debug::save_debug_text(&evaluated.text, &marks, &p));
    if let Err(e) = saved {
        tracing::warn!("Failed to save section debug text: {}", e);
    }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Setup Logging (reads RUST_LOG env var)
    utils::logging::setup_logging();

    // 2. Parse CLI Arguments
    let args = Args::parse();
    tracing::info!("Starting processing for args: {:?}", args);

    // 3. Configuration and rubric; either failing ends the run
    let config = load_config(&args)?;
    let rubric = Rubric::from_path(&args.rubric)?;

    let inputs = collect_inputs(&args)?;
    if inputs.is_empty() {
        return Err(AppError::Config("No input documents given (use --input or --input-dir)".to_string()));
    }
    tracing::info!("Grading {} documents", inputs.len());

    // 4. Collaborators
    let mut storage = StorageManager::new(&args.output_dir)?;
    let generator = OllamaClient::new(&args.ollama_url, &args.model, config.service_timeout())?;
    tracing::info!("Using model {} at {}", generator.model(), args.ollama_url);
    let table_source = JsonTableSource::new();
    let evaluator = DocumentEvaluator::new(&rubric, &config, &generator);

    // 5. Process each document
    let mut success_count = 0;
    let mut failure_count = 0;

    for path in &inputs {
        let document = storage.claim_document_name(&document_name(path));
        tracing::info!("Processing document: {} ({})", document, path.display());

        let tables = table_source.extract_tables(path);
        let evaluated = match evaluator.evaluate(&document, &tables).await {
            Ok(evaluated) => evaluated,
            Err(e) => {
                tracing::error!("Skipping {}: {}", document, e);
                failure_count += 1;
                continue;
            }
        };

        if args.debug {
            save_debug_outputs(&storage, &config, &document, &evaluated);
        }

        match storage.save_result(&evaluated.result) {
            Ok(path) => {
                tracing::info!("Saved result for {} to: {}", document, path.display());
                success_count += 1;
            }
            Err(e) => {
                tracing::error!("Failed to save result for {}: {}", document, e);
                failure_count += 1;
            }
        }
    }

    tracing::info!("Processing finished. Success: {}, Failures: {}", success_count, failure_count);

    if success_count == 0 && failure_count > 0 {
        return Err(AppError::Processing(format!("Failed to grade any of {} documents", failure_count)));
    }

    Ok(())
}
