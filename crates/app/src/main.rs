use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use scandoc_core::{
    build_page_embeddings, page_texts_from_json, AnswerEngine, AnswerError, BlockGraph,
    CharacterNgramEmbedder, ChatCompletionModel, DocumentStructurer, Embedder, FsPartStore,
    HttpEmbedder, MergeStatus, NoiseCleaner, PageEmbeddings, PartMergeCoordinator, PipelineConfig,
    RecognitionResult, StructuredDocument, DEFAULT_EMBEDDING_DIMENSIONS,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "scandoc", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// JSON pipeline configuration; defaults apply to anything it leaves out.
    #[arg(long, global = true, env = "SCANDOC_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Turn one recognition result into per-page lines, key-value pairs, and tables.
    Structure {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Also strip repeated headers and footers.
        #[arg(long, default_value_t = false)]
        clean: bool,
    },
    /// Merge the part results of a split document once all of them are present.
    Merge {
        /// Folder holding `<document>.split` and `<document>/` part results.
        #[arg(long)]
        root: PathBuf,
        #[arg(long)]
        document: String,
    },
    /// Strip repeated headers and footers from a structured or page-text document.
    Clean {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Embed every page of a structured or page-text document.
    Embed {
        #[arg(long)]
        pages: PathBuf,
        #[arg(long)]
        output: Option<PathBuf>,
        #[command(flatten)]
        embedding: EmbeddingArgs,
    },
    /// Answer a question from the most relevant pages of a document.
    Ask {
        #[arg(long)]
        question: String,
        #[arg(long)]
        pages: PathBuf,
        /// Page embeddings produced by `embed`.
        #[arg(long)]
        embeddings: PathBuf,
        /// Base URL of an OpenAI-compatible chat completions service.
        #[arg(long, env = "SCANDOC_LLM_URL", default_value = "http://localhost:8000")]
        llm_url: String,
        #[arg(long, env = "SCANDOC_LLM_MODEL", default_value = "default")]
        model: String,
        #[arg(long, env = "SCANDOC_LLM_API_KEY")]
        llm_api_key: Option<String>,
        #[command(flatten)]
        embedding: EmbeddingArgs,
    },
}

#[derive(clap::Args)]
struct EmbeddingArgs {
    /// Hosted embedding endpoint; the local character n-gram embedder is used without one.
    #[arg(long, env = "SCANDOC_EMBEDDING_URL")]
    embedding_url: Option<String>,
    #[arg(long, env = "SCANDOC_EMBEDDING_API_KEY")]
    embedding_api_key: Option<String>,
    #[arg(long, default_value_t = DEFAULT_EMBEDDING_DIMENSIONS)]
    dimensions: usize,
}

enum CliEmbedder {
    Local(CharacterNgramEmbedder),
    Http(HttpEmbedder),
}

impl CliEmbedder {
    fn from_args(args: &EmbeddingArgs) -> Self {
        match &args.embedding_url {
            Some(url) => Self::Http(HttpEmbedder::new(
                url.clone(),
                args.embedding_api_key.clone(),
                args.dimensions,
            )),
            None => Self::Local(CharacterNgramEmbedder {
                dimensions: args.dimensions,
            }),
        }
    }
}

impl Embedder for CliEmbedder {
    fn dimensions(&self) -> usize {
        match self {
            Self::Local(embedder) => embedder.dimensions(),
            Self::Http(embedder) => embedder.dimensions(),
        }
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, AnswerError> {
        match self {
            Self::Local(embedder) => embedder.embed(text),
            Self::Http(embedder) => embedder.embed(text),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "scandoc boot"
    );

    match cli.command {
        Command::Structure {
            input,
            output,
            clean,
        } => {
            let result = RecognitionResult::from_json_str(&read(&input)?)?;
            let graph = BlockGraph::from_raw(&result.blocks);
            let mut document = DocumentStructurer::new(config.structure.clone()).structure(&graph);
            info!(
                input = %input.display(),
                blocks = graph.blocks().len(),
                pages = document.page_count(),
                "document structured"
            );

            if clean {
                let (cleaned, report) = NoiseCleaner::new(config.cleaning.clone())?.clean_document(&document);
                log_cleaning(&report);
                document = cleaned;
            }
            emit(output.as_deref(), &serde_json::to_value(&document)?)?;
        }
        Command::Merge { root, document } => {
            let coordinator = PartMergeCoordinator::new(FsPartStore::new(&root), &config.merge)?;
            match coordinator.on_part_arrived(&document).await? {
                MergeStatus::AwaitingParts { received, expected } => {
                    println!("{document}: {received} of {expected} parts present, not merged yet");
                }
                MergeStatus::Merged { key, document: merged } => {
                    println!(
                        "{document}: merged {} pages into {} at {}",
                        merged.total_pages,
                        key,
                        Utc::now().to_rfc3339()
                    );
                }
            }
        }
        Command::Clean { input, output } => {
            let raw: Value = serde_json::from_str(&read(&input)?)?;
            let cleaner = NoiseCleaner::new(config.cleaning.clone())?;

            let cleaned = if is_page_text_map(&raw) {
                let pages: BTreeMap<String, String> = serde_json::from_value(raw)?;
                let (cleaned, report) = cleaner.clean_page_texts(&pages)?;
                log_cleaning(&report);
                serde_json::to_value(cleaned)?
            } else {
                let document = StructuredDocument::from_json_value(raw)?;
                let (cleaned, report) = cleaner.clean_document(&document);
                log_cleaning(&report);
                serde_json::to_value(cleaned)?
            };
            emit(output.as_deref(), &cleaned)?;
        }
        Command::Embed {
            pages,
            output,
            embedding,
        } => {
            let texts = page_texts_from_json(serde_json::from_str(&read(&pages)?)?)?;
            let embedder = CliEmbedder::from_args(&embedding);
            let embeddings = build_page_embeddings(&embedder, &texts)?;
            info!(
                pages = embeddings.pages.len(),
                dimensions = embedder.dimensions(),
                "pages embedded"
            );
            emit(output.as_deref(), &serde_json::to_value(&embeddings)?)?;
        }
        Command::Ask {
            question,
            pages,
            embeddings,
            llm_url,
            model,
            llm_api_key,
            embedding,
        } => {
            let texts = page_texts_from_json(serde_json::from_str(&read(&pages)?)?)?;
            let embeddings = PageEmbeddings::from_json_str(&read(&embeddings)?)?;
            let model = ChatCompletionModel::new(&llm_url, model, llm_api_key)?;

            let engine = AnswerEngine::new(
                CliEmbedder::from_args(&embedding),
                model,
                config.answer.clone(),
                config.generation.clone(),
            );
            let result = engine.answer(&question, &embeddings, &texts).await?;
            emit(None, &serde_json::to_value(&result)?)?;
        }
    }

    Ok(())
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}

fn emit(output: Option<&Path>, value: &Value) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => {
            std::fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
            info!(path = %path.display(), "output written");
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

fn is_page_text_map(raw: &Value) -> bool {
    raw.as_object()
        .is_some_and(|pages| pages.values().all(Value::is_string))
}

fn log_cleaning(report: &scandoc_core::CleaningReport) {
    if report.hit_iteration_cap {
        warn!(iterations = report.iterations, "cleaning stopped at the iteration cap");
    }
    info!(
        iterations = report.iterations,
        headers = ?report.headers,
        footers = ?report.footers,
        "headers and footers removed"
    );
}
