use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use insure_rag_core::{
    bundled_metadata, count_chunks, discover_pdf_files, index_corpus, index_pdf, inspect_pdf,
    rebuild_index, AskCoordinator, AskOutcome, ContextOptions, EmbeddingProvider,
    FlatVectorStore, IndexingReport, IngestionOptions, IngestionPipeline, RagChain, Settings,
    VectorIndex,
};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "insure-rag", version, about = "Cited question answering over insurance PDFs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Args)]
struct SettingsArgs {
    /// Embedding backend: `local` or `openai`.
    #[arg(long, global = true, env = "EMBEDDING_PROVIDER", default_value = "local")]
    embedding_provider: String,

    /// Local model name (`char-ngram`, or a sentence model with the `fastembed` feature)
    /// or hosted model id.
    #[arg(long, global = true, env = "EMBEDDING_MODEL", default_value = "char-ngram")]
    embedding_model: String,

    /// Answer backend: `none` or `openai`.
    #[arg(long, global = true, env = "LLM_PROVIDER", default_value = "none")]
    llm_provider: String,

    #[arg(long, global = true, env = "OPENAI_API_KEY", default_value = "", hide_env_values = true)]
    openai_api_key: String,

    #[arg(
        long,
        global = true,
        env = "OPENAI_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    openai_base_url: String,

    #[arg(long, global = true, env = "CHAT_MODEL", default_value = "gpt-4o-mini")]
    chat_model: String,

    /// Index directory holding embeddings.npy, documents.json and meta.jsonl.
    #[arg(long, global = true, env = "INDEX_DIR", default_value = "data/index")]
    index_dir: PathBuf,

    /// Folder scanned recursively for bundled PDFs.
    #[arg(long, global = true, env = "SAMPLES_DIR", default_value = "data/samples")]
    samples_dir: PathBuf,

    /// Chunks embedded and persisted per write.
    #[arg(long, global = true, env = "BATCH_SIZE", default_value = "48")]
    batch_size: usize,

    #[arg(long, global = true, env = "TOP_K", default_value = "5")]
    top_k: usize,

    #[arg(long, global = true, env = "MAX_CONTEXT_CHARS", default_value = "6000")]
    max_context_chars: usize,
}

impl From<SettingsArgs> for Settings {
    fn from(args: SettingsArgs) -> Self {
        Self {
            embedding_provider: args.embedding_provider,
            embedding_model: args.embedding_model,
            llm_provider: args.llm_provider,
            openai_api_key: args.openai_api_key,
            openai_base_url: args.openai_base_url,
            chat_model: args.chat_model,
            top_k: args.top_k,
            max_context_chars: args.max_context_chars,
            index_dir: args.index_dir,
            samples_dir: args.samples_dir,
            batch_size: args.batch_size,
        }
    }
}

#[derive(Subcommand)]
enum Command {
    /// Index the bundled PDFs unless an index already exists.
    Index {
        /// Delete the existing index and index everything again.
        #[arg(long, default_value_t = false)]
        rebuild: bool,
        /// Append a single PDF to the existing index instead.
        #[arg(long, conflicts_with = "rebuild")]
        file: Option<PathBuf>,
    },
    /// Answer a question with citations.
    Ask {
        #[arg(long)]
        question: String,
        /// Overrides the configured number of passages.
        #[arg(long)]
        top_k: Option<usize>,
        /// Rank by semantic similarity only.
        #[arg(long, default_value_t = false)]
        no_rerank: bool,
        #[arg(long)]
        max_chars: Option<usize>,
    },
    /// Print raw vector hits for a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
    },
    /// Dry-run chunking for each bundled PDF.
    CountChunks,
    /// Print page and character counts for each bundled PDF.
    Inspect,
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::from(cli.settings);
    settings.validate()?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "insure-rag boot"
    );

    match cli.command {
        Command::Index { rebuild, file } => match file {
            Some(path) => run_index_file(&settings, &path)?,
            None => run_index(&settings, rebuild)?,
        },
        Command::Ask {
            question,
            top_k,
            no_rerank,
            max_chars,
        } => {
            let store = open_store(&settings)?;
            let chain = RagChain::from_settings(&settings)?;
            let coordinator = AskCoordinator::new(store, chain);
            let options = ContextOptions {
                top_k: top_k.unwrap_or(settings.top_k),
                rerank: !no_rerank,
                max_chars: max_chars.unwrap_or(settings.max_context_chars),
            };

            match coordinator.ask(&question, options)? {
                AskOutcome::NoIndex => {
                    println!(
                        "No index found in {}. Put PDFs in {} and run `insure-rag index`.",
                        settings.index_dir.display(),
                        settings.samples_dir.display()
                    );
                }
                AskOutcome::Answered { answer, hits } => {
                    println!("{}\n", answer.text);
                    println!("mode: {}", answer.provenance);
                    if !hits.is_empty() {
                        println!("sources:");
                    }
                    for hit in hits {
                        println!(
                            "  - {} (page {}) score={:.4} lexical={:.4}",
                            hit.metadata.source_name, hit.metadata.page, hit.score, hit.lex_score
                        );
                    }
                }
            }
        }
        Command::Search { query, top_k } => {
            let store = open_store(&settings)?;
            let hits = store.search(&query, top_k.unwrap_or(settings.top_k))?;
            if hits.is_empty() {
                println!("no hits");
            }
            for hit in hits {
                println!(
                    "[row {}] score={:.4} {} page={}",
                    hit.row, hit.score, hit.metadata.source_name, hit.metadata.page
                );
                println!("  {}", hit.text);
            }
        }
        Command::CountChunks => {
            let pipeline = IngestionPipeline::new(&IngestionOptions::default())?;
            let defaults = bundled_metadata();
            for path in discover_pdf_files(&settings.samples_dir) {
                match count_chunks(&pipeline, &path, &defaults) {
                    Ok(count) => {
                        println!("{}: {} chunks", path.display(), count.chunks);
                        if let Some(preview) = count.first_preview {
                            println!("  first: {preview}");
                        }
                    }
                    Err(error) => println!("{}: unreadable ({error})", path.display()),
                }
            }
        }
        Command::Inspect => {
            for path in discover_pdf_files(&settings.samples_dir) {
                match inspect_pdf(&path) {
                    Ok(stats) => println!(
                        "{}: pages={} chars={} per_page={:?}",
                        path.display(),
                        stats.pages,
                        stats.total_chars,
                        stats.chars_per_page
                    ),
                    Err(error) => println!("{}: unreadable ({error})", path.display()),
                }
            }
        }
    }

    Ok(())
}

fn open_store(settings: &Settings) -> anyhow::Result<FlatVectorStore> {
    let embedder = EmbeddingProvider::from_settings(settings)?;
    info!(
        embedder = %embedder.label(),
        index_dir = %settings.index_dir.display(),
        "vector store opened"
    );
    Ok(FlatVectorStore::new(&settings.index_dir, embedder))
}

fn run_index(settings: &Settings, rebuild: bool) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    if store.exists() && !rebuild {
        println!(
            "index already present in {} ({} rows); pass --rebuild to recreate it",
            settings.index_dir.display(),
            store.len()?
        );
        return Ok(());
    }

    let files = discover_pdf_files(&settings.samples_dir);
    if files.is_empty() {
        warn!(folder = %settings.samples_dir.display(), "no pdf files found");
    }

    let pipeline = IngestionPipeline::new(&IngestionOptions::default())?;
    let defaults = bundled_metadata();
    let report = if rebuild {
        rebuild_index(&store, &pipeline, &files, &defaults, settings.batch_size)
    } else {
        index_corpus(&store, &pipeline, &files, &defaults, settings.batch_size)
    }
    .context("indexing failed")?;

    print_report(&report);
    Ok(())
}

fn run_index_file(settings: &Settings, path: &Path) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let pipeline = IngestionPipeline::new(&IngestionOptions::default())?;
    let report = index_pdf(&store, &pipeline, path, &bundled_metadata(), settings.batch_size)
        .with_context(|| format!("indexing {} failed", path.display()))?;

    print_report(&report);
    println!("index now holds {} rows", store.len()?);
    Ok(())
}

fn print_report(report: &IndexingReport) {
    for skipped in &report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
    }
    println!(
        "indexed {} chunks from {} files ({} skipped) in {}s",
        report.total_chunks,
        report.indexed_files,
        report.skipped_files.len(),
        (report.finished_at - report.started_at).num_seconds()
    );
}
