//! # Inquest CLI (`inq`)
//!
//! The `inq` binary drives a document Q&A session from the terminal. It
//! hydrates the server-side session, submits question batches, follows each
//! answer stream to a terminal state, and generates per-document combined
//! analyses.
//!
//! ## Usage
//!
//! ```bash
//! inq --config ./config/inq.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `inq session` | Show uploaded documents and query history |
//! | `inq extract "<prompt>"` | Preview question extraction without submitting |
//! | `inq ask "<prompt>"` | Extract questions, submit them, stream answers |
//! | `inq ask -q "..." -q "..."` | Submit explicit questions |
//! | `inq analyze --document <id>` | Combined analysis for one document |
//! | `inq analyze --all` | Combined analysis for every eligible document |
//!
//! ## Examples
//!
//! ```bash
//! # Inspect the current session
//! inq session
//!
//! # Preview extraction
//! inq extract "brief me on the contract dispute"
//!
//! # Ask, swapping the second question for an AI alternative first
//! inq ask "brief me on the contract dispute" --swap 2
//!
//! # Explicit questions, then a combined analysis per document
//! inq ask -q "Who are the parties?" -q "What are the damages?" --analyze
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use inquest::analysis::Aggregator;
use inquest::client::{HttpQueryService, QueryService};
use inquest::config::{self, Config};
use inquest::models::{DocStatus, DocumentRef, Query, QueryStatus, Question};
use inquest::notify::{NoticeMode, NoticeSink};
use inquest::orchestrate::Orchestrator;
use inquest::session::SessionStore;
use inquest::swap::SwapManager;

/// Inquest CLI: a streaming query engine for document Q&A sessions.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file; without one, built-in defaults target a local service.
#[derive(Parser)]
#[command(
    name = "inq",
    about = "Inquest — a streaming query engine for document Q&A sessions",
    version,
    long_about = "Inquest decomposes free-text prompts into discrete questions, submits them \
    against every uploaded document, follows each answer over a server-sent event stream through \
    verification and retry, and synthesizes per-document combined analyses once every answer has \
    settled."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/inq.toml`; built-in defaults apply when the
    /// file does not exist.
    #[arg(long, global = true, default_value = "./config/inq.toml")]
    config: PathBuf,

    /// Notice output: `auto`, `human`, `json`, or `off`. Overrides the
    /// config file.
    #[arg(long, global = true)]
    notices: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Show the current session.
    ///
    /// Hydrates the session from the service and prints the uploaded
    /// documents plus the stored query history.
    Session,

    /// Preview question extraction for a prompt.
    ///
    /// Runs the decomposition service and prints the questions it would
    /// produce, without submitting anything. Falls back to the generic
    /// default set (with a degraded-mode notice) when extraction fails.
    Extract {
        /// Free-text prompt to decompose.
        prompt: String,
    },

    /// Submit questions and stream answers to completion.
    ///
    /// With a prompt, questions come from extraction; with `--question`
    /// flags, the given texts are submitted as-is and the prompt (if any)
    /// only serves as swap context. Every question runs against every
    /// uploaded document concurrently; the command returns once all answer
    /// streams have reached a terminal state.
    Ask {
        /// Free-text prompt to decompose into questions.
        prompt: Option<String>,

        /// Explicit question to submit; repeatable. Skips extraction.
        #[arg(short = 'q', long = "question")]
        questions: Vec<String>,

        /// Swap the Nth question (1-based) for an AI-suggested alternative
        /// before submitting; repeatable.
        #[arg(long = "swap", value_name = "N")]
        swap: Vec<usize>,

        /// Run combined analysis for every document once answers settle.
        #[arg(long)]
        analyze: bool,
    },

    /// Generate per-document combined analyses.
    ///
    /// A document qualifies once every query touching it has completed and
    /// no analysis for it exists yet. Outcomes land in the session's query
    /// records; failures are recorded there too, as human-readable text.
    Analyze {
        /// Target one document id.
        #[arg(long, conflicts_with = "all")]
        document: Option<String>,

        /// Sweep every eligible document.
        #[arg(long)]
        all: bool,
    },
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let cfg = if cli.config.exists() {
        config::load_config(&cli.config)?
    } else {
        Config::default()
    };
    let mode = match cli.notices.as_deref() {
        Some(mode) => NoticeMode::from_config(mode)?,
        None => NoticeMode::from_config(&cfg.notices.mode)?,
    };
    let notices: Arc<dyn NoticeSink> = mode.sink().into();
    let service: Arc<dyn QueryService> = Arc::new(HttpQueryService::new(&cfg.service)?);
    let store = Arc::new(SessionStore::new());

    match cli.command {
        Commands::Session => run_session(service, store).await,
        Commands::Extract { prompt } => run_extract(service, store, notices, &prompt).await,
        Commands::Ask {
            prompt,
            questions,
            swap,
            analyze,
        } => run_ask(service, store, notices, prompt, questions, swap, analyze).await,
        Commands::Analyze { document, all } => {
            run_analyze(service, store, notices, document, all).await
        }
    }
}

async fn hydrate(service: &dyn QueryService, store: &SessionStore) -> Result<()> {
    let snapshot = service.session().await?;
    store.hydrate(snapshot);
    Ok(())
}

async fn run_session(service: Arc<dyn QueryService>, store: Arc<SessionStore>) -> Result<()> {
    hydrate(&*service, &store).await?;

    println!("--- Session ---");
    println!(
        "id: {}",
        store.session_id().unwrap_or_else(|| "(none)".to_string())
    );
    println!();

    let documents = store.documents();
    println!("--- Documents ({}) ---", documents.len());
    for doc in &documents {
        let mut row = format!("{:<38} {:>10}  {}", doc.id, doc.human_size(), doc.name);
        if let Some(uploaded) = doc.uploaded_at {
            row.push_str(&format!("  uploaded {}", uploaded.format("%Y-%m-%d %H:%M")));
        }
        if doc.transcribing {
            match doc.transcription_percent {
                Some(percent) => row.push_str(&format!("  [transcribing {percent}%]")),
                None => row.push_str("  [transcribing]"),
            }
        }
        println!("{row}");
    }

    let queries = store.queries();
    if !queries.is_empty() {
        println!();
        println!("--- Queries ({}) ---", queries.len());
        for query in &queries {
            print_query(query);
        }
    }
    Ok(())
}

async fn run_extract(
    service: Arc<dyn QueryService>,
    store: Arc<SessionStore>,
    notices: Arc<dyn NoticeSink>,
    prompt: &str,
) -> Result<()> {
    let orchestrator = Orchestrator::new(service, store, notices);
    let questions = orchestrator.extract_questions(prompt).await;
    for question in &questions {
        match question.number {
            Some(number) => println!("{:>2}. {}", number, question.text),
            None => println!("  - {}", question.text),
        }
        if let Some(category) = &question.category {
            println!("    category: {}", category);
        }
    }
    Ok(())
}

async fn run_ask(
    service: Arc<dyn QueryService>,
    store: Arc<SessionStore>,
    notices: Arc<dyn NoticeSink>,
    prompt: Option<String>,
    explicit: Vec<String>,
    swaps: Vec<usize>,
    analyze: bool,
) -> Result<()> {
    let orchestrator = Orchestrator::new(service.clone(), store.clone(), notices.clone());
    hydrate(&*service, &store).await?;

    let questions: Vec<Question> = if explicit.is_empty() {
        match prompt.as_deref() {
            Some(prompt) => orchestrator.extract_questions(prompt).await,
            None => bail!("provide a prompt or at least one --question (-q)"),
        }
    } else {
        explicit.into_iter().map(Question::manual).collect()
    };

    let board = SwapManager::new(service.clone(), notices.clone());
    board.load(questions, prompt);
    for position in swaps {
        let list = board.questions();
        let Some(question) = position.checked_sub(1).and_then(|i| list.get(i)) else {
            bail!("--swap {position}: the batch has {} questions", list.len());
        };
        // A failed swap already surfaced a notice; the question stays as-is.
        if let Ok(true) = board.swap(&question.id).await {
            if let Some(swapped) = board.question(&question.id) {
                println!("swapped {}: {}", position, swapped.text);
            }
        }
    }

    let questions = board.take_all();
    println!("--- Questions ({}) ---", questions.len());
    for (i, question) in questions.iter().enumerate() {
        println!("{:>2}. {}", i + 1, question.text);
    }
    println!();

    let report = orchestrator.submit(questions).await?;
    println!("--- Answers (batch {}) ---", report.batch_id);
    for query_id in &report.query_ids {
        if let Some(query) = store.query(query_id) {
            print_query(&query);
        }
    }

    if analyze {
        let aggregator = Aggregator::new(service, store.clone(), notices);
        if aggregator.generate_all().await > 0 {
            print_summaries(&aggregator, &store.documents());
        }
    }
    Ok(())
}

async fn run_analyze(
    service: Arc<dyn QueryService>,
    store: Arc<SessionStore>,
    notices: Arc<dyn NoticeSink>,
    document: Option<String>,
    all: bool,
) -> Result<()> {
    if document.is_none() && !all {
        bail!("specify --document <id> or --all");
    }
    hydrate(&*service, &store).await?;
    let aggregator = Aggregator::new(service, store.clone(), notices);
    let documents = store.documents();

    match document {
        Some(id) => {
            if store.document(&id).is_none() {
                bail!("unknown document id: {id}");
            }
            if aggregator.generate_one(&id).await {
                print_summaries(&aggregator, &documents);
            } else {
                println!(
                    "Document {id} is not ready: answers are still pending, or an analysis \
                     already exists."
                );
            }
        }
        None => {
            if aggregator.generate_all().await == 0 {
                println!("No documents are ready for combined analysis.");
            } else {
                print_summaries(&aggregator, &documents);
            }
        }
    }
    Ok(())
}

fn print_query(query: &Query) {
    let status = match query.status {
        QueryStatus::Processing => "processing",
        QueryStatus::Completed => "completed",
    };
    println!("{} [{}]", query.text, status);
    for row in &query.results {
        println!(
            "  [{:<10}] {} ({}%)",
            status_label(row.status),
            row.document_name,
            row.progress
        );
        if let Some(message) = &row.message {
            println!("      note: {}", message);
        }
        if !row.text.trim().is_empty() {
            println!("      {}", row.text.replace('\n', "\n      "));
        }
    }
    println!();
}

fn print_summaries(aggregator: &Aggregator, documents: &[DocumentRef]) {
    let mut header = false;
    for doc in documents {
        if let Some(summary) = aggregator.summary_for(&doc.id) {
            if !header {
                println!();
                println!("--- Combined analysis ---");
                header = true;
            }
            let marker = if summary.failed { " (failed)" } else { "" };
            println!("[{}]{}", doc.name, marker);
            println!("{}", summary.text);
            println!();
        }
    }
}

fn status_label(status: DocStatus) -> &'static str {
    match status {
        DocStatus::Pending => "pending",
        DocStatus::Processing => "processing",
        DocStatus::AntiHallucination => "verifying",
        DocStatus::Retrying => "retrying",
        DocStatus::Completed => "completed",
        DocStatus::Failed => "failed",
    }
}
