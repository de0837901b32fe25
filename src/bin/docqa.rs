//! Docqa CLI
//!
//! Answers questions about a document from the command line. Results are
//! printed to stdout as JSON; logs go to stderr (`RUST_LOG`, default
//! `docqa=info`).

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use docqa::{
    Cl100kTokenizer, Chunker, Credentials, DocumentLoader, EmbeddingProvider, FileLoader, QaConfig,
    QaPipeline, TokenLength,
};

const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Parser)]
#[command(name = "docqa")]
#[command(about = "Docqa CLI - Ask questions about a document", long_about = None)]
struct Cli {
    /// Config file (default: ~/.docqa/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// API key for the embedding and chat backends (default: $OPENAI_API_KEY)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Override the configured embedding provider
    #[arg(long, global = true, value_enum)]
    embedder: Option<EmbedderArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum EmbedderArg {
    Openai,
    Hashing,
}

impl From<EmbedderArg> for EmbeddingProvider {
    fn from(arg: EmbedderArg) -> Self {
        match arg {
            EmbedderArg::Openai => EmbeddingProvider::OpenAi,
            EmbedderArg::Hashing => EmbeddingProvider::Hashing,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Answer one or more questions about a document
    Ask {
        /// Path to the document
        document: PathBuf,
        /// Questions. A single argument is split on commas.
        #[arg(required = true)]
        questions: Vec<String>,
    },
    /// Show how a document is chunked
    Chunk {
        /// Path to the document
        document: PathBuf,
    },
    /// Count tokens in text
    Tokens {
        /// Text to count (or - to read from stdin)
        text: String,
    },
}

// ============ Output Types ============

#[derive(Serialize)]
struct TokensOutput {
    tokens: usize,
    scheme: String,
}

#[derive(Serialize)]
struct ErrorOutput {
    error: String,
}

// ============ Main ============

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "docqa=info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let result = match load_config(&cli) {
        Ok(config) => match cli.command {
            Commands::Ask { ref document, ref questions } => {
                handle_ask(&config, &credentials(&cli), document, questions).await
            }
            Commands::Chunk { ref document } => handle_chunk(&config, document),
            Commands::Tokens { ref text } => handle_tokens(text),
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(output) => println!("{}", output),
        Err(e) => {
            let error = ErrorOutput { error: format!("{:#}", e) };
            println!("{}", serde_json::to_string(&error).unwrap_or_else(|_| "{}".to_string()));
            std::process::exit(1);
        }
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<QaConfig> {
    let mut config = match &cli.config {
        Some(path) => QaConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => QaConfig::load()?,
    };
    if let Some(embedder) = cli.embedder {
        config.embedding.provider = embedder.into();
    }
    Ok(config)
}

fn credentials(cli: &Cli) -> Credentials {
    cli.api_key
        .clone()
        .or_else(|| std::env::var(API_KEY_ENV).ok())
        .map(Credentials::new)
        .unwrap_or_default()
}

/// A lone question argument may hold several comma-separated questions.
fn normalize_questions(questions: &[String]) -> Vec<String> {
    match questions {
        [single] => single.split(',')
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(String::from)
            .collect(),
        many => many.to_vec(),
    }
}

// ============ Handlers ============

async fn handle_ask(
    config: &QaConfig,
    credentials: &Credentials,
    document: &Path,
    questions: &[String],
) -> anyhow::Result<String> {
    let pipeline = QaPipeline::from_config(config, credentials)?;
    let questions = normalize_questions(questions);
    let answers = pipeline.answer_questions(document, &questions).await?;
    Ok(serde_json::to_string_pretty(&answers)?)
}

fn handle_chunk(config: &QaConfig, document: &Path) -> anyhow::Result<String> {
    config.validate()?;
    let tokenizer = Arc::new(Cl100kTokenizer::new()?);
    let chunker = Chunker::new(config.chunking.clone(), tokenizer)?;
    let document = FileLoader::new().load(document)?;
    Ok(serde_json::to_string_pretty(&chunker.split(&document))?)
}

fn handle_tokens(text: &str) -> anyhow::Result<String> {
    let input = if text == "-" {
        use std::io::Read;
        let mut buffer = String::new();
        std::io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        text.to_string()
    };

    let tokenizer = Cl100kTokenizer::new()?;
    let output = TokensOutput {
        tokens: tokenizer.length(&input),
        scheme: tokenizer.scheme().to_string(),
    };
    Ok(serde_json::to_string(&output)?)
}
