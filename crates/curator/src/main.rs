//! `curator`: sort a word list into curated and excluded files using an
//! Ollama-hosted model.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use curator::{
    FileSink, LineSource, OllamaClassifier, OllamaConfig, Pipeline, PipelineConfig, RunOutcome,
    cancel_on_signal, init_tracing, watch_log_config,
};

const EXIT_CANCELLED: u8 = 130;

/// Classify words with an LLM and split them into curated and excluded lists.
#[derive(Parser, Debug)]
#[command(name = "curator", version, about)]
struct Cli {
    /// Word list, one item per line.
    #[arg(long, env = "CURATOR_INPUT", default_value = "data/words_five.txt")]
    input: PathBuf,

    /// Directory for curated.txt, excluded.txt and their response files.
    #[arg(long, env = "CURATOR_OUTPUT_DIR", default_value = "data")]
    output_dir: PathBuf,

    /// Maximum concurrent classifications.
    #[arg(short, long, env = "CURATOR_CONCURRENCY", default_value_t = 10)]
    concurrency: usize,

    /// Stop after this many items; negative means no limit.
    #[arg(long, env = "CURATOR_MAX_ITEMS", default_value_t = -1, allow_negative_numbers = true)]
    max_items: i64,

    /// Ollama base URL.
    #[arg(long, env = "CURATOR_OLLAMA_URL", default_value = "http://localhost:11434")]
    ollama_url: String,

    /// Model name passed to Ollama.
    #[arg(long, env = "CURATOR_MODEL", default_value = "llama3.2")]
    model: String,

    /// Per-request timeout in seconds.
    #[arg(long, env = "CURATOR_REQUEST_TIMEOUT", default_value_t = 60)]
    request_timeout: u64,

    /// Cancel the whole run after this many seconds.
    #[arg(long, env = "CURATOR_TIMEOUT")]
    timeout: Option<u64>,

    /// YAML logging config, reloaded on change when present.
    #[arg(long, env = "CURATOR_LOG_CONFIG", default_value = "config/logging/logging.yaml")]
    log_config: PathBuf,
}

impl Cli {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::new()
            .with_concurrency(self.concurrency)
            .with_max_items(self.max_items)
    }

    fn ollama_config(&self) -> OllamaConfig {
        OllamaConfig::new(&self.ollama_url)
            .with_model(&self.model)
            .with_request_timeout(Duration::from_secs(self.request_timeout))
            .with_max_idle_connections(self.concurrency)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let log_handle = init_tracing();
    tracing::info!(version = curator::CURATOR_VERSION, "Starting curator");

    let cancel = CancellationToken::new();

    if cli.log_config.exists() {
        if let Err(e) = watch_log_config(&cli.log_config, log_handle, cancel.clone()) {
            tracing::warn!(error = %e, "Log config hot-reload disabled");
        }
    } else {
        tracing::debug!(path = %cli.log_config.display(), "No log config file");
    }

    let signals = cancel_on_signal(cancel.clone());
    if let Some(secs) = cli.timeout {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    tracing::warn!(timeout_secs = secs, "Run timeout elapsed, cancelling");
                    cancel.cancel();
                }
            }
        });
    }

    let result = run(&cli, &cancel).await;

    // Stop the watcher and signal tasks.
    cancel.cancel();
    let _ = signals.await;

    match result {
        Ok(RunOutcome::Completed(summary)) => {
            tracing::info!(
                read = summary.read,
                excluded = summary.positive,
                curated = summary.negative,
                "Curation complete"
            );
            ExitCode::SUCCESS
        }
        Ok(RunOutcome::Cancelled(summary)) => {
            tracing::info!(
                read = summary.read,
                excluded = summary.positive,
                curated = summary.negative,
                "Curation cancelled"
            );
            ExitCode::from(EXIT_CANCELLED)
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Curation failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, cancel: &CancellationToken) -> anyhow::Result<RunOutcome> {
    let pipeline = Pipeline::new(
        cli.pipeline_config(),
        Arc::new(OllamaClassifier::new(cli.ollama_config()).context("building Ollama client")?),
    )?;

    let mut source = LineSource::open(&cli.input).await?;

    tokio::fs::create_dir_all(&cli.output_dir)
        .await
        .with_context(|| format!("creating output directory {}", cli.output_dir.display()))?;
    // Positive verdicts mean "obscure", which are excluded from the curated list.
    let excluded = FileSink::create(&cli.output_dir, "excluded").await?;
    let curated = FileSink::create(&cli.output_dir, "curated").await?;

    let outcome = pipeline
        .run(&mut source, Box::new(excluded), Box::new(curated), cancel)
        .await?;
    Ok(outcome)
}
