use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use news_relay::config::database_path_from_env;
use news_relay::{
    DedupLedger, FeedAggregator, FeedParser, FetchConfig, Fetcher, GeminiClient, ImageResolver, Orchestrator,
    Publisher, RelayConfig, SummaryGenerator, TelegramClient,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "news-relay")]
#[command(about = "Summarize new feed articles and post them to a Telegram channel")]
struct Cli {
    /// Override MAX_ARTICLES_PER_RUN for this invocation
    #[arg(long, global = true)]
    max_items: Option<usize>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch, summarize and publish once (default)
    Run,

    /// Print ledger statistics
    Stats {
        /// Number of recent records to list
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },

    /// Delete ledger records older than the given age
    Purge {
        #[arg(long)]
        days: u32,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cli.max_items).await,
        Commands::Stats { recent } => show_stats(recent).await,
        Commands::Purge { days } => purge(days).await,
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(max_items: Option<usize>) -> Result<ExitCode> {
    let mut config = RelayConfig::from_env().context("invalid configuration")?;
    if let Some(max_items) = max_items {
        config.pipeline.max_items_per_run = max_items;
    }
    let settings = config.pipeline.clone();

    info!(
        "Relaying {} feeds to {} with {}",
        config.feeds.len(),
        config.channel_id,
        config.gemini_model
    );

    let fetcher = Arc::new(Fetcher::new(FetchConfig::default())?);
    let gemini = GeminiClient::new(&config.gemini_api_key, &config.gemini_model, settings.generation_timeout)?
        .with_fallback_model(config.gemini_fallback_model.clone());
    let telegram = TelegramClient::new(&config.telegram_token, config.channel_id.clone(), config.messaging_timeout)?;
    let ledger = Arc::new(
        DedupLedger::open(&config.database_path)
            .await
            .with_context(|| format!("cannot open ledger at {}", config.database_path))?,
    );

    let orchestrator = Orchestrator::new(
        config.feeds.clone(),
        settings.clone(),
        ledger.clone(),
        FeedAggregator::new(
            fetcher.clone(),
            FeedParser::new(settings.max_items_per_feed, settings.max_text_chars),
        ),
        ImageResolver::new(fetcher, settings.image_prefix_bytes),
        SummaryGenerator::new(
            Arc::new(gemini),
            config.summary_language.clone(),
            settings.max_prompt_body_chars,
            config.summary_timeout(),
        ),
        Publisher::new(Arc::new(telegram)),
    );

    let stats = tokio::select! {
        stats = orchestrator.run() => stats,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, releasing resources");
            orchestrator.cleanup().await;
            ledger.close().await;
            return Ok(ExitCode::from(130));
        }
    };
    ledger.close().await;

    if stats.is_failure() {
        error!("Run {} failed", stats.run_id);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

async fn show_stats(recent: usize) -> Result<ExitCode> {
    let ledger = DedupLedger::open(&database_path_from_env()).await?;
    let stats = ledger.stats().await?;

    info!("Processed items: {}", stats.total);
    info!("Last 24h:        {}", stats.last_24h);
    if let Some(last) = stats.last_processed_at {
        info!("Last processed:  {}", last.to_rfc3339());
    }

    let mut by_source: Vec<_> = stats.by_source.into_iter().collect();
    by_source.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (source, count) in by_source {
        info!("  {:<24} {}", source, count);
    }

    for record in ledger.recent(recent).await? {
        info!("  {} [{}] {}", record.processed_at.format("%Y-%m-%d %H:%M"), record.source, record.title);
    }

    ledger.close().await;
    Ok(ExitCode::SUCCESS)
}

async fn purge(days: u32) -> Result<ExitCode> {
    let ledger = DedupLedger::open(&database_path_from_env()).await?;
    let removed = ledger.purge(days).await?;
    info!("Removed {} records older than {} days", removed, days);
    ledger.close().await;
    Ok(ExitCode::SUCCESS)
}
