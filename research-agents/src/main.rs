use anyhow::{Context, Result};
use clap::Parser;
use data_ingestion::{FixtureSource, MarketDataSource, RetryingSource};
use research_agents::config::create_config_template;
use research_agents::{
    load_config, standard_pipeline, DigestSynthesizer, HeadlineSentimentProvider, RunOutcome,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};

/// Run the equity screening pipeline and print the session as JSON
#[derive(Debug, Parser)]
#[command(name = "screener", version)]
struct Cli {
    /// Market data fixture file (JSON keyed by ticker)
    #[arg(long, required_unless_present = "init_config")]
    fixtures: Option<PathBuf>,

    /// TOML configuration file; SCREENER__* variables override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Write a commented configuration template to this path and exit
    #[arg(long, value_name = "PATH")]
    init_config: Option<PathBuf>,

    /// Pretty-print the JSON output
    #[arg(long, default_value_t = false)]
    pretty: bool,

    /// Tickers to screen
    #[arg(required_unless_present = "init_config")]
    tickers: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(path) = &cli.init_config {
        create_config_template(path)?;
        eprintln!("Wrote configuration template to {}", path.display());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;

    let level = config.log_level.parse::<Level>().unwrap_or(Level::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    info!("Starting equity screener");

    let fixtures = cli.fixtures.context("--fixtures is required")?;
    let fixtures: Arc<dyn MarketDataSource> = Arc::new(FixtureSource::from_json_file(&fixtures)?);
    let source: Arc<dyn MarketDataSource> =
        Arc::new(RetryingSource::new(fixtures, config.retry.clone()));

    let sentiment = HeadlineSentimentProvider::new(source.clone(), config.sentiment.clone());
    let pipeline = standard_pipeline(
        source,
        Arc::new(sentiment),
        Arc::new(DigestSynthesizer),
        &config,
    );

    let cancel = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, stopping run");
        } else {
            std::future::pending::<()>().await;
        }
    };

    let outcome = pipeline.run_until(cli.tickers, cancel).await?;
    if let RunOutcome::Cancelled(state) = &outcome {
        warn!(run_id = %state.run_id, version = state.version, "Run cancelled, output is partial");
    }

    let state = outcome.state();
    let output = if cli.pretty {
        serde_json::to_string_pretty(state)?
    } else {
        serde_json::to_string(state)?
    };
    println!("{}", output);

    Ok(())
}
