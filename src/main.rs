//! paper-harvest command-line entry point.
//!
//! Loads a URL list, fetches and parses every article with bounded concurrency
//! and a shared rate limit, and writes one JSON record per article.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use paper_harvest::stats::format_summary;
use paper_harvest::{Config, TaskSource, run_with_shutdown};

/// Concurrent, rate-limited harvester for academic article metadata.
#[derive(Parser, Debug)]
#[command(name = "paper-harvest", version, about)]
struct Args {
    /// File with one article URL per line (`#` starts a comment)
    #[arg(short, long)]
    input: PathBuf,

    /// Directory JSON records are written to
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Number of concurrent workers
    #[arg(short, long)]
    workers: Option<usize>,

    /// Maximum requests per second across all workers (0 = unlimited)
    #[arg(short, long)]
    rate: Option<u32>,

    /// Per-request timeout in seconds
    #[arg(short, long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Attempts per URL, including the first
    #[arg(long)]
    retries: Option<u32>,

    /// JSON configuration file; command-line flags override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Debug logging and periodic progress reports
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    /// Defaults, then the config file, then explicit flags
    fn build_config(&self) -> paper_harvest::Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(output) = &self.output {
            config.output.output_dir = output.clone();
        }
        if let Some(workers) = self.workers {
            config.pipeline.workers = workers;
        }
        if let Some(rate) = self.rate {
            config.pipeline.rate_limit = rate;
        }
        if let Some(timeout) = self.timeout {
            config.fetch.timeout = Duration::from_secs(timeout);
        }
        if let Some(retries) = self.retries {
            config.retry.max_attempts = retries;
        }
        if self.verbose {
            config.pipeline.verbose = true;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let directive = if args.verbose {
        "paper_harvest=debug"
    } else {
        "paper_harvest=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)))
        .with_target(false)
        .init();

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Run aborted");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> paper_harvest::Result<()> {
    let config = args.build_config()?;

    println!("=== paper-harvest ===");
    println!("Input file:       {}", args.input.display());
    println!("Output directory: {}", config.output.output_dir.display());
    println!("Workers:          {}", config.pipeline.workers);
    println!("Rate limit:       {} requests/second", config.pipeline.rate_limit);
    println!("Timeout:          {}s", config.fetch.timeout.as_secs());
    println!("Max attempts:     {}", config.retry.max_attempts);
    println!();

    let urls = TaskSource::read_urls(&args.input)?;
    info!(count = urls.len(), input = %args.input.display(), "Loaded URL list");
    println!("Press Ctrl+C to stop gracefully");

    let report = run_with_shutdown(&config, urls).await?;

    println!();
    println!("{}", format_summary(&report.stats, report.elapsed));
    println!(
        "Saved {} records to {}",
        report.storage.saved,
        config.output.output_dir.display()
    );
    if let Some(path) = &report.stats_path {
        println!("Statistics: {}", path.display());
    }
    Ok(())
}
