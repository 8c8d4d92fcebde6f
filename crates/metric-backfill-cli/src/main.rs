//! metric-backfill CLI - historical metric backfill runner.

use clap::{Parser, Subcommand};
use metric_backfill::{
    BackfillError, BackfillPackage, Config, MigrationParams, Orchestrator, PackageRegistry,
    ProgressStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "metric-backfill")]
#[command(about = "Replay historical source rows into metric events")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "backfill.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backfill
    Run {
        /// Batches in flight per package
        #[arg(long, default_value = "10")]
        concurrency: usize,

        /// Metric events per sink insert
        #[arg(long, default_value = "500")]
        insert_batch_size: usize,

        /// Skip this many leading batches of each package
        #[arg(long)]
        start_from: Option<usize>,

        /// Comma-separated package names to run (default: all)
        #[arg(long, value_delimiter = ',')]
        packages: Option<Vec<String>>,

        /// Stop each package after this many batches
        #[arg(long)]
        limit_batches: Option<usize>,

        /// Log inserts instead of writing to the sink (progress is still saved; run `reset` before a real run)
        #[arg(long)]
        dry_run: bool,

        /// Continue from the saved progress file
        #[arg(long)]
        auto_resume: bool,
    },

    /// List registered packages
    List,

    /// Show saved progress
    Progress,

    /// Delete saved progress
    Reset,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), BackfillError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format).map_err(BackfillError::Config)?;

    let registry = PackageRegistry::builtin();

    // Listing needs no configuration
    if let Commands::List = cli.command {
        let packages: Vec<serde_json::Value> = registry
            .iter()
            .map(|p| serde_json::json!({ "name": p.name(), "query_batch_size": p.batch_width() }))
            .collect();
        if cli.output_json {
            println!("{}", serde_json::to_string_pretty(&packages)?);
        } else {
            for package in registry.iter() {
                println!("{:<20} batch size {}", package.name(), package.batch_width());
            }
        }
        return Ok(());
    }

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::List => unreachable!(), // Handled above
        Commands::Run {
            concurrency,
            insert_batch_size,
            start_from,
            packages,
            limit_batches,
            dry_run,
            auto_resume,
        } => {
            let params = MigrationParams {
                concurrency,
                insert_batch_size,
                start_from,
                packages,
                dry_run,
                auto_resume,
                limit_batches,
            };
            params.validate()?;

            let orchestrator = Orchestrator::connect(&config, registry).await?;
            let result = orchestrator.run(&params).await?;

            if cli.output_json {
                println!("{}", result.to_json()?);
            } else {
                let status_msg = if dry_run { "Dry run completed!" } else { "Backfill completed!" };
                println!("\n{}", status_msg);
                println!("  Run ID: {}", result.run_id);
                println!("  Duration: {:.2}s", result.duration_seconds);
                println!("  Metrics: {}", result.metrics_emitted);
                for package in &result.packages {
                    println!(
                        "  {:<20} {:?}: {}/{} batches (from {}), {} metrics",
                        package.name,
                        package.status,
                        package.batches_run,
                        package.batches_total,
                        package.resume_offset,
                        package.metrics_emitted
                    );
                }
            }
        }

        Commands::Progress => {
            let store = ProgressStore::new(&config.backfill.progress_file);
            let progress = store.load().await;
            if cli.output_json || !progress.is_empty() {
                println!("{}", serde_json::to_string_pretty(&progress)?);
            } else {
                println!("No saved progress in {}", store.path().display());
            }
        }

        Commands::Reset => {
            let store = ProgressStore::new(&config.backfill.progress_file);
            if store.clear().await? {
                println!("Removed {}", store.path().display());
            } else {
                println!("No saved progress in {}", store.path().display());
            }
        }
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        other => return Err(format!("invalid verbosity '{}'", other)),
    };

    // stdout is reserved for results
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        "json" => subscriber.json().init(),
        "text" => subscriber.init(),
        other => return Err(format!("invalid log format '{}'", other)),
    }

    Ok(())
}
