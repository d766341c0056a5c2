use clap::{Parser, Subcommand, builder::styling};
use eyre::Result;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use tap_shopify::cli;
use tap_shopify::sync::{StreamStatus, SyncReport};

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// Incremental extraction of Shopify Admin API resources as NDJSON messages
#[derive(Parser)]
#[command(name = "tap-shopify", version, styles = STYLES)]
struct Cli {
    /// JSON or YAML configuration file
    #[arg(short, long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// The dotenv file to source credentials from
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the catalog of active streams with their JSON Schemas
    Discover,

    /// Sync every active stream, writing NDJSON messages
    Sync {
        /// State file to resume from and write the final bookmarks to
        #[arg(short, long)]
        state: Option<PathBuf>,

        /// Write messages to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Test the credentials against the store
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Err(e) = dotenvy::from_filename(&cli.env)
        && !e.not_found()
    {
        return Err(e.into());
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    let config = cli::load_config(&cli.config)?;
    log::debug!("Using {} authentication", config.authentication);

    match cli.command {
        Commands::Discover => {
            let catalog = cli::discover(&config)?;
            println!("{}", serde_json::to_string_pretty(&catalog)?);
        }
        Commands::Check => {
            let shop = cli::check(&config).await?;
            log::info!("✓ Authorized for {}", shop.green());
        }
        Commands::Sync { state, output } => {
            log::info!(
                "Syncing to {}",
                output
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| "stdout".to_string())
                    .bright_black()
            );
            let report = cli::run_sync(&config, state.as_deref(), output.as_deref()).await?;
            print_summary(&report);
            if !report.is_success() {
                std::process::exit(report.exit_code());
            }
        }
    }

    Ok(())
}

fn print_summary(report: &SyncReport) {
    for outcome in &report.outcomes {
        let status = match &outcome.status {
            StreamStatus::Done => "done".green().to_string(),
            StreamStatus::Failed(_) => "failed".red().to_string(),
            StreamStatus::Cancelled => "cancelled".yellow().to_string(),
        };
        log::info!(
            "{:<24} {:<10} {} record(s), {} skipped, {} page(s)",
            outcome.stream.cyan(),
            status,
            outcome.records_emitted,
            outcome.records_skipped,
            outcome.pages
        );
        if let Some(e) = outcome.error() {
            log::error!("  {}: {}", outcome.stream, e.red());
        }
    }

    if report.is_success() {
        log::info!(
            "✓ Synced {} stream(s), {} record(s)",
            report.outcomes.len(),
            report.records_emitted()
        );
    } else {
        log::error!(
            "✗ {} stream(s) did not finish: {}",
            report.failed_streams().len(),
            report.failed_streams().join(", ").red()
        );
    }
    if report.records_skipped() > 0 {
        log::warn!(
            "{} record(s) skipped for schema violations",
            report.records_skipped().yellow()
        );
    }
}
