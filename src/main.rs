//! Breakout scanner - main entry point
//!
//! This binary provides three subcommands:
//! - scan: Score every configured universe and write a ranked report
//! - score: Score a single instrument from a CSV file
//! - classify: Show the sector category for instrument names

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

#[derive(Parser, Debug)]
#[command(name = "breakout-scanner")]
#[command(about = "Technical breakout detection and sector ranking for index and fund universes", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan all configured universes and rank breakout candidates
    Scan {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/scan.json")]
        config: String,

        /// As-of date (YYYY-MM-DD), defaults to today
        #[arg(long)]
        end: Option<String>,

        /// Report output path (overrides results_dir)
        #[arg(short, long)]
        output: Option<String>,

        /// Maximum concurrent fetches (overrides config)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Hide the progress bar and log to console instead
        #[arg(long)]
        no_progress: bool,
    },

    /// Score a single instrument from a bar CSV file
    Score {
        /// CSV file with date,open,high,low,close,volume[,turnover,pct_change]
        #[arg(short, long)]
        file: String,

        /// Instrument code, e.g. "sh.512480"
        #[arg(short, long)]
        symbol: String,

        /// Display name used for sector classification
        #[arg(short, long)]
        name: Option<String>,

        /// Instrument class (index or fund)
        #[arg(long, default_value = "fund")]
        class: String,

        /// Optional configuration file for thresholds and weights
        #[arg(short, long)]
        config: Option<String>,

        /// Print the assessment as JSON
        #[arg(long)]
        json: bool,
    },

    /// Classify instrument names into sector categories
    Classify {
        /// Names to classify
        #[arg(required = true)]
        names: Vec<String>,
    },
}

fn setup_logging(verbose: bool, command_name: &str, file_only: bool) -> Result<()> {
    std::fs::create_dir_all("logs")?;

    // {command}_{date}.log
    let log_filename = format!(
        "{}_{}.log",
        command_name,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    );
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_appender = tracing_appender::rolling::never("logs", &log_filename);

    if file_only {
        // Keep the console clean for the progress bar
        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    } else {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(true);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(file_appender)
            .with_target(true)
            .with_line_number(true)
            .with_file(true)
            .with_ansi(false);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        info!("Logging initialized");
        info!("Log file: {}", log_path.display());
    }

    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (command_name, file_only) = match &cli.command {
        Commands::Scan { no_progress, .. } => ("scan", !*no_progress),
        Commands::Score { .. } => ("score", false),
        Commands::Classify { .. } => ("classify", false),
    };

    setup_logging(cli.verbose, command_name, file_only)?;

    match cli.command {
        Commands::Scan {
            config,
            end,
            output,
            concurrency,
            no_progress,
        } => commands::scan::run(config, end, output, concurrency, !no_progress),

        Commands::Score {
            file,
            symbol,
            name,
            class,
            config,
            json,
        } => commands::score::run(file, symbol, name, class, config, json),

        Commands::Classify { names } => commands::classify::run(names),
    }
}
