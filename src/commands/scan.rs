//! Scan command implementation

use anyhow::{Context, Result};
use breakout_scanner::enrichment::{news_source_from_config, NewsSource};
use breakout_scanner::{data, Config, CsvBarSource, ScanError, ScanReport, Scanner};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

pub fn run(
    config_path: String,
    end_override: Option<String>,
    output_override: Option<String>,
    concurrency_override: Option<usize>,
    show_progress: bool,
) -> Result<()> {
    info!("Starting breakout scan");

    let mut config = Config::from_file(&config_path)?;
    info!("Loaded configuration from: {}", config_path);

    if let Some(concurrency) = concurrency_override {
        info!("Overriding max concurrency to: {}", concurrency);
        config.scan.max_concurrency = concurrency.max(1);
    }

    let as_of = match end_override {
        Some(end) => data::parse_date(&end)?,
        None => chrono::Local::now().date_naive(),
    };

    let source = Arc::new(CsvBarSource::new(&config.data.data_dir));
    let news: Option<Arc<dyn NewsSource>> = news_source_from_config(&config.enrichment).map(Arc::from);
    let scanner = Scanner::new(source, config.clone())
        .with_news(news)
        .with_progress(show_progress);

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;
    let outcome = runtime.block_on(scanner.scan_configured(as_of));

    let output = output_override.map(PathBuf::from).unwrap_or_else(|| {
        Path::new(&config.data.results_dir).join(format!("breakout_report_{}.json", as_of.format("%Y%m%d")))
    });

    match outcome {
        Ok(report) => {
            print_report(&report);
            write_report(&report, &output)?;
            info!("Scan completed successfully");
            Ok(())
        }
        Err(ScanError::SourceUnavailable { reason, partial }) => {
            println!("\n  ⚠ Data source unavailable: {}", reason);
            print_report(&partial);
            if let Err(e) = write_report(&partial, &output) {
                warn!("Could not write partial report: {:#}", e);
            }
            anyhow::bail!("Scan aborted: {}", reason)
        }
    }
}

fn write_report(report: &ScanReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json).with_context(|| format!("Failed to write report {}", path.display()))?;
    println!("  Report written to {}", path.display());
    Ok(())
}

fn print_report(report: &ScanReport) {
    println!("\n{}", "=".repeat(60));
    println!("BREAKOUT SCAN {}", report.as_of);
    println!("{}", "=".repeat(60));
    println!("Requested:          {}", report.requested);
    println!("Scored:             {}", report.scored);
    println!("Skipped:            {}", report.skipped.len());
    println!("Fully confirmed:    {}", report.fully_confirmed.len());
    if report.incomplete {
        println!("  ⚠ Batch deadline reached, results are incomplete");
    }

    println!("{}", "-".repeat(60));
    println!("TOP CANDIDATES");
    for record in &report.top {
        println!(
            "  {:>2}. {:<12} {:<16} {:>5.1}  {:<6} {}/4 {}",
            record.rank,
            record.symbol,
            record.name,
            record.score,
            record.strength,
            record.conditions_met,
            if record.fully_confirmed { "✓" } else { "" }
        );
    }

    if !report.categories.is_empty() {
        println!("{}", "-".repeat(60));
        println!("BY SECTOR");
        for group in &report.categories {
            let leaders: Vec<String> = group
                .top
                .iter()
                .map(|r| format!("{} {:.1}", r.name, r.score))
                .collect();
            println!(
                "  {:<10} n={:<3} avg={:>4.1}  {}",
                group.label,
                group.count,
                group.average_score,
                leaders.join(", ")
            );
        }
    }

    if !report.skipped.is_empty() {
        println!("{}", "-".repeat(60));
        println!("SKIPPED");
        for skipped in &report.skipped {
            println!("  {:<12} {:<16} {}", skipped.symbol, skipped.name, skipped.reason);
        }
    }
    println!("{}", "=".repeat(60));
}
