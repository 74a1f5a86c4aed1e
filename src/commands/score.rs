//! Score command implementation

use anyhow::{anyhow, Context, Result};
use breakout_scanner::scanner::evaluate_series;
use breakout_scanner::scoring::AnalysisDetail;
use breakout_scanner::{classify, data, BarSeries, BreakoutScorer, Config, Instrument, InstrumentClass, Symbol};
use tracing::info;

pub fn run(
    file: String,
    symbol: String,
    name: Option<String>,
    class: String,
    config_path: Option<String>,
    json: bool,
) -> Result<()> {
    let config = match config_path {
        Some(path) => Config::from_file(&path)?,
        None => Config::default(),
    };
    let class: InstrumentClass = class.parse().map_err(|e: String| anyhow!(e))?;
    let instrument = Instrument::new(&symbol, name.unwrap_or_else(|| symbol.clone()), class);

    let bars = data::load_csv(&file).with_context(|| format!("Failed to load {}", file))?;
    info!("Loaded {} bars from {}", bars.len(), file);
    let series = BarSeries::from_unsorted(Symbol::new(&symbol), bars);

    let scorer = BreakoutScorer::from_config(&config);
    let assessment = evaluate_series(&instrument, &series, &config.indicators, &scorer)
        .ok_or_else(|| anyhow!("No bars to score in {}", file))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&assessment)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60));
    println!("BREAKOUT ASSESSMENT: {} {}", assessment.symbol, assessment.name);
    println!("{}", "=".repeat(60));
    println!("Sector:             {}", classify(&assessment.name).label());
    println!("Latest Price:       {:.3}", assessment.latest_price);
    println!("Bars Available:     {}", assessment.bars_available);
    println!("Mode:               {}", assessment.mode());
    println!("Score:              {:.1} / {:.0}", assessment.score, scorer.config().max_score);
    println!("Strength:           {}", assessment.strength);
    println!("Confidence:         {:.2}", assessment.confidence);
    match assessment.price_position() {
        Some(position) => println!("Price Position:     {:.1}%", position),
        None => println!("Price Position:     n/a"),
    }
    println!("{}", "-".repeat(60));
    match &assessment.detail {
        AnalysisDetail::Full(signals) => {
            println!("Drawdown:           {:.1}%", signals.drawdown * 100.0);
            println!("Volume Ratio:       {:.2}", signals.volume_ratio);
            println!("Break MA:           {}", signals.price_break_ma);
            println!("Break Recent High:  {}", signals.price_break_high);
            println!("MACD Golden Cross:  {}", signals.macd_golden_cross);
            match signals.rsi {
                Some(rsi) => println!("RSI:                {:.1}", rsi),
                None => println!("RSI:                n/a"),
            }
            println!("RSI Recovery:       {}", signals.rsi_recovery);
        }
        AnalysisDetail::Basic(signals) => {
            println!("Price Change:       {:.2}%", signals.price_change_pct);
            println!("Above Short MA:     {}", signals.above_short_ma);
            println!("Volume Ratio:       {:.2}", signals.volume_ratio);
        }
    }
    println!("{}", "-".repeat(60));
    println!(
        "Conditions:         {}/4{}",
        assessment.conditions.count(),
        if assessment.fully_confirmed { " (fully confirmed)" } else { "" }
    );
    println!("{}", "=".repeat(60));

    Ok(())
}
