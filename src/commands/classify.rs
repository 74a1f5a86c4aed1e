//! Classify command implementation

use anyhow::Result;
use breakout_scanner::classify;

pub fn run(names: Vec<String>) -> Result<()> {
    println!("\n{}", "=".repeat(60));
    println!("SECTOR CLASSIFICATION");
    println!("{}", "=".repeat(60));
    for name in &names {
        println!("  {:<24} {}", name, classify(name).label());
    }
    println!("{}", "=".repeat(60));
    Ok(())
}
