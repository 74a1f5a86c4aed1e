//! Optional news enrichment
//!
//! A news collaborator may add a small bounded bonus to well-scoring records.
//! The pass never fails: a missing or failing collaborator simply adds nothing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::config::EnrichmentConfig;
use crate::ranking::RankedResultSet;

/// One news item returned for an instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewsSnippet {
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
}

/// News collaborator: recent snippets mentioning an instrument name
pub trait NewsSource: Send + Sync {
    fn lookup(&self, name: &str) -> Result<Vec<NewsSnippet>>;
}

/// News snippets preloaded from a JSON object of `name -> [snippet, ...]`
#[derive(Debug, Clone, Default)]
pub struct JsonNewsSource {
    snippets: HashMap<String, Vec<NewsSnippet>>,
}

impl JsonNewsSource {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read news file {}", path.display()))?;
        let snippets: HashMap<String, Vec<NewsSnippet>> =
            serde_json::from_str(&contents).context("Failed to parse news JSON")?;
        Ok(Self { snippets })
    }

    pub fn from_map(snippets: HashMap<String, Vec<NewsSnippet>>) -> Self {
        Self { snippets }
    }
}

impl NewsSource for JsonNewsSource {
    fn lookup(&self, name: &str) -> Result<Vec<NewsSnippet>> {
        Ok(self.snippets.get(name).cloned().unwrap_or_default())
    }
}

/// Build the configured news source; `None` disables enrichment
pub fn news_source_from_config(config: &EnrichmentConfig) -> Option<Box<dyn NewsSource>> {
    if !config.enabled {
        return None;
    }
    let path = config.news_file.as_ref()?;
    match JsonNewsSource::from_file(path) {
        Ok(source) => {
            info!("News enrichment enabled from {}", path);
            Some(Box::new(source))
        }
        Err(e) => {
            warn!("News enrichment disabled: {:#}", e);
            None
        }
    }
}

/// Apply the news bonus to qualifying records and re-rank.
///
/// Records at or above `min_score` are looked up best-first, at most
/// `max_lookups` of them. Returns how many records received a bonus.
pub fn enrich(
    results: &mut RankedResultSet,
    news: Option<&dyn NewsSource>,
    config: &EnrichmentConfig,
    max_score: f64,
) -> usize {
    let Some(news) = news else {
        return 0;
    };
    if !config.enabled {
        return 0;
    }

    let mut enriched = 0;
    for record in results
        .records_mut()
        .iter_mut()
        .filter(|r| r.model_score >= config.min_score)
        .take(config.max_lookups)
    {
        match news.lookup(&record.name) {
            Ok(snippets) if !snippets.is_empty() => {
                debug!(
                    symbol = %record.symbol,
                    count = snippets.len(),
                    "News found, applying bonus"
                );
                record.apply_bonus(config.bonus, snippets.len(), max_score);
                enriched += 1;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("News lookup failed for {}: {:#}", record.name, e);
            }
        }
    }

    if enriched > 0 {
        results.rerank();
    }
    enriched
}
