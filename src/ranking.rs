//! Ranking and aggregation across universes
//!
//! Assessments from several universes (sector indices, funds) are merged into
//! one deduplicated list keyed by symbol, sorted by score, then grouped by
//! sector category. The output records are flat and serializable so any
//! report renderer can consume them.

use chrono::NaiveDate;
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::cmp::Reverse;
use std::collections::HashMap;

use crate::classify::{classify, SectorCategory};
use crate::config::RankingConfig;
use crate::scoring::{AnalysisMode, BreakoutAssessment, Strength};
use crate::InstrumentClass;

// =============================================================================
// Inputs
// =============================================================================

/// Assessments from one universe, in evaluation order
#[derive(Debug, Clone)]
pub struct UniverseResult {
    pub name: String,
    pub class: InstrumentClass,
    /// Keep only the best N before merging
    pub candidate_limit: Option<usize>,
    pub assessments: Vec<BreakoutAssessment>,
}

impl UniverseResult {
    pub fn new(name: impl Into<String>, class: InstrumentClass) -> Self {
        Self {
            name: name.into(),
            class,
            candidate_limit: None,
            assessments: Vec::new(),
        }
    }

    pub fn with_candidate_limit(mut self, limit: Option<usize>) -> Self {
        self.candidate_limit = limit;
        self
    }

    pub fn with_assessments(mut self, assessments: Vec<BreakoutAssessment>) -> Self {
        self.assessments = assessments;
        self
    }

    /// Assessments sorted by score (stable), truncated to the candidate limit
    fn candidates(&self) -> Vec<&BreakoutAssessment> {
        let mut sorted: Vec<&BreakoutAssessment> = self.assessments.iter().collect();
        sorted.sort_by_key(|a| Reverse(OrderedFloat(a.score)));
        if let Some(limit) = self.candidate_limit {
            sorted.truncate(limit);
        }
        sorted
    }
}

// =============================================================================
// Ranked Records
// =============================================================================

/// Flat, serializable view of one ranked instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRecord {
    pub rank: usize,
    pub symbol: String,
    pub name: String,
    pub class: InstrumentClass,
    pub universe: String,
    pub category: SectorCategory,
    /// Final score including any enrichment bonus
    pub score: f64,
    /// Score produced by the model
    pub model_score: f64,
    pub raw_score: f64,
    pub enrichment_bonus: f64,
    pub news_count: usize,
    pub strength: Strength,
    pub fully_confirmed: bool,
    pub conditions_met: usize,
    pub mode: AnalysisMode,
    pub reduced_confidence: bool,
    pub bars_available: usize,
    pub latest_price: f64,
    pub drawdown_pct: f64,
    pub volume_ratio: f64,
    /// Close within the recent high-low range in percent, 50 for a flat range
    pub price_position: Option<f64>,
}

impl RankedRecord {
    pub fn from_assessment(assessment: &BreakoutAssessment, universe: &str) -> Self {
        Self {
            rank: 0,
            symbol: assessment.symbol.to_string(),
            name: assessment.name.clone(),
            class: assessment.class,
            universe: universe.to_string(),
            category: classify(&assessment.name),
            score: assessment.score,
            model_score: assessment.score,
            raw_score: assessment.raw_score,
            enrichment_bonus: 0.0,
            news_count: 0,
            strength: assessment.strength,
            fully_confirmed: assessment.fully_confirmed,
            conditions_met: assessment.conditions.count(),
            mode: assessment.mode(),
            reduced_confidence: assessment.reduced_confidence,
            bars_available: assessment.bars_available,
            latest_price: assessment.latest_price,
            drawdown_pct: assessment.drawdown_pct(),
            volume_ratio: assessment.volume_ratio(),
            price_position: assessment.price_position(),
        }
    }

    /// Add a bounded bonus on top of the model score, capped at `max_score`
    pub fn apply_bonus(&mut self, bonus: f64, news_count: usize, max_score: f64) {
        self.enrichment_bonus = bonus.max(0.0);
        self.news_count = news_count;
        self.score = (self.model_score + self.enrichment_bonus).min(max_score);
    }
}

/// Per-category summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryGroup {
    pub category: SectorCategory,
    pub label: String,
    pub count: usize,
    pub average_score: f64,
    pub best_score: f64,
    pub top: Vec<RankedRecord>,
}

// =============================================================================
// Ranked Result Set
// =============================================================================

/// Deduplicated records ordered by descending score
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedResultSet {
    records: Vec<RankedRecord>,
}

impl RankedResultSet {
    /// Merge universes into one ranked list.
    ///
    /// Records are keyed by symbol. A later duplicate replaces an earlier one
    /// only when its score is strictly higher, so ties keep the earlier input.
    pub fn merge(inputs: &[UniverseResult]) -> Self {
        // (record, input set index, position within set)
        let mut merged: Vec<(RankedRecord, usize, usize)> = Vec::new();
        let mut by_symbol: HashMap<String, usize> = HashMap::new();

        for (set_idx, universe) in inputs.iter().enumerate() {
            for (pos, assessment) in universe.candidates().into_iter().enumerate() {
                let record = RankedRecord::from_assessment(assessment, &universe.name);
                match by_symbol.get(&record.symbol) {
                    Some(&slot) => {
                        if record.score > merged[slot].0.score {
                            merged[slot] = (record, set_idx, pos);
                        }
                    }
                    None => {
                        by_symbol.insert(record.symbol.clone(), merged.len());
                        merged.push((record, set_idx, pos));
                    }
                }
            }
        }

        merged.sort_by_key(|(r, set_idx, pos)| (Reverse(OrderedFloat(r.score)), *set_idx, *pos));

        let mut set = Self {
            records: merged.into_iter().map(|(r, _, _)| r).collect(),
        };
        set.assign_ranks();
        set
    }

    fn assign_ranks(&mut self) {
        for (i, record) in self.records.iter_mut().enumerate() {
            record.rank = i + 1;
        }
    }

    /// Re-sort after scores changed; stable for equal scores
    pub fn rerank(&mut self) {
        self.records.sort_by_key(|r| Reverse(OrderedFloat(r.score)));
        self.assign_ranks();
    }

    pub fn records(&self) -> &[RankedRecord] {
        &self.records
    }

    pub fn records_mut(&mut self) -> &mut [RankedRecord] {
        &mut self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, symbol: &str) -> Option<&RankedRecord> {
        self.records.iter().find(|r| r.symbol == symbol)
    }

    /// Best `n` records overall
    pub fn top(&self, n: usize) -> &[RankedRecord] {
        &self.records[..n.min(self.records.len())]
    }

    /// Records meeting all four breakout conditions, best first
    pub fn fully_confirmed(&self) -> Vec<&RankedRecord> {
        self.records.iter().filter(|r| r.fully_confirmed).collect()
    }

    /// Every record grouped by category, categories ordered by their best record
    pub fn partition_by_category(&self) -> Vec<(SectorCategory, Vec<&RankedRecord>)> {
        let mut groups: Vec<(SectorCategory, Vec<&RankedRecord>)> = Vec::new();
        for record in &self.records {
            match groups.iter_mut().find(|(c, _)| *c == record.category) {
                Some((_, members)) => members.push(record),
                None => groups.push((record.category, vec![record])),
            }
        }
        groups
    }

    /// Category summaries with the best `top_n` records of each
    pub fn category_groups(&self, top_n: usize) -> Vec<CategoryGroup> {
        self.partition_by_category()
            .into_iter()
            .map(|(category, members)| {
                let scores: Vec<f64> = members.iter().map(|r| r.score).collect();
                CategoryGroup {
                    category,
                    label: category.label().to_string(),
                    count: members.len(),
                    average_score: scores.iter().mean(),
                    best_score: scores.first().copied().unwrap_or(0.0),
                    top: members.into_iter().take(top_n).cloned().collect(),
                }
            })
            .collect()
    }
}

// =============================================================================
// Report
// =============================================================================

/// Instrument that produced no assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedInstrument {
    pub symbol: String,
    pub name: String,
    pub universe: String,
    pub reason: String,
}

/// Everything a renderer needs from one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanReport {
    pub generated_at: String,
    pub as_of: NaiveDate,
    pub requested: usize,
    pub scored: usize,
    /// The batch deadline passed before every instrument finished
    pub incomplete: bool,
    pub skipped: Vec<SkippedInstrument>,
    pub fully_confirmed: Vec<RankedRecord>,
    pub top: Vec<RankedRecord>,
    pub categories: Vec<CategoryGroup>,
    pub results: RankedResultSet,
}

impl ScanReport {
    pub fn build(
        results: RankedResultSet,
        skipped: Vec<SkippedInstrument>,
        requested: usize,
        as_of: NaiveDate,
        incomplete: bool,
        config: &RankingConfig,
    ) -> Self {
        Self {
            generated_at: chrono::Local::now().to_rfc3339(),
            as_of,
            requested,
            scored: results.len(),
            incomplete,
            skipped,
            fully_confirmed: results.fully_confirmed().into_iter().cloned().collect(),
            top: results.top(config.top_n).to_vec(),
            categories: results.category_groups(config.category_top_n),
            results,
        }
    }
}
