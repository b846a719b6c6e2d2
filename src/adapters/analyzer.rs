//! Baseline rule-based analyzer.
//!
//! Scores each record from a handful of common attributes. Real scoring
//! models plug in through the `Analyzer` trait or `CommandAnalyzer`.
//! Deep analysis adds the risk reasoning to every rationale.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::{
    AnalysisContext, MergedDataset, Opportunity, Record, RiskLevel, Signal, SourceId,
};

use super::Analyzer;

/// Neutral starting score
const BASELINE: i32 = 50;

/// Scores at or above this are BUY, at or below `100 - BUY_THRESHOLD` are SELL
const BUY_THRESHOLD: i32 = 65;

#[derive(Debug, Default)]
pub struct HeuristicAnalyzer;

impl HeuristicAnalyzer {
    pub fn new() -> Self {
        Self
    }

    fn score(&self, record: &Record, deep: bool) -> Option<Opportunity> {
        if record.attributes.values().all(|v| !v.is_number()) {
            return None;
        }

        let mut score = BASELINE;
        let mut rationale = Vec::new();

        if record.source == SourceId::FixedIncome {
            if let Some(y) = record.number("yield") {
                if y >= 4.5 {
                    score += 20;
                    rationale.push(format!("Yield {:.2}% at or above 4.5%", y));
                } else if y < 2.0 {
                    score -= 15;
                    rationale.push(format!("Yield {:.2}% below 2%", y));
                }
            }
        } else {
            if let Some(dy) = record.number("dividend_yield") {
                if dy >= 4.0 {
                    score += 20;
                    rationale.push(format!("Dividend yield {:.1}% at or above 4%", dy));
                } else if dy >= 3.0 {
                    score += 10;
                    rationale.push(format!("Dividend yield {:.1}% at or above 3%", dy));
                }
            }
            if let Some(pe) = record.number("pe_ratio") {
                if pe > 0.0 && pe < 15.0 {
                    score += 10;
                    rationale.push(format!("P/E {:.1} below 15", pe));
                } else if pe > 30.0 {
                    score -= 15;
                    rationale.push(format!("P/E {:.1} above 30", pe));
                }
            }
            if let Some(change) = record.number("change_percent") {
                if change <= -5.0 {
                    score += 10;
                    rationale.push(format!("Pulled back {:.1}%", change));
                } else if change >= 8.0 {
                    score -= 10;
                    rationale.push(format!("Extended after +{:.1}% move", change));
                }
            }
        }

        let signal = if score >= BUY_THRESHOLD {
            Signal::Buy
        } else if score <= 100 - BUY_THRESHOLD {
            Signal::Sell
        } else {
            Signal::Hold
        };

        let distance = ((score - BASELINE).abs() * 2).clamp(0, 100);
        let confidence = (match signal {
            Signal::Hold => 100 - distance,
            _ => distance,
        }) as u8;

        if rationale.is_empty() {
            rationale.push("No notable factors".to_string());
        }
        if deep {
            rationale.push(self.risk_note(record));
        }

        Some(Opportunity {
            symbol: record.symbol.clone(),
            market: record.source,
            signal,
            confidence,
            rationale,
            risk: self.risk(record),
        })
    }

    fn risk_note(&self, record: &Record) -> String {
        let risk = self.risk(record);
        match record.number("beta") {
            _ if record.source == SourceId::FixedIncome => {
                format!("Risk {:?}: government fixed income", risk)
            }
            Some(b) => format!("Risk {:?}: beta {:.2}", risk, b),
            None => format!("Risk {:?}: no beta reported", risk),
        }
    }

    fn risk(&self, record: &Record) -> RiskLevel {
        if record.source == SourceId::FixedIncome {
            return RiskLevel::Low;
        }
        match record.number("beta") {
            Some(b) if b < 0.8 => RiskLevel::Low,
            Some(b) if b < 1.2 => RiskLevel::Medium,
            Some(_) => RiskLevel::High,
            None if record.source == SourceId::RegionalEquities => RiskLevel::High,
            None => RiskLevel::Medium,
        }
    }
}

#[async_trait]
impl Analyzer for HeuristicAnalyzer {
    fn name(&self) -> &str {
        "heuristic"
    }

    async fn analyze(
        &self,
        dataset: &MergedDataset,
        context: &AnalysisContext,
    ) -> Result<Vec<Opportunity>> {
        Ok(dataset
            .records()
            .filter_map(|r| self.score(r, context.deep_analysis))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ScanType, SourceResult};

    fn ctx() -> AnalysisContext {
        AnalysisContext::new(ScanType::Daily)
    }

    fn dataset(records: Vec<Record>) -> MergedDataset {
        let mut by_source: std::collections::BTreeMap<SourceId, Vec<Record>> = Default::default();
        for r in records {
            by_source.entry(r.source).or_default().push(r);
        }
        MergedDataset::merge(
            by_source
                .into_iter()
                .map(|(s, rs)| SourceResult::success(s, rs, Vec::new())),
        )
    }

    #[tokio::test]
    async fn test_high_yield_value_stock_is_buy() {
        let ds = dataset(vec![Record::new(SourceId::UsEquities, "T")
            .with("dividend_yield", 6.5)
            .with("pe_ratio", 8.0)
            .with("beta", 0.6)]);

        let opps = HeuristicAnalyzer::new().analyze(&ds, &ctx()).await.unwrap();

        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].signal, Signal::Buy);
        assert_eq!(opps[0].confidence, 60);
        assert_eq!(opps[0].risk, RiskLevel::Low);
        assert_eq!(opps[0].rationale.len(), 2);
    }

    #[tokio::test]
    async fn test_expensive_extended_stock_is_sell() {
        let ds = dataset(vec![Record::new(SourceId::UsEquities, "HOT")
            .with("pe_ratio", 45.0)
            .with("change_percent", 12.0)]);

        let opps = HeuristicAnalyzer::new().analyze(&ds, &ctx()).await.unwrap();
        assert_eq!(opps[0].signal, Signal::Sell);
        assert!(opps[0].has_valid_confidence());
    }

    #[tokio::test]
    async fn test_deep_analysis_explains_risk() {
        let ds = dataset(vec![
            Record::new(SourceId::UsEquities, "T")
                .with("dividend_yield", 6.5)
                .with("beta", 0.6),
            Record::new(SourceId::FixedIncome, "US10Y").with("yield", 4.8),
        ]);
        let analyzer = HeuristicAnalyzer::new();

        let shallow = analyzer.analyze(&ds, &ctx()).await.unwrap();
        let deep = analyzer
            .analyze(&ds, &ctx().with_deep_analysis(true))
            .await
            .unwrap();

        assert_eq!(shallow.len(), deep.len());
        for (s, d) in shallow.iter().zip(&deep) {
            assert_eq!(s.signal, d.signal);
            assert_eq!(s.confidence, d.confidence);
            assert_eq!(d.rationale.len(), s.rationale.len() + 1);
        }
        let us = deep.iter().find(|o| o.symbol == "T").unwrap();
        assert_eq!(us.rationale.last().unwrap(), "Risk Low: beta 0.60");
    }

    #[tokio::test]
    async fn test_records_without_numbers_are_skipped() {
        let ds = dataset(vec![
            Record::new(SourceId::ScrapedData, "KO").with("headline", "Coke beats"),
            Record::new(SourceId::FixedIncome, "US10Y").with("yield", 4.8),
        ]);

        let opps = HeuristicAnalyzer::new().analyze(&ds, &ctx()).await.unwrap();
        assert_eq!(opps.len(), 1);
        assert_eq!(opps[0].symbol, "US10Y");
        assert_eq!(opps[0].risk, RiskLevel::Low);
    }
}
