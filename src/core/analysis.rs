//! Analysis stage: contract enforcement around the injected `Analyzer`.
//!
//! The stage is all-or-nothing. An empty input, an analyzer error, or any
//! opportunity that breaks the output contract fails the whole stage.

use std::sync::Arc;

use tracing::{debug, error};

use crate::adapters::Analyzer;
use crate::domain::{AnalysisContext, MergedDataset, Opportunity, StageError};

pub struct AnalysisStage {
    analyzer: Arc<dyn Analyzer>,
}

impl AnalysisStage {
    pub fn new(analyzer: Arc<dyn Analyzer>) -> Self {
        Self { analyzer }
    }

    pub fn analyzer_name(&self) -> &str {
        self.analyzer.name()
    }

    pub async fn analyze(
        &self,
        dataset: &MergedDataset,
        context: &AnalysisContext,
    ) -> Result<Vec<Opportunity>, StageError> {
        if dataset.is_empty() {
            return Err(StageError::AnalysisFailed(
                "merged dataset contains no records".to_string(),
            ));
        }

        let opportunities = self.analyzer.analyze(dataset, context).await.map_err(|e| {
            error!(analyzer = self.analyzer.name(), error = %e, "Analyzer failed");
            StageError::AnalysisFailed(format!("{:#}", e))
        })?;

        validate(dataset, &opportunities)?;

        debug!(
            analyzer = self.analyzer.name(),
            deep = context.deep_analysis,
            opportunities = opportunities.len(),
            "Analysis complete"
        );

        Ok(opportunities)
    }
}

/// Every opportunity must have confidence in 0..=100 and come from a market present in the dataset
fn validate(dataset: &MergedDataset, opportunities: &[Opportunity]) -> Result<(), StageError> {
    let sources = dataset.sources();

    for opp in opportunities {
        if !opp.has_valid_confidence() {
            return Err(StageError::AnalysisFailed(format!(
                "{} has confidence {} outside 0..=100",
                opp.symbol, opp.confidence
            )));
        }
        if !sources.contains(&opp.market) {
            return Err(StageError::AnalysisFailed(format!(
                "{} references market {} with no collected records",
                opp.symbol, opp.market
            )));
        }
    }

    Ok(())
}
