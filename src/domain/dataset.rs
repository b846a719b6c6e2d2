//! The merged, partial-success dataset produced by the collection stage.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::run::AnalysisContext;
use super::source::{Record, SourceError, SourceId, SourceResult};

/// Records are unique per (source, symbol) so the same ticker on two markets never collides
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RecordKey {
    pub source: SourceId,
    pub symbol: String,
}

/// Union of all successful source results plus the sources that failed
#[derive(Debug, Clone, Default)]
pub struct MergedDataset {
    records: BTreeMap<RecordKey, Record>,
    failures: Vec<SourceError>,
    omitted: BTreeMap<SourceId, Vec<String>>,
}

/// Wire shape handed to external analyzers
#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetSnapshot {
    pub context: AnalysisContext,
    pub records: Vec<Record>,
    pub failures: Vec<SourceError>,
}

impl MergedDataset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge fetch results. Failed sources add zero records and one failure entry.
    pub fn merge(results: impl IntoIterator<Item = SourceResult>) -> Self {
        let mut dataset = Self::new();
        for result in results {
            dataset.absorb(result);
        }
        dataset
    }

    /// Fold a single source result into the dataset
    pub fn absorb(&mut self, result: SourceResult) {
        if let Some(failure) = result.to_source_error() {
            self.failures.push(failure);
            return;
        }

        if !result.omitted.is_empty() {
            self.omitted
                .entry(result.source)
                .or_default()
                .extend(result.omitted);
        }

        for record in result.records {
            // Adapters stamp their own source; trust the result's
            let record = Record {
                source: result.source,
                ..record
            };
            let key = RecordKey {
                source: record.source,
                symbol: record.symbol.clone(),
            };
            // First record for a key wins
            self.records.entry(key).or_insert(record);
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    pub fn get(&self, source: SourceId, symbol: &str) -> Option<&Record> {
        self.records.get(&RecordKey {
            source,
            symbol: symbol.to_string(),
        })
    }

    /// Sources that contributed at least one record
    pub fn sources(&self) -> BTreeSet<SourceId> {
        self.records.keys().map(|k| k.source).collect()
    }

    pub fn records_for(&self, source: SourceId) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .filter(move |(k, _)| k.source == source)
            .map(|(_, r)| r)
    }

    pub fn failures(&self) -> &[SourceError] {
        &self.failures
    }

    /// Keys a source was asked for but had no data on
    pub fn omitted(&self, source: SourceId) -> &[String] {
        self.omitted.get(&source).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn snapshot(&self, context: &AnalysisContext) -> DatasetSnapshot {
        DatasetSnapshot {
            context: *context,
            records: self.records.values().cloned().collect(),
            failures: self.failures.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::source::FetchError;

    fn us(symbols: &[&str]) -> SourceResult {
        let records = symbols
            .iter()
            .map(|s| Record::new(SourceId::UsEquities, *s).with("price", 10.0))
            .collect();
        SourceResult::success(SourceId::UsEquities, records, vec!["MISSING".to_string()])
    }

    #[test]
    fn test_merge_tolerates_failed_source() {
        let results = vec![
            us(&["KO", "PG"]),
            SourceResult::failure(SourceId::FixedIncome, FetchError::invalid_response("bad json")),
        ];

        let dataset = MergedDataset::merge(results);

        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.failures().len(), 1);
        assert_eq!(dataset.failures()[0].source, SourceId::FixedIncome);
        assert_eq!(dataset.omitted(SourceId::UsEquities), ["MISSING".to_string()]);
        assert!(!dataset.sources().contains(&SourceId::FixedIncome));
    }

    #[test]
    fn test_same_symbol_on_two_markets_does_not_collide() {
        let regional = SourceResult::success(
            SourceId::RegionalEquities,
            vec![Record::new(SourceId::RegionalEquities, "KO")],
            Vec::new(),
        );

        let dataset = MergedDataset::merge(vec![us(&["KO"]), regional]);

        assert_eq!(dataset.len(), 2);
        assert!(dataset.get(SourceId::UsEquities, "KO").is_some());
        assert!(dataset.get(SourceId::RegionalEquities, "KO").is_some());
    }

    #[test]
    fn test_record_source_is_taken_from_result() {
        // An adapter that mislabels records must not leak into another source's keyspace
        let result = SourceResult::success(
            SourceId::ScrapedData,
            vec![Record::new(SourceId::UsEquities, "KO")],
            Vec::new(),
        );

        let dataset = MergedDataset::merge(vec![result]);
        assert!(dataset.get(SourceId::ScrapedData, "KO").is_some());
        assert!(dataset.get(SourceId::UsEquities, "KO").is_none());
    }
}
