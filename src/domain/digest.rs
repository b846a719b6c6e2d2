//! The per-run output artifact handed to the delivery sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use uuid::Uuid;

use super::opportunity::{Opportunity, RiskLevel, Signal};
use super::run::ScanType;
use super::source::SourceError;

/// Digest of one successful run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Digest {
    pub run_id: Uuid,
    pub scan_type: ScanType,
    pub generated_at: DateTime<Utc>,

    /// Sorted by confidence descending, then symbol ascending
    pub opportunities: Vec<Opportunity>,

    pub summary: DigestSummary,

    /// Sources that failed during collection (the digest is built from the rest)
    #[serde(default)]
    pub degraded_sources: Vec<SourceError>,

    /// Stable hash of the opportunity set, for de-duplicating deliveries
    pub fingerprint: String,
}

impl Digest {
    /// No opportunities survived: an "all clear" digest
    pub fn is_all_clear(&self) -> bool {
        self.opportunities.is_empty()
    }
}

/// Counts shown at the top of a digest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigestSummary {
    pub total: usize,
    pub buy: usize,
    pub sell: usize,
    pub hold: usize,
    pub low_risk: usize,
    pub medium_risk: usize,
    pub high_risk: usize,

    /// Dropped by the confidence floor
    pub excluded_below_floor: usize,

    pub degraded_sources: usize,
}

impl DigestSummary {
    pub fn tally(opportunities: &[Opportunity]) -> Self {
        let mut summary = Self {
            total: opportunities.len(),
            ..Default::default()
        };

        for opp in opportunities {
            match opp.signal {
                Signal::Buy => summary.buy += 1,
                Signal::Sell => summary.sell += 1,
                Signal::Hold => summary.hold += 1,
            }
            match opp.risk {
                RiskLevel::Low => summary.low_risk += 1,
                RiskLevel::Medium => summary.medium_risk += 1,
                RiskLevel::High => summary.high_risk += 1,
            }
        }

        summary
    }
}

/// Hash an ordered opportunity list (first 16 hex chars of SHA-256)
pub fn fingerprint(opportunities: &[Opportunity]) -> String {
    let mut hasher = Sha256::new();
    for opp in opportunities {
        hasher.update(opp.symbol.as_bytes());
        hasher.update([0]);
        hasher.update(opp.market.as_str().as_bytes());
        hasher.update([0]);
        hasher.update(opp.signal.to_string().as_bytes());
        hasher.update([opp.confidence]);
    }
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::source::SourceId;

    fn opp(symbol: &str, signal: Signal, confidence: u8, risk: RiskLevel) -> Opportunity {
        Opportunity::new(symbol, SourceId::UsEquities, signal, confidence, risk)
    }

    #[test]
    fn test_summary_tally() {
        let opps = vec![
            opp("KO", Signal::Buy, 90, RiskLevel::Low),
            opp("T", Signal::Sell, 70, RiskLevel::High),
            opp("VZ", Signal::Hold, 50, RiskLevel::Medium),
            opp("PG", Signal::Buy, 40, RiskLevel::Low),
        ];

        let summary = DigestSummary::tally(&opps);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.buy, 2);
        assert_eq!(summary.sell, 1);
        assert_eq!(summary.hold, 1);
        assert_eq!(summary.low_risk, 2);
        assert_eq!(summary.high_risk, 1);
    }

    #[test]
    fn test_fingerprint_is_order_sensitive_and_stable() {
        let a = vec![opp("KO", Signal::Buy, 90, RiskLevel::Low), opp("T", Signal::Sell, 70, RiskLevel::High)];
        let b = vec![a[1].clone(), a[0].clone()];

        assert_eq!(fingerprint(&a), fingerprint(&a.clone()));
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_eq!(fingerprint(&a).len(), 16);
        assert_eq!(fingerprint(&[]).len(), 16);
    }
}
