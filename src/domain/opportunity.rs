//! Scored signals produced by the analysis stage.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::source::SourceId;

/// Highest confidence an opportunity may carry
pub const MAX_CONFIDENCE: u8 = 100;

/// Direction of a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

/// Risk classification attached by the analyzer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// A scored buy/sell/hold signal for one symbol on one market
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opportunity {
    pub symbol: String,

    /// Market the underlying record came from
    pub market: SourceId,

    pub signal: Signal,

    /// 0..=100
    pub confidence: u8,

    /// Supporting reasons, most important first
    #[serde(default)]
    pub rationale: Vec<String>,

    pub risk: RiskLevel,
}

impl Opportunity {
    pub fn new(
        symbol: impl Into<String>,
        market: SourceId,
        signal: Signal,
        confidence: u8,
        risk: RiskLevel,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            market,
            signal,
            confidence,
            rationale: Vec::new(),
            risk,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.rationale.push(reason.into());
        self
    }

    pub fn has_valid_confidence(&self) -> bool {
        self.confidence <= MAX_CONFIDENCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_wire_format() {
        let opp = Opportunity::new("KO", SourceId::UsEquities, Signal::Buy, 80, RiskLevel::Low)
            .with_reason("Dividend yield above 3%");

        let json = serde_json::to_value(&opp).unwrap();
        assert_eq!(json["signal"], "BUY");
        assert_eq!(json["risk"], "low");
        assert_eq!(json["market"], "us_equities");
        assert_eq!(json["rationale"][0], "Dividend yield above 3%");
    }

    #[test]
    fn test_confidence_bounds() {
        let ok = Opportunity::new("KO", SourceId::UsEquities, Signal::Hold, 100, RiskLevel::Low);
        let bad = Opportunity::new("KO", SourceId::UsEquities, Signal::Hold, 101, RiskLevel::Low);
        assert!(ok.has_valid_confidence());
        assert!(!bad.has_valid_confidence());
    }
}
