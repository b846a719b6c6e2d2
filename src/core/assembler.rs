//! Digest assembly: filter, order, and summarize a run's opportunities.

use std::cmp::Ordering;

use chrono::Utc;

use crate::domain::digest::fingerprint;
use crate::domain::{Digest, DigestSummary, Opportunity, WorkflowRun};

/// Builds one digest per successful run
#[derive(Debug, Clone, Default)]
pub struct DigestAssembler {
    /// Opportunities below this confidence are dropped (None keeps everything)
    confidence_floor: Option<u8>,
}

impl DigestAssembler {
    pub fn new(confidence_floor: Option<u8>) -> Self {
        Self { confidence_floor }
    }

    pub fn confidence_floor(&self) -> Option<u8> {
        self.confidence_floor
    }

    /// Always produces a digest; an empty opportunity list yields an "all clear" digest
    pub fn assemble(&self, run: &WorkflowRun, opportunities: Vec<Opportunity>) -> Digest {
        let before = opportunities.len();

        let mut kept: Vec<Opportunity> = match self.confidence_floor {
            Some(floor) => opportunities
                .into_iter()
                .filter(|o| o.confidence >= floor)
                .collect(),
            None => opportunities,
        };
        sort_opportunities(&mut kept);

        let mut summary = DigestSummary::tally(&kept);
        summary.excluded_below_floor = before - kept.len();
        summary.degraded_sources = run.degraded_sources.len();

        Digest {
            run_id: run.id,
            scan_type: run.scan_type,
            generated_at: Utc::now(),
            fingerprint: fingerprint(&kept),
            opportunities: kept,
            summary,
            degraded_sources: run.degraded_sources.clone(),
        }
    }
}

/// Confidence descending, then symbol ascending, then market
pub fn digest_order(a: &Opportunity, b: &Opportunity) -> Ordering {
    b.confidence
        .cmp(&a.confidence)
        .then_with(|| a.symbol.cmp(&b.symbol))
        .then_with(|| a.market.cmp(&b.market))
}

pub fn sort_opportunities(opportunities: &mut [Opportunity]) {
    opportunities.sort_by(digest_order);
}

/// True if the slice is already in digest order
pub fn is_digest_ordered(opportunities: &[Opportunity]) -> bool {
    opportunities
        .windows(2)
        .all(|w| digest_order(&w[0], &w[1]) != Ordering::Greater)
}
