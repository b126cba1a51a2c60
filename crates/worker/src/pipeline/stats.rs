use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use shared::models::CombinationKey;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub(crate) struct OutcomeCounts {
    pub(crate) successful: usize,
    pub(crate) failed: usize,
    pub(crate) skipped: usize,
}

impl OutcomeCounts {
    fn bump(&mut self, outcome: CombinationOutcome) {
        match outcome {
            CombinationOutcome::Successful => self.successful += 1,
            CombinationOutcome::Failed => self.failed += 1,
            CombinationOutcome::Skipped => self.skipped += 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CombinationOutcome {
    Successful,
    Failed,
    Skipped,
}

/// Counters for one pipeline run. Mutated only by the run's control flow.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct PipelineRunStats {
    pub(crate) attempted: usize,
    pub(crate) successful: usize,
    pub(crate) failed: usize,
    pub(crate) skipped: usize,
    pub(crate) records_written: usize,
    pub(crate) research_fallbacks: usize,
    pub(crate) structuring_fallbacks: usize,
    pub(crate) trending_fallbacks: usize,
    pub(crate) trending_written: usize,
    pub(crate) trending_failures: usize,
    pub(crate) per_location: BTreeMap<String, OutcomeCounts>,
    pub(crate) per_interest: BTreeMap<String, OutcomeCounts>,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) finished_at: Option<DateTime<Utc>>,
}

impl PipelineRunStats {
    pub(crate) fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            attempted: 0,
            successful: 0,
            failed: 0,
            skipped: 0,
            records_written: 0,
            research_fallbacks: 0,
            structuring_fallbacks: 0,
            trending_fallbacks: 0,
            trending_written: 0,
            trending_failures: 0,
            per_location: BTreeMap::new(),
            per_interest: BTreeMap::new(),
            started_at,
            finished_at: None,
        }
    }

    pub(crate) fn record(&mut self, key: &CombinationKey, outcome: CombinationOutcome) {
        self.attempted += 1;
        match outcome {
            CombinationOutcome::Successful => self.successful += 1,
            CombinationOutcome::Failed => self.failed += 1,
            CombinationOutcome::Skipped => self.skipped += 1,
        }
        self.per_location
            .entry(key.location.clone())
            .or_default()
            .bump(outcome);
        self.per_interest
            .entry(key.interest.clone())
            .or_default()
            .bump(outcome);
    }

    pub(crate) fn finish(&mut self, finished_at: DateTime<Utc>) {
        self.finished_at = Some(finished_at);
    }

    pub(crate) fn duration_ms(&self) -> i64 {
        self.finished_at
            .map(|finished_at| (finished_at - self.started_at).num_milliseconds().max(0))
            .unwrap_or(0)
    }

    pub(crate) fn success_rate(&self) -> f64 {
        if self.attempted == 0 {
            return 1.0;
        }

        self.successful as f64 / self.attempted as f64
    }
}
