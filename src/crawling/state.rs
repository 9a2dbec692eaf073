//! Run statistics

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::CrawlStage;

/// Counters for one stage execution
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StageStats {
    /// Stale in-progress rows returned to pending by the recovery sweep
    pub recovered: u64,
    /// Rows claimed (or, for seeding, URLs generated)
    pub claimed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// Rows that ended in `failed_unfetchable`
    pub unfetchable: u64,
}

impl StageStats {
    pub fn finished(&self) -> u64 {
        self.succeeded + self.failed + self.unfetchable
    }
}

impl fmt::Display for StageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "recovered={} claimed={} succeeded={} failed={} unfetchable={}",
            self.recovered, self.claimed, self.succeeded, self.failed, self.unfetchable
        )
    }
}

/// Summary of a pipeline run, in stage order
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<(CrawlStage, StageStats)>,
}

impl PipelineReport {
    pub fn new() -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
        }
    }

    pub fn record(&mut self, stage: CrawlStage, stats: StageStats) {
        self.stages.push((stage, stats));
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn stage(&self, stage: CrawlStage) -> Option<&StageStats> {
        self.stages
            .iter()
            .find(|(recorded, _)| *recorded == stage)
            .map(|(_, stats)| stats)
    }

    pub fn totals(&self) -> StageStats {
        self.stages.iter().fold(StageStats::default(), |mut acc, (_, stats)| {
            acc.recovered += stats.recovered;
            acc.claimed += stats.claimed;
            acc.succeeded += stats.succeeded;
            acc.failed += stats.failed;
            acc.unfetchable += stats.unfetchable;
            acc
        })
    }

    pub fn elapsed(&self) -> Duration {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).to_std().unwrap_or_default()
    }
}

impl Default for PipelineReport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_totals() {
        let mut report = PipelineReport::new();
        report.record(
            CrawlStage::ListFetch,
            StageStats {
                claimed: 3,
                succeeded: 2,
                failed: 1,
                ..StageStats::default()
            },
        );
        report.record(
            CrawlStage::DetailFetch,
            StageStats {
                recovered: 1,
                claimed: 4,
                succeeded: 3,
                unfetchable: 1,
                ..StageStats::default()
            },
        );
        report.finish();

        let totals = report.totals();
        assert_eq!(totals.claimed, 7);
        assert_eq!(totals.finished(), 7);
        assert_eq!(totals.recovered, 1);
        assert_eq!(report.stage(CrawlStage::DetailFetch).map(|s| s.unfetchable), Some(1));
        assert!(report.stage(CrawlStage::Seed).is_none());
    }
}
