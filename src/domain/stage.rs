//! Pipeline stage identifiers

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The five stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CrawlStage {
    /// Builds paginated listing URLs and inserts them as pending rows
    Seed,
    /// Renders pending listing pages to disk
    ListFetch,
    /// Extracts product links from fetched listing pages
    ListParse,
    /// Renders pending product detail pages to disk
    DetailFetch,
    /// Extracts product attributes from fetched detail pages
    DetailParse,
}

impl CrawlStage {
    pub const ALL: [Self; 5] = [
        Self::Seed,
        Self::ListFetch,
        Self::ListParse,
        Self::DetailFetch,
        Self::DetailParse,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Seed => "seed",
            Self::ListFetch => "list-fetch",
            Self::ListParse => "list-parse",
            Self::DetailFetch => "detail-fetch",
            Self::DetailParse => "detail-parse",
        }
    }

    /// Stages that talk to the network and are therefore paced
    pub const fn is_fetch(self) -> bool {
        matches!(self, Self::ListFetch | Self::DetailFetch)
    }
}

impl fmt::Display for CrawlStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CrawlStage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|stage| stage.as_str() == s)
            .ok_or_else(|| format!("Unknown stage: {s}"))
    }
}

/// Which stages a run should execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSelection {
    enabled: [bool; 5],
}

impl Default for StageSelection {
    fn default() -> Self {
        Self::all()
    }
}

impl StageSelection {
    pub const fn all() -> Self {
        Self { enabled: [true; 5] }
    }

    pub const fn none() -> Self {
        Self { enabled: [false; 5] }
    }

    pub fn only(stages: &[CrawlStage]) -> Self {
        let mut selection = Self::none();
        for stage in stages {
            selection.set(*stage, true);
        }
        selection
    }

    pub fn skip(&mut self, stage: CrawlStage) -> &mut Self {
        self.set(stage, false);
        self
    }

    pub fn set(&mut self, stage: CrawlStage, enabled: bool) {
        self.enabled[stage as usize] = enabled;
    }

    pub fn contains(&self, stage: CrawlStage) -> bool {
        self.enabled[stage as usize]
    }

    pub fn is_empty(&self) -> bool {
        !self.enabled.iter().any(|enabled| *enabled)
    }

    /// Enabled stages in pipeline order
    pub fn stages(&self) -> impl Iterator<Item = CrawlStage> + '_ {
        CrawlStage::ALL
            .into_iter()
            .filter(|stage| self.contains(*stage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_names_round_trip() {
        for stage in CrawlStage::ALL {
            assert_eq!(stage.as_str().parse::<CrawlStage>(), Ok(stage));
        }
        assert!("product-scraper".parse::<CrawlStage>().is_err());
    }

    #[test]
    fn selection_keeps_pipeline_order() {
        let selection = StageSelection::only(&[CrawlStage::DetailParse, CrawlStage::ListFetch]);
        let stages: Vec<_> = selection.stages().collect();
        assert_eq!(stages, vec![CrawlStage::ListFetch, CrawlStage::DetailParse]);
    }

    #[test]
    fn skipping_every_stage_leaves_empty_selection() {
        let mut selection = StageSelection::all();
        for stage in CrawlStage::ALL {
            selection.skip(stage);
        }
        assert!(selection.is_empty());
    }
}
