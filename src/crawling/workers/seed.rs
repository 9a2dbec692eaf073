//! # Seeder
//!
//! Generates the listing page URLs for a run and inserts them as pending
//! rows. Existing rows are left untouched, so re-seeding never resets a page
//! that was already fetched or failed.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::crawling::orchestrator::PipelineError;
use crate::crawling::state::StageStats;
use crate::domain::CrawlStage;
use crate::infrastructure::{JobStore, SiteProfile};

pub struct Seeder {
    store: JobStore,
    site: Arc<dyn SiteProfile>,
    pages: u32,
}

impl Seeder {
    pub fn new(store: JobStore, site: Arc<dyn SiteProfile>, pages: u32) -> Self {
        Self { store, site, pages }
    }

    /// Listing page URLs for pages `1..=pages`
    pub fn listing_urls(&self, base_url: &str) -> Vec<String> {
        (1..=self.pages)
            .map(|page| self.site.build_pagination_url(base_url, page))
            .collect()
    }

    /// Inserts the listing pages derived from `base_url`. Insert errors are
    /// logged and the next page is attempted.
    pub async fn run(&self, base_url: &str, cancel: &CancellationToken) -> Result<StageStats, PipelineError> {
        let mut stats = StageStats::default();

        for url in self.listing_urls(base_url) {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled {
                    stage: CrawlStage::Seed,
                });
            }
            stats.claimed += 1;

            match self.store.insert_listing_if_absent(&url).await {
                Ok(true) => {
                    stats.succeeded += 1;
                    debug!(url = %url, "Queued listing page");
                }
                Ok(false) => debug!(url = %url, "Listing page already known"),
                Err(e) => {
                    stats.failed += 1;
                    warn!(url = %url, error = %format!("{e:#}"), "Failed to queue listing page");
                }
            }
        }

        info!(
            generated = stats.claimed,
            inserted = stats.succeeded,
            failed = stats.failed,
            "Seeding finished"
        );
        Ok(stats)
    }
}
