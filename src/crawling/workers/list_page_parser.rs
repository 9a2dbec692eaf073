//! # List Page Parser Worker
//!
//! Extracts product entries from fetched listing pages and queues them as
//! product records. Detail URLs seen on several pages are stored once.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::load_document;
use crate::crawling::stage_runner::{Worker, WorkerError};
use crate::domain::CrawlStage;
use crate::infrastructure::{
    ClaimSpec, ClaimedJob, DocumentStore, JobStore, JobTable, NewProductRecord, SiteProfile,
};

pub struct ListPageParser {
    store: JobStore,
    site: Arc<dyn SiteProfile>,
    documents: DocumentStore,
}

impl ListPageParser {
    pub fn new(store: JobStore, site: Arc<dyn SiteProfile>, documents: DocumentStore) -> Self {
        Self {
            store,
            site,
            documents,
        }
    }
}

#[async_trait]
impl Worker for ListPageParser {
    type Output = Vec<NewProductRecord>;

    fn stage(&self) -> CrawlStage {
        CrawlStage::ListParse
    }

    fn claim_spec(&self) -> ClaimSpec {
        ClaimSpec::parse(JobTable::ListingPages)
    }

    async fn process(&self, job: &ClaimedJob) -> Result<Vec<NewProductRecord>, WorkerError> {
        let document = load_document(&self.documents, job).await?;
        let items = self.site.extract_listing(&document)?;
        if items.is_empty() {
            return Err(WorkerError::EmptyExtraction);
        }

        Ok(items
            .into_iter()
            .map(|item| NewProductRecord {
                product_url: item.url,
                listing_title: item.display_name,
            })
            .collect())
    }

    async fn record_success(&self, job: &ClaimedJob, records: Vec<NewProductRecord>) -> Result<(), WorkerError> {
        let without_url = records.iter().filter(|r| r.product_url.is_none()).count();
        let outcome = self.store.complete_listing_parse(job.id, &records).await?;
        info!(
            job_id = job.id,
            found = records.len(),
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            rejected = outcome.rejected,
            without_url,
            "Queued product records"
        );
        Ok(())
    }
}
