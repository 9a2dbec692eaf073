//! # Product Detail Parser Worker
//!
//! Extracts product attributes from fetched detail pages. A missing document
//! or an extractor that finds no product is a parse failure; the row itself
//! is never removed.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::load_document;
use crate::crawling::stage_runner::{Worker, WorkerError};
use crate::domain::{CrawlStage, ProductDetail};
use crate::infrastructure::{ClaimSpec, ClaimedJob, DocumentStore, JobStore, JobTable, SiteProfile};

pub struct ProductDetailParser {
    store: JobStore,
    site: Arc<dyn SiteProfile>,
    documents: DocumentStore,
}

impl ProductDetailParser {
    pub fn new(store: JobStore, site: Arc<dyn SiteProfile>, documents: DocumentStore) -> Self {
        Self {
            store,
            site,
            documents,
        }
    }
}

#[async_trait]
impl Worker for ProductDetailParser {
    type Output = ProductDetail;

    fn stage(&self) -> CrawlStage {
        CrawlStage::DetailParse
    }

    fn claim_spec(&self) -> ClaimSpec {
        ClaimSpec::parse(JobTable::ProductRecords)
    }

    async fn process(&self, job: &ClaimedJob) -> Result<ProductDetail, WorkerError> {
        let document = load_document(&self.documents, job).await?;
        self.site
            .extract_detail(&document)?
            .ok_or(WorkerError::EmptyExtraction)
    }

    async fn record_success(&self, job: &ClaimedJob, detail: ProductDetail) -> Result<(), WorkerError> {
        self.store.complete_product_parse(job.id, &detail).await?;
        debug!(job_id = job.id, name = %detail.name, price = ?detail.price, "Stored product attributes");
        Ok(())
    }
}
