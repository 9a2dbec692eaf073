//! # List Page Fetcher Worker
//!
//! Renders pending listing pages and stores them as documents.

use std::sync::Arc;

use async_trait::async_trait;

use super::{publish_document, render_job};
use crate::crawling::stage_runner::{Worker, WorkerError};
use crate::domain::CrawlStage;
use crate::infrastructure::{
    ClaimSpec, ClaimedJob, DocumentStore, JobStore, JobTable, Renderer, RendererConfig, SiteProfile,
};

pub struct ListPageFetcher {
    store: JobStore,
    renderer: Arc<dyn Renderer>,
    site: Arc<dyn SiteProfile>,
    documents: DocumentStore,
    config: RendererConfig,
}

impl ListPageFetcher {
    pub fn new(
        store: JobStore,
        renderer: Arc<dyn Renderer>,
        site: Arc<dyn SiteProfile>,
        documents: DocumentStore,
        config: RendererConfig,
    ) -> Self {
        Self {
            store,
            renderer,
            site,
            documents,
            config,
        }
    }
}

#[async_trait]
impl Worker for ListPageFetcher {
    type Output = String;

    fn stage(&self) -> CrawlStage {
        CrawlStage::ListFetch
    }

    fn claim_spec(&self) -> ClaimSpec {
        ClaimSpec::fetch(JobTable::ListingPages)
    }

    async fn process(&self, job: &ClaimedJob) -> Result<String, WorkerError> {
        render_job(
            self.renderer.as_ref(),
            &self.config,
            job,
            self.site.listing_ready_selector(),
        )
        .await
    }

    async fn record_success(&self, job: &ClaimedJob, document: String) -> Result<(), WorkerError> {
        publish_document(&self.store, &self.documents, JobTable::ListingPages, job, &document).await
    }
}
