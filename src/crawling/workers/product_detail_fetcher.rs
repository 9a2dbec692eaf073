//! # Product Detail Fetcher Worker
//!
//! Renders pending product detail pages. Records without a URL fail as
//! unfetchable before any request is made.

use std::sync::Arc;

use async_trait::async_trait;

use super::{publish_document, render_job};
use crate::crawling::stage_runner::{Worker, WorkerError};
use crate::domain::CrawlStage;
use crate::infrastructure::{
    ClaimSpec, ClaimedJob, DocumentStore, JobStore, JobTable, Renderer, RendererConfig, SiteProfile,
};

pub struct ProductDetailFetcher {
    store: JobStore,
    renderer: Arc<dyn Renderer>,
    site: Arc<dyn SiteProfile>,
    documents: DocumentStore,
    config: RendererConfig,
}

impl ProductDetailFetcher {
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
impl Worker for ProductDetailFetcher {
    type Output = String;

    fn stage(&self) -> CrawlStage {
        CrawlStage::DetailFetch
    }

    fn claim_spec(&self) -> ClaimSpec {
        ClaimSpec::fetch(JobTable::ProductRecords)
    }

    async fn process(&self, job: &ClaimedJob) -> Result<String, WorkerError> {
        render_job(
            self.renderer.as_ref(),
            &self.config,
            job,
            self.site.detail_ready_selector(),
        )
        .await
    }

    async fn record_success(&self, job: &ClaimedJob, document: String) -> Result<(), WorkerError> {
        publish_document(&self.store, &self.documents, JobTable::ProductRecords, job, &document).await
    }
}
