//! # Pipeline Orchestrator
//!
//! Runs the selected stages in pipeline order, each one to exhaustion before
//! the next starts. Pagination discovery happens before any stage so that a
//! discovery failure leaves the job store untouched.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, Instrument};
use url::Url;

use crate::crawling::pacing::PacingController;
use crate::crawling::stage_runner::StageRunner;
use crate::crawling::state::{PipelineReport, StageStats};
use crate::crawling::workers::{ListPageFetcher, ListPageParser, ProductDetailFetcher, ProductDetailParser, Seeder};
use crate::domain::{CrawlStage, StageSelection};
use crate::infrastructure::{
    AppConfig, ConfigError, DocumentStore, JobStore, PacingConfig, PaginationMode, RenderRequest, Renderer,
    RendererConfig, SiteProfile,
};

/// Errors that end a run
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Pagination discovery failed for {seed_url}: {reason}")]
    Discovery { seed_url: String, reason: String },

    #[error("Job store failure during {stage}: {error:#}")]
    Store { stage: CrawlStage, error: anyhow::Error },

    #[error("Run cancelled during {stage}")]
    Cancelled { stage: CrawlStage },
}

impl PipelineError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Run parameters taken from the application configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub pages_to_crawl: u32,
    pub renderer: RendererConfig,
    pub pacing: PacingConfig,
}

impl From<&AppConfig> for PipelineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            pages_to_crawl: config.pages_to_crawl,
            renderer: config.renderer.clone(),
            pacing: config.pacing.clone(),
        }
    }
}

pub struct PipelineOrchestrator {
    store: JobStore,
    site: Arc<dyn SiteProfile>,
    renderer: Arc<dyn Renderer>,
    listing_documents: DocumentStore,
    detail_documents: DocumentStore,
    settings: PipelineSettings,
    cancel: CancellationToken,
}

impl PipelineOrchestrator {
    pub fn new(
        store: JobStore,
        site: Arc<dyn SiteProfile>,
        renderer: Arc<dyn Renderer>,
        listing_documents: DocumentStore,
        detail_documents: DocumentStore,
        settings: PipelineSettings,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            site,
            renderer,
            listing_documents,
            detail_documents,
            settings,
            cancel,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs every selected stage in order
    pub async fn run(&self, selection: &StageSelection) -> Result<PipelineReport, PipelineError> {
        let mut report = PipelineReport::new();
        let stages: Vec<_> = selection.stages().map(CrawlStage::as_str).collect();
        info!(site = self.site.name(), stages = ?stages, "Starting pipeline run");

        let base_url = if selection.contains(CrawlStage::Seed) {
            Some(self.resolve_pagination_base().await?)
        } else {
            None
        };

        for stage in selection.stages() {
            let span = info_span!("stage", stage = %stage);
            let stats = self
                .run_stage(stage, base_url.as_deref())
                .instrument(span)
                .await?;
            report.record(stage, stats);
        }

        report.finish();
        for (stage, stats) in &report.stages {
            info!(stage = %stage, %stats, "Stage summary");
        }
        info!(elapsed = ?report.elapsed(), "Pipeline run complete");
        Ok(report)
    }

    /// Base URL that listing page URLs are computed from. Dynamic sites
    /// render their seed page once for this; failure is fatal.
    pub async fn resolve_pagination_base(&self) -> Result<String, PipelineError> {
        let (seed_url, discover) = match self.site.pagination() {
            PaginationMode::Static { base_url } => return Ok(base_url),
            PaginationMode::Dynamic { seed_url, discover } => (seed_url, discover),
        };

        info!(seed_url = %seed_url, "Discovering pagination base from seed page");
        let discovery_failed = |reason: String| PipelineError::Discovery {
            seed_url: seed_url.clone(),
            reason,
        };

        let request = RenderRequest::new(&seed_url, self.site.listing_ready_selector(), &self.settings.renderer);
        let rendered = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return Err(PipelineError::Cancelled { stage: CrawlStage::Seed }),
            rendered = self.renderer.render(&request) => rendered,
        };
        let document = rendered.map_err(|e| discovery_failed(e.to_string()))?;

        let href = discover(&document).ok_or_else(|| discovery_failed("seed page has no next-page link".to_string()))?;
        let base_url = Url::parse(&seed_url)
            .and_then(|seed| seed.join(&href))
            .map(String::from)
            .map_err(|e| discovery_failed(format!("unusable next-page link '{href}': {e}")))?;

        info!(base_url = %base_url, "Pagination base discovered");
        Ok(base_url)
    }

    async fn run_stage(&self, stage: CrawlStage, base_url: Option<&str>) -> Result<StageStats, PipelineError> {
        info!("Stage started");
        match stage {
            CrawlStage::Seed => {
                let base_url = base_url.ok_or_else(|| {
                    PipelineError::Configuration(ConfigError::Invalid("seeding requires a pagination base".to_string()))
                })?;
                Seeder::new(self.store.clone(), self.site.clone(), self.settings.pages_to_crawl)
                    .run(base_url, &self.cancel)
                    .await
            }
            CrawlStage::ListFetch => {
                let worker = ListPageFetcher::new(
                    self.store.clone(),
                    self.renderer.clone(),
                    self.site.clone(),
                    self.listing_documents.clone(),
                    self.settings.renderer.clone(),
                );
                self.runner(true).run(&worker).await
            }
            CrawlStage::ListParse => {
                let worker = ListPageParser::new(self.store.clone(), self.site.clone(), self.listing_documents.clone());
                self.runner(false).run(&worker).await
            }
            CrawlStage::DetailFetch => {
                let worker = ProductDetailFetcher::new(
                    self.store.clone(),
                    self.renderer.clone(),
                    self.site.clone(),
                    self.detail_documents.clone(),
                    self.settings.renderer.clone(),
                );
                self.runner(true).run(&worker).await
            }
            CrawlStage::DetailParse => {
                let worker = ProductDetailParser::new(self.store.clone(), self.site.clone(), self.detail_documents.clone());
                self.runner(false).run(&worker).await
            }
        }
    }

    /// Parse stages never touch the network and run unpaced
    fn runner(&self, paced: bool) -> StageRunner {
        let pacing = if paced {
            PacingController::new(&self.settings.pacing)
        } else {
            PacingController::disabled()
        };
        StageRunner::new(self.store.clone(), self.cancel.clone(), pacing)
    }
}
