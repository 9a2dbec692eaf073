//! # Stage workers
//!
//! One worker per pipeline stage. Fetch workers render a page and publish it
//! to a document store; parse workers read a published document back and
//! hand it to the site profile's extractor.

pub mod list_page_fetcher;
pub mod list_page_parser;
pub mod product_detail_fetcher;
pub mod product_detail_parser;
pub mod seed;

pub use list_page_fetcher::ListPageFetcher;
pub use list_page_parser::ListPageParser;
pub use product_detail_fetcher::ProductDetailFetcher;
pub use product_detail_parser::ProductDetailParser;
pub use seed::Seeder;

use tracing::debug;

use crate::crawling::stage_runner::WorkerError;
use crate::infrastructure::{
    ClaimedJob, DocumentStore, JobStore, JobTable, RenderRequest, Renderer, RendererConfig,
};

/// Renders a claimed job's URL; a job without one is unfetchable
async fn render_job(
    renderer: &dyn Renderer,
    config: &RendererConfig,
    job: &ClaimedJob,
    ready_selector: &str,
) -> Result<String, WorkerError> {
    let url = job
        .url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .ok_or(WorkerError::MissingUrl)?;

    let request = RenderRequest::new(url, ready_selector, config);
    let document = renderer.render(&request).await?;
    debug!(job_id = job.id, bytes = document.len(), "Rendered document");
    Ok(document)
}

/// Stages the document, then marks the row fetched and publishes the file
/// in one store transaction
async fn publish_document(
    store: &JobStore,
    documents: &DocumentStore,
    table: JobTable,
    job: &ClaimedJob,
    document: &str,
) -> Result<(), WorkerError> {
    let staged = documents.stage(job.id, document)?;
    let name = staged.name().to_string();
    store
        .complete_fetch(table, job.id, &name, move || staged.publish())
        .await?;
    debug!(job_id = job.id, document = %name, "Stored document");
    Ok(())
}

/// Loads the document a fetched row points at. A missing reference or file
/// is a hard failure for the parse stage.
async fn load_document(documents: &DocumentStore, job: &ClaimedJob) -> Result<String, WorkerError> {
    let name = job
        .document_ref
        .as_deref()
        .ok_or(WorkerError::MissingDocumentRef)?;

    documents
        .read(name)
        .await?
        .ok_or_else(|| WorkerError::MissingDocument(documents.path_of(name).display().to_string()))
}
