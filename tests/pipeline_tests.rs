//! End-to-end pipeline runs against a scripted renderer and an in-memory store

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use scraper::{Html, Selector};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use catalog_harvester::crawling::{PipelineError, PipelineOrchestrator, PipelineSettings};
use catalog_harvester::domain::{CrawlStage, FetchStatus, ListingItem, ParseStatus, ProductDetail, StageSelection};
use catalog_harvester::infrastructure::{
    ClaimSpec, DatabaseConnection, DocumentStore, JobStore, JobTable, PacingConfig, PaginationMode, ParsingError,
    ParsingResult, RenderError, RenderRequest, Renderer, RendererConfig, SiteProfile,
};

const BASE_URL: &str = "https://shop.test/catalog";

/// Catalog with `<li class="item">` listing entries and `<h1>` detail titles
struct TestShop {
    dynamic: bool,
}

fn discover_next_link(document: &str) -> Option<String> {
    let html = Html::parse_document(document);
    let selector = Selector::parse("a.next").ok()?;
    html.select(&selector)
        .next()
        .and_then(|link| link.value().attr("href"))
        .map(str::to_string)
}

impl SiteProfile for TestShop {
    fn name(&self) -> &'static str {
        "test-shop"
    }

    fn seed_url(&self) -> &str {
        BASE_URL
    }

    fn pagination(&self) -> PaginationMode {
        if self.dynamic {
            PaginationMode::Dynamic {
                seed_url: BASE_URL.to_string(),
                discover: discover_next_link,
            }
        } else {
            PaginationMode::Static {
                base_url: BASE_URL.to_string(),
            }
        }
    }

    fn build_pagination_url(&self, base: &str, page: u32) -> String {
        format!("{base}?page={page}")
    }

    fn listing_ready_selector(&self) -> &str {
        "li.item"
    }

    fn detail_ready_selector(&self) -> &str {
        "h1"
    }

    fn extract_listing(&self, document: &str) -> ParsingResult<Vec<ListingItem>> {
        let html = Html::parse_document(document);
        let item = Selector::parse("li.item").map_err(|e| ParsingError::invalid_selector("li.item", e))?;
        let link = Selector::parse("a").map_err(|e| ParsingError::invalid_selector("a", e))?;

        let items: Vec<_> = html
            .select(&item)
            .map(|entry| {
                let anchor = entry.select(&link).next();
                ListingItem {
                    url: anchor
                        .and_then(|a| a.value().attr("href"))
                        .map(|href| format!("https://shop.test{href}")),
                    display_name: anchor.map(|a| a.text().collect::<String>()),
                    ..ListingItem::default()
                }
            })
            .collect();

        if items.is_empty() {
            return Err(ParsingError::no_products_found(&["li.item"]));
        }
        Ok(items)
    }

    fn extract_detail(&self, document: &str) -> ParsingResult<Option<ProductDetail>> {
        let html = Html::parse_document(document);
        let title = Selector::parse("h1").map_err(|e| ParsingError::invalid_selector("h1", e))?;
        Ok(html.select(&title).next().map(|h1| {
            let mut detail = ProductDetail::new(h1.text().collect::<String>());
            detail.price = h1.value().attr("data-price").and_then(|p| p.parse().ok());
            detail
        }))
    }
}

/// Serves canned documents by URL; unknown URLs never become ready
#[derive(Default)]
struct ScriptedRenderer {
    pages: HashMap<String, String>,
    failing: HashMap<String, RenderError>,
    /// Rendering this URL cancels the run and then hangs
    cancel_on: Option<(String, CancellationToken)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRenderer {
    fn page(mut self, url: &str, body: &str) -> Self {
        self.pages.insert(url.to_string(), body.to_string());
        self
    }

    fn failing(mut self, url: &str) -> Self {
        let error = RenderError::HttpStatus {
            url: url.to_string(),
            status: 503,
        };
        self.failing.insert(url.to_string(), error);
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn render(&self, request: &RenderRequest) -> Result<String, RenderError> {
        self.calls.lock().unwrap().push(request.url.clone());

        if let Some((url, token)) = &self.cancel_on {
            if *url == request.url {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }
        if let Some(error) = self.failing.get(&request.url) {
            return Err(error.clone());
        }
        self.pages
            .get(&request.url)
            .cloned()
            .ok_or_else(|| RenderError::NotReady {
                url: request.url.clone(),
                selector: request.ready_selector.clone(),
            })
    }
}

fn listing_url(page: u32) -> String {
    format!("{BASE_URL}?page={page}")
}

fn listing_body(entries: &[Option<&str>]) -> String {
    let items: String = entries
        .iter()
        .map(|entry| match entry {
            Some(slug) => format!(r#"<li class="item"><a href="/p/{slug}">{slug}</a></li>"#),
            None => r#"<li class="item"><span>sponsored</span></li>"#.to_string(),
        })
        .collect();
    format!("<html><body><ul>{items}</ul></body></html>")
}

fn detail_url(slug: &str) -> String {
    format!("https://shop.test/p/{slug}")
}

fn detail_body(slug: &str) -> String {
    format!(r#"<html><body><h1 data-price="10.5">Product {slug}</h1></body></html>"#)
}

/// Two listing pages sharing product "b"; page 2 also has an entry without a link
fn catalog() -> ScriptedRenderer {
    ScriptedRenderer::default()
        .page(&listing_url(1), &listing_body(&[Some("a"), Some("b")]))
        .page(&listing_url(2), &listing_body(&[Some("b"), Some("c"), None]))
        .page(&detail_url("a"), &detail_body("a"))
        .page(&detail_url("b"), &detail_body("b"))
        .page(&detail_url("c"), &detail_body("c"))
}

struct Harness {
    _dir: TempDir,
    _db: DatabaseConnection,
    store: JobStore,
    listings: DocumentStore,
    details: DocumentStore,
}

impl Harness {
    async fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let db = DatabaseConnection::in_memory().await?;
        let store = JobStore::new(db.pool().clone());
        let listings = DocumentStore::open(dir.path().join("listings"), "listing")?;
        let details = DocumentStore::open(dir.path().join("products"), "product")?;
        Ok(Self {
            _dir: dir,
            _db: db,
            store,
            listings,
            details,
        })
    }

    fn orchestrator(
        &self,
        renderer: Arc<ScriptedRenderer>,
        site: TestShop,
        pages: u32,
        cancel: CancellationToken,
    ) -> PipelineOrchestrator {
        let settings = PipelineSettings {
            pages_to_crawl: pages,
            renderer: RendererConfig::default(),
            pacing: PacingConfig::disabled(),
        };
        PipelineOrchestrator::new(
            self.store.clone(),
            Arc::new(site),
            renderer,
            self.listings.clone(),
            self.details.clone(),
            settings,
            cancel,
        )
    }

    async fn run(
        &self,
        renderer: Arc<ScriptedRenderer>,
        pages: u32,
        selection: &StageSelection,
    ) -> Result<catalog_harvester::PipelineReport, PipelineError> {
        self.orchestrator(renderer, TestShop { dynamic: false }, pages, CancellationToken::new())
            .run(selection)
            .await
    }

    /// (url, fetch status, parse status, name) for every product row, in id order
    async fn product_states(&self) -> anyhow::Result<Vec<(Option<String>, FetchStatus, Option<ParseStatus>, Option<String>)>> {
        Ok(self
            .store
            .products()
            .await?
            .into_iter()
            .map(|p| (p.product_url, p.fetch_status, p.parse_status, p.name))
            .collect())
    }
}

#[tokio::test]
async fn test_full_run_deduplicates_products_across_listing_pages() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let report = harness.run(Arc::new(catalog()), 2, &StageSelection::all()).await?;

    let listings = harness.store.listings().await?;
    assert_eq!(listings.len(), 2);
    for listing in &listings {
        assert_eq!(listing.fetch_status, FetchStatus::Fetched);
        assert_eq!(listing.parse_status, Some(ParseStatus::ParsedSucceeded));
        assert!(listing.captured_at.is_some());
        let name = listing.document_ref.as_deref().unwrap();
        assert!(harness.listings.path_of(name).exists());
    }

    let products = harness.store.products().await?;
    let urls: Vec<_> = products.iter().map(|p| p.product_url.clone()).collect();
    assert_eq!(
        urls,
        vec![Some(detail_url("a")), Some(detail_url("b")), Some(detail_url("c")), None]
    );

    for product in products.iter().filter(|p| p.product_url.is_some()) {
        assert_eq!(product.fetch_status, FetchStatus::Fetched);
        assert_eq!(product.parse_status, Some(ParseStatus::ParsedSucceeded));
        assert_eq!(product.price, Some(10.5));
        assert!(product.name.as_deref().unwrap().starts_with("Product "));
        assert!(product.parsed_at.is_some());
    }

    let linkless = &products[3];
    assert_eq!(linkless.fetch_status, FetchStatus::FailedUnfetchable);
    assert_eq!(linkless.parse_status, None);
    assert_eq!(linkless.name, None);

    let detail_fetch = report.stage(CrawlStage::DetailFetch).unwrap();
    assert_eq!(detail_fetch.succeeded, 3);
    assert_eq!(detail_fetch.unfetchable, 1);
    Ok(())
}

#[tokio::test]
async fn test_failed_listing_page_does_not_block_the_rest() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let renderer = ScriptedRenderer::default()
        .page(&listing_url(1), &listing_body(&[Some("a")]))
        .failing(&listing_url(2))
        .page(&listing_url(3), &listing_body(&[Some("c")]))
        .page(&detail_url("a"), &detail_body("a"))
        .page(&detail_url("c"), &detail_body("c"));

    let report = harness.run(Arc::new(renderer), 3, &StageSelection::all()).await?;

    let states: Vec<_> = harness
        .store
        .listings()
        .await?
        .into_iter()
        .map(|l| (l.fetch_status, l.parse_status, l.document_ref.is_some()))
        .collect();
    assert_eq!(
        states,
        vec![
            (FetchStatus::Fetched, Some(ParseStatus::ParsedSucceeded), true),
            (FetchStatus::Failed, None, false),
            (FetchStatus::Fetched, Some(ParseStatus::ParsedSucceeded), true),
        ]
    );

    let list_fetch = report.stage(CrawlStage::ListFetch).unwrap();
    assert_eq!(list_fetch.succeeded, 2);
    assert_eq!(list_fetch.failed, 1);

    let products = harness.product_states().await?;
    assert_eq!(products.len(), 2);
    assert!(products
        .iter()
        .all(|(_, fetch, parse, _)| *fetch == FetchStatus::Fetched && *parse == Some(ParseStatus::ParsedSucceeded)));
    Ok(())
}

#[tokio::test]
async fn test_failed_rows_are_not_retried_on_rerun() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let renderer = Arc::new(
        ScriptedRenderer::default()
            .page(&listing_url(1), &listing_body(&[Some("a")]))
            .failing(&listing_url(2)),
    );
    let fetch_only = StageSelection::only(&[CrawlStage::Seed, CrawlStage::ListFetch]);

    harness.run(renderer.clone(), 2, &fetch_only).await?;
    harness.run(renderer.clone(), 2, &fetch_only).await?;

    let fetches_of_page_two = renderer.calls().iter().filter(|url| **url == listing_url(2)).count();
    assert_eq!(fetches_of_page_two, 1);

    let moved = harness
        .store
        .requeue_failed(ClaimSpec::fetch(JobTable::ListingPages), false)
        .await?;
    assert_eq!(moved, 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_document_fails_parse_and_keeps_row() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let renderer = Arc::new(catalog());
    let mut up_to_detail_fetch = StageSelection::all();
    up_to_detail_fetch.skip(CrawlStage::DetailParse);
    harness.run(renderer.clone(), 2, &up_to_detail_fetch).await?;

    let victim = harness.store.get_product(2).await?.unwrap();
    std::fs::remove_file(harness.details.path_of(victim.document_ref.as_deref().unwrap()))?;

    let report = harness
        .run(renderer, 2, &StageSelection::only(&[CrawlStage::DetailParse]))
        .await?;

    let victim = harness.store.get_product(2).await?.unwrap();
    assert_eq!(victim.fetch_status, FetchStatus::Fetched);
    assert_eq!(victim.parse_status, Some(ParseStatus::ParsingFailed));
    assert_eq!(victim.name, None);

    let detail_parse = report.stage(CrawlStage::DetailParse).unwrap();
    assert_eq!(detail_parse.succeeded, 2);
    assert_eq!(detail_parse.failed, 1);
    assert_eq!(harness.store.products().await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_resumed_run_matches_uninterrupted_run() -> anyhow::Result<()> {
    let uninterrupted = Harness::new().await?;
    uninterrupted.run(Arc::new(catalog()), 2, &StageSelection::all()).await?;

    let resumed = Harness::new().await?;
    let renderer = Arc::new(catalog());
    let listing_stages = StageSelection::only(&[CrawlStage::Seed, CrawlStage::ListFetch, CrawlStage::ListParse]);
    resumed.run(renderer.clone(), 2, &listing_stages).await?;

    // Killed while the first detail page was being fetched
    resumed
        .store
        .claim_one(ClaimSpec::fetch(JobTable::ProductRecords))
        .await?
        .unwrap();
    assert_eq!(resumed.store.products().await?[0].fetch_status, FetchStatus::Fetching);

    resumed.run(renderer, 2, &StageSelection::all()).await?;

    assert_eq!(resumed.product_states().await?, uninterrupted.product_states().await?);
    let statuses: Vec<_> = resumed
        .store
        .listings()
        .await?
        .into_iter()
        .map(|l| (l.fetch_status, l.parse_status))
        .collect();
    assert_eq!(
        statuses,
        vec![(FetchStatus::Fetched, Some(ParseStatus::ParsedSucceeded)); 2]
    );
    Ok(())
}

#[tokio::test]
async fn test_recovered_list_parse_creates_each_entry_once() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let renderer = Arc::new(catalog());
    harness
        .run(renderer.clone(), 2, &StageSelection::only(&[CrawlStage::Seed, CrawlStage::ListFetch]))
        .await?;

    harness
        .store
        .claim_one(ClaimSpec::parse(JobTable::ListingPages))
        .await?
        .unwrap();
    harness
        .run(renderer, 2, &StageSelection::only(&[CrawlStage::ListParse]))
        .await?;

    let linkless = harness
        .store
        .products()
        .await?
        .into_iter()
        .filter(|p| p.product_url.is_none())
        .count();
    assert_eq!(linkless, 1);
    assert_eq!(harness.store.products().await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_cancellation_returns_claimed_row_to_pending() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let cancel = CancellationToken::new();
    let mut renderer = catalog();
    renderer.cancel_on = Some((listing_url(2), cancel.clone()));

    let result = harness
        .orchestrator(Arc::new(renderer), TestShop { dynamic: false }, 2, cancel)
        .run(&StageSelection::all())
        .await;
    assert!(matches!(result, Err(PipelineError::Cancelled { stage: CrawlStage::ListFetch })));

    let statuses: Vec<_> = harness.store.listings().await?.into_iter().map(|l| l.fetch_status).collect();
    assert_eq!(statuses, vec![FetchStatus::Fetched, FetchStatus::Pending]);
    assert!(harness.store.products().await?.is_empty());

    harness.run(Arc::new(catalog()), 2, &StageSelection::all()).await?;
    assert_eq!(harness.store.products().await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn test_discovery_failure_leaves_store_empty() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let renderer = ScriptedRenderer::default().page(BASE_URL, &listing_body(&[Some("a")]));

    let result = harness
        .orchestrator(Arc::new(renderer), TestShop { dynamic: true }, 2, CancellationToken::new())
        .run(&StageSelection::all())
        .await;

    assert!(matches!(result, Err(PipelineError::Discovery { .. })));
    assert!(harness.store.listings().await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_discovered_base_drives_seeding() -> anyhow::Result<()> {
    let harness = Harness::new().await?;
    let seed = r#"<html><body><li class="item"></li><a class="next" href="/catalog/all">next</a></body></html>"#;
    let renderer = ScriptedRenderer::default().page(BASE_URL, seed);

    harness
        .orchestrator(Arc::new(renderer), TestShop { dynamic: true }, 2, CancellationToken::new())
        .run(&StageSelection::only(&[CrawlStage::Seed]))
        .await?;

    let urls: Vec<_> = harness.store.listings().await?.into_iter().map(|l| l.url).collect();
    assert_eq!(
        urls,
        vec![
            "https://shop.test/catalog/all?page=1".to_string(),
            "https://shop.test/catalog/all?page=2".to_string(),
        ]
    );
    Ok(())
}
