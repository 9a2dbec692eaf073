//! Catalog Harvester - incremental crawler for paginated product catalogs
//!
//! Listing pages and product detail pages are tracked as rows in a SQLite
//! job store and move through five resumable stages: seed, list-fetch,
//! list-parse, detail-fetch and detail-parse. Every stage can be killed and
//! rerun at any point without losing or duplicating work.

// Module declarations
pub mod crawling;
pub mod domain;
pub mod infrastructure;

pub use crawling::{PipelineError, PipelineOrchestrator, PipelineReport, PipelineSettings};
pub use domain::{CrawlStage, StageSelection};
