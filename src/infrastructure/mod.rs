//! Infrastructure layer: persistence, rendering, site profiles, configuration
//! and logging

pub mod config;
pub mod database_connection;
pub mod document_store;
pub mod job_store;
pub mod logging;
pub mod parsing_error;
pub mod renderer;
pub mod sites;

pub use config::{AppConfig, ConfigError, ConfigManager, LoggingConfig, PacingConfig, RendererConfig};
pub use database_connection::DatabaseConnection;
pub use document_store::{DocumentStore, StagedDocument};
pub use job_store::{
    ClaimSpec, ClaimedJob, InsertOutcome, JobStore, JobTable, NewProductRecord, StatusCount, StatusKind,
    StatusUpdate,
};
pub use logging::{init_logging, LoggingGuard};
pub use parsing_error::{ParsingError, ParsingResult};
pub use renderer::{HttpRenderer, RenderError, RenderRequest, Renderer};
pub use sites::{site_profile, PaginationMode, SiteProfile};
