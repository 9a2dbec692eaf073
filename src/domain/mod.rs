//! Domain layer: job rows, their status machines and extraction values

pub mod job;
pub mod product;
pub mod stage;

pub use job::{FetchStatus, ListingPage, ParseStatus, ProductRecord, UnknownStatus};
pub use product::{ListingItem, ProductDetail};
pub use stage::{CrawlStage, StageSelection};
