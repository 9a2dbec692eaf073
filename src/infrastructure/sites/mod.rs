//! Site profiles
//!
//! A profile bundles everything site-specific the pipeline needs: where to
//! start, how to paginate, when a page counts as rendered and how to pull
//! fields out of it. Profiles are selected by name when the pipeline starts.

pub mod amazon;
pub mod mercadolibre;

use std::sync::Arc;

use scraper::{ElementRef, Selector};

use crate::domain::{ListingItem, ProductDetail};
use crate::infrastructure::config::ConfigError;
use crate::infrastructure::parsing_error::{ParsingError, ParsingResult};

pub use amazon::Amazon;
pub use mercadolibre::MercadoLibre;

/// Finds the canonical pagination base in a rendered seed page
pub type DiscoverFn = fn(&str) -> Option<String>;

/// How listing page URLs are derived
#[derive(Debug, Clone)]
pub enum PaginationMode {
    /// Page URLs are computed directly from `base_url`
    Static { base_url: String },
    /// `seed_url` must be rendered once and passed to `discover`, which
    /// yields the base URL for computed pagination
    Dynamic {
        seed_url: String,
        discover: DiscoverFn,
    },
}

pub trait SiteProfile: Send + Sync {
    fn name(&self) -> &'static str;

    fn seed_url(&self) -> &str;

    fn pagination(&self) -> PaginationMode;

    /// URL of listing page `page` (1-based) given the pagination base
    fn build_pagination_url(&self, base: &str, page: u32) -> String;

    fn listing_ready_selector(&self) -> &str;

    fn detail_ready_selector(&self) -> &str;

    /// Entries of a listing page. A page with no recognisable entries is an
    /// error.
    fn extract_listing(&self, document: &str) -> ParsingResult<Vec<ListingItem>>;

    /// Attributes of a detail page; `None` when the page holds no product
    fn extract_detail(&self, document: &str) -> ParsingResult<Option<ProductDetail>>;
}

pub const SUPPORTED_SITES: [&str; 2] = [mercadolibre::NAME, amazon::NAME];

/// Looks up a site profile by name. `seed_url` overrides the profile's
/// built-in starting point.
pub fn site_profile(name: &str, seed_url: Option<&str>) -> Result<Arc<dyn SiteProfile>, ConfigError> {
    let profile: Arc<dyn SiteProfile> = match name.trim().to_ascii_lowercase().as_str() {
        mercadolibre::NAME => Arc::new(MercadoLibre::new(seed_url).map_err(invalid_profile)?),
        amazon::NAME => Arc::new(Amazon::new(seed_url).map_err(invalid_profile)?),
        _ => {
            return Err(ConfigError::UnknownSite {
                name: name.to_string(),
                supported: SUPPORTED_SITES.to_vec(),
            })
        }
    };
    Ok(profile)
}

fn invalid_profile(error: ParsingError) -> ConfigError {
    ConfigError::Invalid(format!("site profile could not be built: {error}"))
}

pub(crate) fn selector(css: &str) -> ParsingResult<Selector> {
    Selector::parse(css).map_err(|e| ParsingError::invalid_selector(css, e))
}

pub(crate) fn pattern(re: &str) -> ParsingResult<regex::Regex> {
    regex::Regex::new(re).map_err(|e| ParsingError::invalid_selector(re, e))
}

/// Text content with whitespace collapsed
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element.text().flat_map(str::split_whitespace).collect::<Vec<_>>().join(" ")
}

/// Text of the first non-empty match inside `scope`
pub(crate) fn first_text(scope: ElementRef<'_>, selector: &Selector) -> Option<String> {
    scope
        .select(selector)
        .map(element_text)
        .find(|text| !text.is_empty())
}

/// Lazy-loaded images keep the real URL in `data-src`; inline placeholders
/// are ignored
pub(crate) fn image_source(img: ElementRef<'_>) -> Option<String> {
    let value = img.value();
    value
        .attr("data-src")
        .filter(|src| !src.is_empty())
        .or_else(|| value.attr("src").filter(|src| !src.is_empty() && !src.starts_with("data:image")))
        .map(ToString::to_string)
}

/// Parses a displayed price, dropping `thousands` separators and treating
/// `decimal` as the decimal point
pub(crate) fn parse_price(raw: &str, thousands: char, decimal: char) -> ParsingResult<f64> {
    let normalised: String = raw
        .trim()
        .trim_end_matches(decimal)
        .chars()
        .filter(|c| *c != thousands && !c.is_whitespace())
        .map(|c| if c == decimal { '.' } else { c })
        .collect();

    normalised
        .parse::<f64>()
        .map_err(|_| ParsingError::invalid_number("price", raw))
}
