//! Amazon search results
//!
//! Search pages paginate with a plain `&page=N` query parameter, so no
//! discovery step is needed.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use super::{element_text, first_text, image_source, parse_price, pattern, selector, PaginationMode, SiteProfile};
use crate::domain::{ListingItem, ProductDetail};
use crate::infrastructure::parsing_error::{ParsingError, ParsingResult};

pub const NAME: &str = "amazon";

const SEED_URL: &str = "https://www.amazon.com/s?k=laptop";
const ORIGIN: &str = "https://www.amazon.com/";

const CONTAINER: &str = r#"div[data-component-type="s-search-result"]"#;
const PRICE_WHOLE: &str = "span.a-price-whole";
const DETAIL_TITLE: &str = "#productTitle";

pub struct Amazon {
    seed_url: String,
    origin: Url,
    container: Selector,
    name: Selector,
    price_whole: Selector,
    price_fraction: Selector,
    currency: Selector,
    fallback_price: Selector,
    link: Selector,
    image: Selector,
    detail_name: Selector,
    detail_image: Selector,
    asin_input: Selector,
    review_text: Selector,
    dollar_amount: Regex,
}

impl Amazon {
    pub fn new(seed_url: Option<&str>) -> ParsingResult<Self> {
        let origin = Url::parse(ORIGIN).map_err(|e| ParsingError::invalid_selector(ORIGIN, e))?;
        Ok(Self {
            seed_url: seed_url.unwrap_or(SEED_URL).to_string(),
            origin,
            container: selector(CONTAINER)?,
            name: selector("h2.a-size-medium, h2 span, h2")?,
            price_whole: selector(PRICE_WHOLE)?,
            price_fraction: selector("span.a-price-fraction")?,
            currency: selector("span.a-price-symbol")?,
            fallback_price: selector("span.a-color-base")?,
            link: selector(r#"a.a-link-normal[href*="/dp/"]"#)?,
            image: selector("img.s-image")?,
            detail_name: selector(DETAIL_TITLE)?,
            detail_image: selector("#landingImage, #imgTagWrapperId img")?,
            asin_input: selector("input#ASIN")?,
            review_text: selector("#acrCustomerReviewText")?,
            dollar_amount: pattern(r"\$\s*([\d.,]+)")?,
        })
    }

    /// Displayed price and currency of a result, with a `$ 12.34` text
    /// fallback for results that do not use the structured price markup
    fn listing_price(&self, container: ElementRef<'_>) -> (Option<String>, Option<String>) {
        if let Some(whole) = first_text(container, &self.price_whole) {
            let price = whole.trim_end_matches('.').to_string();
            return (Some(price), first_text(container, &self.currency));
        }

        container
            .select(&self.fallback_price)
            .map(element_text)
            .find_map(|text| {
                self.dollar_amount
                    .captures(&text)
                    .map(|caps| (Some(caps[1].to_string()), Some("$".to_string())))
            })
            .unwrap_or((None, None))
    }

    fn absolute(&self, href: &str) -> Option<String> {
        self.origin.join(href.trim()).ok().map(String::from)
    }
}

impl SiteProfile for Amazon {
    fn name(&self) -> &'static str {
        NAME
    }

    fn seed_url(&self) -> &str {
        &self.seed_url
    }

    fn pagination(&self) -> PaginationMode {
        PaginationMode::Static {
            base_url: self.seed_url.clone(),
        }
    }

    fn build_pagination_url(&self, base: &str, page: u32) -> String {
        format!("{base}&page={page}")
    }

    fn listing_ready_selector(&self) -> &str {
        PRICE_WHOLE
    }

    fn detail_ready_selector(&self) -> &str {
        DETAIL_TITLE
    }

    fn extract_listing(&self, document: &str) -> ParsingResult<Vec<ListingItem>> {
        let html = Html::parse_document(document);

        let items: Vec<ListingItem> = html
            .select(&self.container)
            .map(|container| {
                let (raw_price, currency) = self.listing_price(container);
                ListingItem {
                    url: container
                        .select(&self.link)
                        .next()
                        .and_then(|a| a.value().attr("href"))
                        .and_then(|href| self.absolute(href)),
                    display_name: first_text(container, &self.name),
                    raw_price,
                    currency,
                    image_ref: container.select(&self.image).next().and_then(image_source),
                }
            })
            .collect();

        if items.is_empty() {
            return Err(ParsingError::no_products_found(&[CONTAINER]));
        }
        Ok(items)
    }

    fn extract_detail(&self, document: &str) -> ParsingResult<Option<ProductDetail>> {
        let html = Html::parse_document(document);
        let root = html.root_element();

        let Some(name) = first_text(root, &self.detail_name) else {
            return Ok(None);
        };

        let mut detail = ProductDetail::new(name);
        if let Some(whole) = first_text(root, &self.price_whole) {
            let fraction = first_text(root, &self.price_fraction).unwrap_or_default();
            let raw = format!("{}.{fraction}", whole.trim_end_matches('.'));
            detail.price = Some(parse_price(&raw, ',', '.')?);
            detail.currency = first_text(root, &self.currency);
        }
        detail.code = html
            .select(&self.asin_input)
            .next()
            .and_then(|input| input.value().attr("value"))
            .map(str::trim)
            .filter(|asin| !asin.is_empty())
            .map(ToString::to_string);
        detail.reviews = first_text(root, &self.review_text).and_then(|text| {
            let digits: String = text.chars().take_while(|c| !c.is_whitespace()).filter(char::is_ascii_digit).collect();
            digits.parse().ok()
        });
        detail.image_ref = html.select(&self.detail_image).next().and_then(|img| {
            img.value()
                .attr("data-old-hires")
                .filter(|src| !src.is_empty())
                .map(ToString::to_string)
                .or_else(|| image_source(img))
        });

        Ok(Some(detail))
    }
}
