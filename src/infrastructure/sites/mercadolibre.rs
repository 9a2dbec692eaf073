//! MercadoLibre (Argentina) search results
//!
//! The first search page has no offset in its URL. The canonical paginated
//! form only appears after following the "next" link once, so pagination is
//! discovered from the rendered seed page.

use regex::Regex;
use scraper::{Html, Selector};

use super::{element_text, first_text, image_source, parse_price, pattern, selector, PaginationMode, SiteProfile};
use crate::domain::{ListingItem, ProductDetail};
use crate::infrastructure::parsing_error::{ParsingError, ParsingResult};

pub const NAME: &str = "mercadolibre";

const SEED_URL: &str = "https://listado.mercadolibre.com.ar/boya-natacion-aguas-abiertas";
const ITEMS_PER_PAGE: u32 = 49;
const CURRENCY: &str = "ARS";

const CONTAINER: &str = "li.ui-search-layout__item";
const NEXT_PAGE_LINK: &str = "li.andes-pagination__button--next a";
const DETAIL_TITLE: &str = "h1.ui-pdp-title";

pub struct MercadoLibre {
    seed_url: String,
    container: Selector,
    name: Selector,
    price: Selector,
    link: Selector,
    image: Selector,
    detail_name: Selector,
    hidden_text: Selector,
    product_code: Regex,
    review_count: Regex,
}

impl MercadoLibre {
    pub fn new(seed_url: Option<&str>) -> ParsingResult<Self> {
        Ok(Self {
            seed_url: seed_url.unwrap_or(SEED_URL).to_string(),
            container: selector(CONTAINER)?,
            name: selector("h3.poly-component__title-wrapper")?,
            price: selector("span.andes-money-amount__fraction")?,
            link: selector("a.poly-component__title")?,
            image: selector("img")?,
            detail_name: selector(DETAIL_TITLE)?,
            hidden_text: selector("p.andes-visually-hidden")?,
            product_code: pattern(r"MLA-?(\d+)")?,
            review_count: pattern(r"(?i)(\d[\d.]*)\s+(?:opiniones|opinión|calificaciones|reseñas)")?,
        })
    }

    /// Item code embedded in image and product URLs, e.g. `MLA123456`
    fn code_from(&self, text: &str) -> Option<String> {
        self.product_code
            .captures(text)
            .map(|caps| format!("MLA{}", &caps[1]))
    }

    fn reviews_from(&self, text: &str) -> Option<i64> {
        let caps = self.review_count.captures(text)?;
        caps[1].replace('.', "").parse().ok()
    }
}

/// Sponsored results link through a click tracker instead of the product
fn usable_link(href: &str) -> Option<String> {
    let href = href.trim();
    (!href.is_empty() && !href.starts_with("https://click")).then(|| href.to_string())
}

/// Follows the "next page" link of a rendered first search page
pub fn discover_canonical_base(document: &str) -> Option<String> {
    let next = Selector::parse(NEXT_PAGE_LINK).ok()?;
    let html = Html::parse_document(document);
    let href = html.select(&next).next()?.value().attr("href")?.trim();
    (!href.is_empty()).then(|| href.to_string())
}

impl SiteProfile for MercadoLibre {
    fn name(&self) -> &'static str {
        NAME
    }

    fn seed_url(&self) -> &str {
        &self.seed_url
    }

    fn pagination(&self) -> PaginationMode {
        PaginationMode::Dynamic {
            seed_url: self.seed_url.clone(),
            discover: discover_canonical_base,
        }
    }

    fn build_pagination_url(&self, base: &str, page: u32) -> String {
        let clean_base = base.split("_Desde_").next().unwrap_or(base);
        if page <= 1 {
            return clean_base.to_string();
        }
        let offset = (page - 1) * ITEMS_PER_PAGE;
        format!("{clean_base}_Desde_{offset}_NoIndex_True")
    }

    fn listing_ready_selector(&self) -> &str {
        CONTAINER
    }

    fn detail_ready_selector(&self) -> &str {
        DETAIL_TITLE
    }

    fn extract_listing(&self, document: &str) -> ParsingResult<Vec<ListingItem>> {
        let html = Html::parse_document(document);
        let mut seen_images = std::collections::HashSet::new();

        let items: Vec<ListingItem> = html
            .select(&self.container)
            .map(|container| {
                let image_ref = container
                    .select(&self.image)
                    .next()
                    .and_then(image_source)
                    .filter(|src| seen_images.insert(src.clone()));

                ListingItem {
                    url: container
                        .select(&self.link)
                        .next()
                        .and_then(|a| a.value().attr("href"))
                        .and_then(usable_link),
                    display_name: first_text(container, &self.name),
                    raw_price: first_text(container, &self.price),
                    currency: Some(CURRENCY.to_string()),
                    image_ref,
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
        detail.currency = Some(CURRENCY.to_string());
        detail.price = first_text(root, &self.price)
            .map(|raw| parse_price(&raw, '.', ','))
            .transpose()?;
        detail.image_ref = html.select(&self.image).next().and_then(image_source);
        detail.code = detail.image_ref.as_deref().and_then(|img| self.code_from(img));
        detail.reviews = html
            .select(&self.hidden_text)
            .map(element_text)
            .find_map(|text| self.reviews_from(&text));

        Ok(Some(detail))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const LISTING: &str = r#"
        <ol>
          <li class="ui-search-layout__item">
            <img data-src="https://http2.mlstatic.com/D_Q_NP_2X_872195-MLA52163384571_102022-E.webp" src="data:image/gif;base64,R0l">
            <h3 class="poly-component__title-wrapper"><a class="poly-component__title" href="https://articulo.mercadolibre.com.ar/MLA-1100-boya">Boya   Natación</a></h3>
            <span class="andes-money-amount__fraction">24.999</span>
          </li>
          <li class="ui-search-layout__item">
            <img src="https://http2.mlstatic.com/D_Q_NP_2X_872195-MLA52163384571_102022-E.webp">
            <h3 class="poly-component__title-wrapper"><a class="poly-component__title" href="https://click1.mercadolibre.com.ar/mclics/clicks/external">Boya Pro</a></h3>
          </li>
        </ol>
        <ul><li class="andes-pagination__button andes-pagination__button--next">
          <a href="https://listado.mercadolibre.com.ar/deportes/boya_Desde_50_NoIndex_True">Siguiente</a>
        </li></ul>
    "#;

    const DETAIL: &str = r#"
        <h1 class="ui-pdp-title">Boya De Natación Aguas Abiertas</h1>
        <span class="andes-money-amount__fraction">31.500</span>
        <figure><img data-src="https://http2.mlstatic.com/D_NQ_NP_123-MLA44556677-O.webp"></figure>
        <p class="andes-visually-hidden">Antes: 35.000 pesos</p>
        <p class="andes-visually-hidden">Calificación 4.8 de 5. 1.204 opiniones.</p>
    "#;

    fn profile() -> MercadoLibre {
        MercadoLibre::new(None).unwrap()
    }

    #[rstest]
    #[case(1, "https://listado.mercadolibre.com.ar/boya")]
    #[case(2, "https://listado.mercadolibre.com.ar/boya_Desde_49_NoIndex_True")]
    #[case(4, "https://listado.mercadolibre.com.ar/boya_Desde_147_NoIndex_True")]
    fn test_pagination_strips_existing_offset(#[case] page: u32, #[case] expected: &str) {
        let base = "https://listado.mercadolibre.com.ar/boya_Desde_50_NoIndex_True";
        assert_eq!(profile().build_pagination_url(base, page), expected);
    }

    #[test]
    fn test_discovery_follows_next_link() {
        assert_eq!(
            discover_canonical_base(LISTING).as_deref(),
            Some("https://listado.mercadolibre.com.ar/deportes/boya_Desde_50_NoIndex_True")
        );
        assert_eq!(discover_canonical_base("<p>last page</p>"), None);
    }

    #[test]
    fn test_listing_extraction() {
        let items = profile().extract_listing(LISTING).unwrap();
        assert_eq!(items.len(), 2);

        assert_eq!(
            items[0].url.as_deref(),
            Some("https://articulo.mercadolibre.com.ar/MLA-1100-boya")
        );
        assert_eq!(items[0].display_name.as_deref(), Some("Boya Natación"));
        assert_eq!(items[0].raw_price.as_deref(), Some("24.999"));
        assert_eq!(items[0].currency.as_deref(), Some("ARS"));
        assert!(items[0].image_ref.is_some());

        assert_eq!(items[1].url, None, "click tracker links are not product links");
        assert_eq!(items[1].image_ref, None, "repeated image is only kept once");
    }

    #[test]
    fn test_listing_without_results_is_an_error() {
        let err = profile().extract_listing("<html><body>captcha</body></html>").unwrap_err();
        assert!(matches!(err, ParsingError::NoProductsFound { .. }));
    }

    #[test]
    fn test_detail_extraction() {
        let detail = profile().extract_detail(DETAIL).unwrap().unwrap();
        assert_eq!(detail.name, "Boya De Natación Aguas Abiertas");
        assert_eq!(detail.price, Some(31500.0));
        assert_eq!(detail.currency.as_deref(), Some("ARS"));
        assert_eq!(detail.code.as_deref(), Some("MLA44556677"));
        assert_eq!(detail.reviews, Some(1204));
    }

    #[test]
    fn test_detail_without_title_yields_nothing() {
        assert_eq!(profile().extract_detail("<p>Publicación pausada</p>").unwrap(), None);
    }
}
