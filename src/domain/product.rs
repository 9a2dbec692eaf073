//! Values produced by site extractors

use serde::{Deserialize, Serialize};

/// One entry found on a listing page
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingItem {
    /// Absolute detail page URL, if the entry exposed a usable link
    pub url: Option<String>,
    pub display_name: Option<String>,
    /// Price text exactly as shown on the page
    pub raw_price: Option<String>,
    pub currency: Option<String>,
    pub image_ref: Option<String>,
}

/// Attributes extracted from a product detail page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductDetail {
    pub name: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub code: Option<String>,
    pub reviews: Option<i64>,
    pub image_ref: Option<String>,
}

impl ProductDetail {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            price: None,
            currency: None,
            code: None,
            reviews: None,
            image_ref: None,
        }
    }
}
