//! Parsing error types for site extractors
//!
//! An extractor error is always recorded as a parse failure for the row
//! being processed; none of these are retried within a run.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParsingError {
    #[error("Required field '{field}' not found in HTML")]
    RequiredFieldMissing {
        field: String,
        context: Option<String>,
    },

    #[error("Invalid CSS selector: {selector} - {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("No products found (tried selectors: {})", tried_selectors.join(", "))]
    NoProductsFound { tried_selectors: Vec<String> },

    #[error("Invalid {field} value: '{value}'")]
    InvalidNumber { field: String, value: String },
}

impl ParsingError {
    /// Create a required field missing error with context
    pub fn required_field_missing(field: &str, context: Option<&str>) -> Self {
        Self::RequiredFieldMissing {
            field: field.to_string(),
            context: context.map(ToString::to_string),
        }
    }

    pub fn invalid_selector(selector: &str, reason: impl ToString) -> Self {
        Self::InvalidSelector {
            selector: selector.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn no_products_found(tried_selectors: &[&str]) -> Self {
        Self::NoProductsFound {
            tried_selectors: tried_selectors.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn invalid_number(field: &str, value: &str) -> Self {
        Self::InvalidNumber {
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    /// Selector errors are bugs in a site profile, not properties of a page
    pub fn is_configuration_error(&self) -> bool {
        matches!(self, Self::InvalidSelector { .. })
    }
}

pub type ParsingResult<T> = Result<T, ParsingError>;
