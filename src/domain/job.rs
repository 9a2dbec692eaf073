//! Job rows and their status state machines
//!
//! Both row families are independent units of work. A row is never deleted;
//! terminal failure is recorded as a status value.
//!
//! `fetch_status` moves `pending -> fetching -> {fetched, failed, failed_unfetchable}`.
//! `parse_status` starts as NULL (not attempted) and only leaves NULL once the
//! row is `fetched`: `NULL -> parsing -> {parsed_succeeded, parsing_failed}`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A status string read from the store that matches no known variant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown {kind} status: {value}")]
pub struct UnknownStatus {
    pub kind: &'static str,
    pub value: String,
}

/// Fetch state of a listing page or product record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchStatus {
    Pending,
    Fetching,
    Fetched,
    Failed,
    /// The row has no source URL; retrying cannot fix it
    FailedUnfetchable,
}

impl FetchStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Fetched => "fetched",
            Self::Failed => "failed",
            Self::FailedUnfetchable => "failed_unfetchable",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fetched | Self::Failed | Self::FailedUnfetchable)
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FetchStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "fetching" => Ok(Self::Fetching),
            "fetched" => Ok(Self::Fetched),
            "failed" => Ok(Self::Failed),
            "failed_unfetchable" => Ok(Self::FailedUnfetchable),
            other => Err(UnknownStatus {
                kind: "fetch",
                value: other.to_string(),
            }),
        }
    }
}

/// Parse state; the "not yet attempted" state is represented as `None`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParseStatus {
    Parsing,
    ParsedSucceeded,
    ParsingFailed,
}

impl ParseStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parsing => "parsing",
            Self::ParsedSucceeded => "parsed_succeeded",
            Self::ParsingFailed => "parsing_failed",
        }
    }

    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Parsing)
    }

    /// Reads the nullable column value
    pub fn from_column(value: Option<&str>) -> Result<Option<Self>, UnknownStatus> {
        value.map(str::parse).transpose()
    }
}

impl fmt::Display for ParseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParseStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parsing" => Ok(Self::Parsing),
            "parsed_succeeded" => Ok(Self::ParsedSucceeded),
            "parsing_failed" => Ok(Self::ParsingFailed),
            other => Err(UnknownStatus {
                kind: "parse",
                value: other.to_string(),
            }),
        }
    }
}

/// One catalog/search result page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListingPage {
    pub id: i64,
    pub url: String,
    pub fetch_status: FetchStatus,
    /// Whether list-parse has consumed this page
    pub parse_status: Option<ParseStatus>,
    /// Set once, on the first successful fetch
    pub captured_at: Option<DateTime<Utc>>,
    /// File name of the rendered document; set iff `fetch_status == Fetched`
    pub document_ref: Option<String>,
}

/// One product detail page discovered on a listing page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRecord {
    pub id: i64,
    /// `None` when the listing entry had no usable link
    pub product_url: Option<String>,
    pub listing_page_id: Option<i64>,
    /// Display name as seen on the listing page
    pub listing_title: Option<String>,
    pub fetch_status: FetchStatus,
    pub parse_status: Option<ParseStatus>,
    pub document_ref: Option<String>,
    pub fetched_at: Option<DateTime<Utc>>,
    pub name: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub product_code: Option<String>,
    pub reviews: Option<i64>,
    pub image_ref: Option<String>,
    pub parsed_at: Option<DateTime<Utc>>,
}
