//! Domain data structures for properties and their collection schedules.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::service::WasteError;

/// Longest UPRN the council issues.
const MAX_UPRN_DIGITS: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Unique Property Reference Number identifying a single property.
pub struct Uprn(String);

impl Uprn {
    /// Validate and wrap a raw UPRN string.
    ///
    /// Surrounding whitespace is ignored. The remainder must be 1 to 12 ASCII digits.
    ///
    /// # Errors
    ///
    /// Returns [`WasteError::MissingUprn`] for empty input and
    /// [`WasteError::InvalidUprn`] for anything that is not a run of digits.
    pub fn parse(raw: &str) -> Result<Self, WasteError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(WasteError::MissingUprn);
        }
        if trimmed.len() > MAX_UPRN_DIGITS || !trimmed.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(WasteError::InvalidUprn(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Borrow the digits.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uprn {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Schedule for one waste stream at a property.
pub struct Collection {
    /// Label as rendered by the council site, e.g. "Recycling and food waste".
    #[serde(rename = "type")]
    pub kind: String,
    /// Canonical `YYYY-MM-DD` dates in page order.
    #[serde(rename = "collectionDates", alias = "CollectionDates", default)]
    pub collection_dates: Vec<String>,
    /// Absolute URL of the bin icon.
    #[serde(
        rename = "iconURL",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub icon_url: String,
    /// Icon inlined as a `data:` URI.
    #[serde(
        rename = "iconDataURI",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub icon_data_uri: String,
}

impl Collection {
    /// Create a collection with the given label and dates and no icon.
    #[must_use]
    pub fn new<S: Into<String>>(kind: S, collection_dates: Vec<String>) -> Self {
        Self {
            kind: kind.into(),
            collection_dates,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
/// Every collection for a property together with its address.
pub struct Collections {
    /// Collections in page order.
    #[serde(default)]
    pub collections: Vec<Collection>,
    /// Human-readable address; empty when the lookup failed.
    #[serde(default)]
    pub address: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
/// Per-request switches.
pub struct FetchOptions {
    /// Log intermediate extraction results at info level.
    pub debug: bool,
    /// Resolve icons and inline them as data URIs.
    pub show_icons: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Address search hit.
pub struct AddressMatch {
    /// Property reference usable for a schedule lookup.
    pub uprn: String,
    /// Address text with markup removed.
    pub address: String,
}
