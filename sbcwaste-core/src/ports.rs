//! Traits describing the collaborators the pipeline talks to.

use async_trait::async_trait;
use reqwest::Error as ReqwestError;

use crate::model::{AddressMatch, Uprn};

#[derive(thiserror::Error, Debug)]
/// Errors that can occur while talking to upstream services.
pub enum PortError {
    /// The request did not finish within its time budget.
    #[error("Request timed out")]
    Timeout,
    /// Network layer failed.
    #[error("Network error: {0}")]
    Network(ReqwestError),
    /// Upstream answered with a non-success status.
    #[error("Upstream returned status {0}")]
    Status(u16),
    /// Upstream answered with a body we could not understand.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    /// The destination address is not allowed.
    #[error("Refused to connect: {0}")]
    Refused(String),
    /// Internal provider error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ReqwestError> for PortError {
    fn from(err: ReqwestError) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if let Some(status) = err.status() {
            Self::Status(status.as_u16())
        } else {
            Self::Network(err)
        }
    }
}

#[derive(Debug, Clone)]
/// Query parameters for searching addresses.
pub struct AddressSearch {
    /// Free text such as a street name or postcode.
    pub text: String,
}

impl AddressSearch {
    /// Construct a new search query.
    #[must_use]
    pub fn new<S: Into<String>>(text: S) -> Self {
        Self { text: text.into() }
    }

    /// Check if the search query is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty()
    }
}

#[derive(Debug, Clone, Default)]
/// Raw icon download.
pub struct FetchedIcon {
    /// Image bytes as served.
    pub bytes: Vec<u8>,
    /// `Content-Type` header, if the server sent one.
    pub content_type: Option<String>,
}

#[async_trait]
/// Fetches the schedule page for a property.
pub trait PageFetcher: Send + Sync {
    /// Canonical URL of the schedule page for `uprn`.
    fn source_url(&self, uprn: &Uprn) -> String;

    /// Download the schedule page body.
    ///
    /// # Errors
    ///
    /// Returns [`PortError::Timeout`] when the time budget is exceeded and another
    /// [`PortError`] for transport failures or non-success statuses.
    async fn fetch_page(&self, uprn: &Uprn) -> Result<String, PortError>;
}

#[async_trait]
/// Resolves property references to addresses.
pub trait AddressPort: Send + Sync {
    /// Look up the display address for a single property.
    ///
    /// An upstream answer with no matching row yields an empty string.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the request or response decoding fails.
    async fn lookup(&self, uprn: &Uprn) -> Result<String, PortError>;

    /// Search addresses by free text.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the request or response decoding fails.
    async fn search(
        &self,
        query: &AddressSearch,
        limit: usize,
    ) -> Result<Vec<AddressMatch>, PortError>;
}

#[async_trait]
/// Downloads icon images.
pub trait IconFetcher: Send + Sync {
    /// Fetch the image at `url`.
    ///
    /// # Errors
    ///
    /// Returns a [`PortError`] when the download fails or the status is not a success.
    async fn fetch_icon(&self, url: &str) -> Result<FetchedIcon, PortError>;
}
