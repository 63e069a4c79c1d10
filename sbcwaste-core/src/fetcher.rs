//! Fetching and assembling the collections for a single property.

use std::sync::Arc;

use reqwest::Url;
use scraper::Html;
use tracing::{debug, info, warn};

use crate::extract::{ExtractError, PageExtractor};
use crate::model::{Collections, FetchOptions, Uprn};
use crate::ports::{AddressPort, PageFetcher, PortError};

#[derive(thiserror::Error, Debug)]
/// Errors that abort a fetch.
pub enum FetchError {
    /// The schedule page could not be downloaded.
    #[error("Failed to fetch schedule page: {0}")]
    Upstream(#[from] PortError),
    /// The page did not contain any collections.
    #[error(transparent)]
    Extraction(#[from] ExtractError),
}

/// Downloads a schedule page and turns it into [`Collections`].
///
/// The result carries absolute icon URLs but never icon data, so it can be
/// cached whatever the caller later asks for.
pub struct CollectionsFetcher {
    pages: Arc<dyn PageFetcher>,
    addresses: Arc<dyn AddressPort>,
    extractor: PageExtractor,
}

impl CollectionsFetcher {
    /// Wire a fetcher from its collaborators.
    #[must_use]
    pub fn new(pages: Arc<dyn PageFetcher>, addresses: Arc<dyn AddressPort>) -> Self {
        Self {
            pages,
            addresses,
            extractor: PageExtractor::default(),
        }
    }

    /// Canonical schedule page URL for `uprn`.
    #[must_use]
    pub fn source_url(&self, uprn: &Uprn) -> String {
        self.pages.source_url(uprn)
    }

    /// Fetch and extract the collections for `uprn` and look up its address.
    ///
    /// Address failures are logged and leave the field empty.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Upstream`] when the page download fails and
    /// [`FetchError::Extraction`] when the page holds no collections.
    pub async fn fetch(
        &self,
        uprn: &Uprn,
        options: FetchOptions,
    ) -> Result<Collections, FetchError> {
        let source_url = self.source_url(uprn);
        if options.debug {
            info!(uprn = %uprn, url = %source_url, "fetching schedule page");
        }
        let body = self.pages.fetch_page(uprn).await?;

        let mut collections = {
            let document = Html::parse_document(&body);
            self.extractor.extract_with_icons(&document)?
        };

        let base = Url::parse(&source_url).ok();
        for collection in &mut collections {
            collection.icon_data_uri.clear();
            if collection.icon_url.is_empty() {
                continue;
            }
            match absolute_icon_url(base.as_ref(), &collection.icon_url) {
                Some(url) => collection.icon_url = url,
                None => {
                    warn!(url = %collection.icon_url, "dropping icon url that cannot be made absolute");
                    collection.icon_url.clear();
                }
            }
        }

        let address = match self.addresses.lookup(uprn).await {
            Ok(address) => address,
            Err(err) => {
                warn!(uprn = %uprn, %err, "address lookup failed");
                String::new()
            }
        };

        if options.debug {
            info!(uprn = %uprn, address = %address, ?collections, "extracted collections");
        } else {
            debug!(uprn = %uprn, found = collections.len(), "extracted collections");
        }

        Ok(Collections {
            collections,
            address,
        })
    }
}

/// Resolve `raw` against the page it was found on.
fn absolute_icon_url(base: Option<&Url>, raw: &str) -> Option<String> {
    let resolved = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    matches!(resolved.scheme(), "http" | "https").then(|| resolved.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("https://www.swindon.gov.uk/info/20122/rubbish?addressList=1").expect("base url")
    }

    #[test]
    fn icon_urls_are_made_absolute() {
        assert_eq!(
            absolute_icon_url(Some(&base()), "/site/images/b.svg").as_deref(),
            Some("https://www.swindon.gov.uk/site/images/b.svg")
        );
        assert_eq!(
            absolute_icon_url(Some(&base()), "images/b.svg").as_deref(),
            Some("https://www.swindon.gov.uk/info/20122/images/b.svg")
        );
        assert_eq!(
            absolute_icon_url(Some(&base()), "https://cdn.test/a.png").as_deref(),
            Some("https://cdn.test/a.png")
        );
    }

    #[test]
    fn non_http_icon_urls_are_rejected() {
        assert_eq!(absolute_icon_url(Some(&base()), "file:///etc/passwd"), None);
        assert_eq!(absolute_icon_url(None, "/relative.png"), None);
    }
}
