//! Bundle of source-side ports exported by a provider crate.

use std::sync::Arc;

use crate::ports::{AddressPort, IconFetcher, PageFetcher};

/// Collection of ports implementing a provider for one council site.
#[derive(Clone)]
pub struct SourcePlugin {
    /// Short identifier used in logs.
    pub name: &'static str,
    /// Implementation for downloading schedule pages.
    pub page_fetcher: Arc<dyn PageFetcher>,
    /// Implementation for address lookup and search.
    pub address_port: Arc<dyn AddressPort>,
    /// Implementation for downloading icon images.
    pub icon_fetcher: Arc<dyn IconFetcher>,
}
