//! Turning bin icon URLs into inline `data:` URIs.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::TimeDelta;
use futures::future::join_all;
use tracing::{debug, warn};

use crate::cache::Cache;
use crate::model::{Collection, Collections};
use crate::ports::{IconFetcher, PortError};

/// Icons change far less often than schedules.
const ICON_TTL_DAYS: i64 = 7;
const FALLBACK_MIME: &str = "application/octet-stream";

/// Lifetime of cached icons.
#[must_use]
pub fn icon_ttl() -> TimeDelta {
    TimeDelta::days(ICON_TTL_DAYS)
}

#[derive(thiserror::Error, Debug)]
/// Errors raised while resolving an icon.
pub enum IconError {
    /// Downloading the image failed.
    #[error("Failed to fetch icon: {0}")]
    Fetch(#[from] PortError),
    /// The server returned no bytes.
    #[error("Icon response was empty")]
    EmptyBody,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of a successful icon resolution.
pub struct IconResolution {
    /// `data:<mime>;base64,<payload>`.
    pub data_uri: String,
    /// Whether the value came from the cache.
    pub cache_hit: bool,
    /// Age of the cached value on a hit.
    pub cache_age: Option<TimeDelta>,
}

/// Resolves icon URLs through the cache, fetching on a miss.
pub struct IconResolver {
    fetcher: Arc<dyn IconFetcher>,
    cache: Option<Arc<dyn Cache>>,
}

impl IconResolver {
    /// Create a resolver. Without a cache every call downloads the image.
    #[must_use]
    pub fn new(fetcher: Arc<dyn IconFetcher>, cache: Option<Arc<dyn Cache>>) -> Self {
        Self { fetcher, cache }
    }

    /// Resolve a single icon URL.
    ///
    /// # Errors
    ///
    /// Returns an [`IconError`] when the image cannot be downloaded.
    pub async fn resolve(&self, url: &str) -> Result<IconResolution, IconError> {
        if let Some(hit) = self.cached(url).await {
            return Ok(hit);
        }

        let icon = self.fetcher.fetch_icon(url).await?;
        if icon.bytes.is_empty() {
            return Err(IconError::EmptyBody);
        }
        let mime = sniff_content_type(&icon.bytes, icon.content_type.as_deref(), url);
        let data_uri = format!("data:{mime};base64,{}", STANDARD.encode(&icon.bytes));

        self.store(url, &data_uri).await;
        Ok(IconResolution {
            data_uri,
            cache_hit: false,
            cache_age: None,
        })
    }

    /// Fill `icon_data_uri` for every collection with an icon URL.
    ///
    /// Icons are fetched concurrently. Failures are logged and leave the field empty.
    pub async fn resolve_into(&self, collections: &mut [Collection]) {
        let results = join_all(collections.iter().map(|collection| async move {
            if collection.icon_url.is_empty() {
                None
            } else {
                Some(self.resolve(&collection.icon_url).await)
            }
        }))
        .await;

        for (collection, result) in collections.iter_mut().zip(results) {
            match result {
                Some(Ok(resolution)) => collection.icon_data_uri = resolution.data_uri,
                Some(Err(err)) => {
                    warn!(url = %collection.icon_url, %err, "icon resolution failed");
                }
                None => debug!(kind = %collection.kind, "no icon url to resolve"),
            }
        }
    }

    async fn cached(&self, url: &str) -> Option<IconResolution> {
        let cache = self.cache.as_ref()?;
        let entry = match cache.get(url).await {
            Ok(entry) => entry?,
            Err(err) => {
                warn!(url, %err, "icon cache read failed");
                return None;
            }
        };
        let wrapper: Collections = match serde_json::from_slice(&entry.bytes) {
            Ok(wrapper) => wrapper,
            Err(err) => {
                warn!(url, %err, "discarding unreadable icon cache entry");
                return None;
            }
        };
        let data_uri = wrapper
            .collections
            .into_iter()
            .next()
            .map(|collection| collection.icon_data_uri)
            .filter(|data_uri| !data_uri.is_empty())?;
        debug!(url, "icon cache hit");
        Some(IconResolution {
            data_uri,
            cache_hit: true,
            cache_age: Some(entry.age()),
        })
    }

    async fn store(&self, url: &str, data_uri: &str) {
        let Some(cache) = self.cache.as_ref() else {
            return;
        };
        let wrapper = Collections {
            collections: vec![Collection {
                kind: url.to_owned(),
                collection_dates: Vec::new(),
                icon_url: url.to_owned(),
                icon_data_uri: data_uri.to_owned(),
            }],
            address: String::new(),
        };
        let result = match serde_json::to_vec(&wrapper) {
            Ok(bytes) => cache.set(url, &bytes, icon_ttl()).await,
            Err(err) => Err(err.into()),
        };
        if let Err(err) = result {
            warn!(url, %err, "icon cache write failed");
        }
    }
}

/// Work out the MIME type of an image.
///
/// Magic bytes win, then the server's `Content-Type`, then the URL's file extension.
#[must_use]
pub fn sniff_content_type(bytes: &[u8], header: Option<&str>, url: &str) -> String {
    if let Some(mime) = sniff_magic(bytes) {
        return mime.to_owned();
    }
    if let Some(mime) = header
        .and_then(|value| value.split(';').next())
        .map(str::trim)
        .filter(|mime| !mime.is_empty() && *mime != FALLBACK_MIME)
    {
        return mime.to_owned();
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    mime_guess::from_path(path)
        .first()
        .map_or_else(|| FALLBACK_MIME.to_owned(), |mime| mime.essence_str().to_owned())
}

fn sniff_magic(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("image/png")
    } else if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some("image/jpeg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("image/gif")
    } else if bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP".as_slice()) {
        Some("image/webp")
    } else if bytes.starts_with(&[0x00, 0x00, 0x01, 0x00]) {
        Some("image/x-icon")
    } else if looks_like_svg(bytes) {
        Some("image/svg+xml")
    } else {
        None
    }
}

fn looks_like_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let text = String::from_utf8_lossy(head);
    let text = text.trim_start();
    text.starts_with("<svg") || (text.starts_with("<?xml") && text.contains("<svg"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::cache::MemoryCache;
    use crate::ports::FetchedIcon;

    const PNG: &[u8] = b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR";

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl IconFetcher for CountingFetcher {
        async fn fetch_icon(&self, _url: &str) -> Result<FetchedIcon, PortError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PortError::Status(404));
            }
            Ok(FetchedIcon {
                bytes: PNG.to_vec(),
                content_type: Some("image/png".into()),
            })
        }
    }

    fn expected_uri() -> String {
        format!("data:image/png;base64,{}", STANDARD.encode(PNG))
    }

    #[tokio::test]
    async fn miss_fetches_and_second_call_hits_cache() {
        let fetcher = Arc::new(CountingFetcher::default());
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());
        let resolver = IconResolver::new(fetcher.clone(), Some(cache));

        let first = resolver.resolve("https://x.test/bin.png").await.expect("first");
        assert!(!first.cache_hit);
        assert_eq!(first.data_uri, expected_uri());

        let second = resolver.resolve("https://x.test/bin.png").await.expect("second");
        assert!(second.cache_hit);
        assert!(second.cache_age.is_some());
        assert_eq!(second.data_uri, first.data_uri);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failures_leave_data_uri_empty() {
        let fetcher = Arc::new(CountingFetcher {
            fail: true,
            ..CountingFetcher::default()
        });
        let resolver = IconResolver::new(fetcher, None);
        let mut collections = vec![
            Collection {
                icon_url: "https://x.test/a.png".into(),
                ..Collection::new("Refuse", Vec::new())
            },
            Collection::new("Recycling", Vec::new()),
        ];

        resolver.resolve_into(&mut collections).await;

        assert!(collections.iter().all(|entry| entry.icon_data_uri.is_empty()));
    }

    #[tokio::test]
    async fn resolve_into_fills_every_icon() {
        let fetcher = Arc::new(CountingFetcher::default());
        let resolver = IconResolver::new(fetcher.clone(), None);
        let mut collections = vec![
            Collection {
                icon_url: "https://x.test/a.png".into(),
                ..Collection::new("Refuse", Vec::new())
            },
            Collection {
                icon_url: "https://x.test/b.png".into(),
                ..Collection::new("Recycling", Vec::new())
            },
        ];

        resolver.resolve_into(&mut collections).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(collections.iter().all(|entry| entry.icon_data_uri == expected_uri()));
    }

    #[test]
    fn content_type_sniffing_order() {
        assert_eq!(sniff_content_type(PNG, Some("text/plain"), "a.gif"), "image/png");
        assert_eq!(
            sniff_content_type(b"<svg xmlns=\"http://www.w3.org/2000/svg\"/>", None, "a"),
            "image/svg+xml"
        );
        assert_eq!(
            sniff_content_type(b"????", Some("image/webp; charset=binary"), "a"),
            "image/webp"
        );
        assert_eq!(
            sniff_content_type(b"????", None, "https://x.test/icon.gif?v=2"),
            "image/gif"
        );
        assert_eq!(sniff_content_type(b"????", None, "https://x.test/icon"), FALLBACK_MIME);
    }
}
