//! Provider implementation for Swindon Borough Council.
//!
//! Schedules come from the council's "collection days" page, addresses from
//! the JSONP location search behind its maps site.

use std::net::IpAddr;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, Url};
use serde::Deserialize;
use tracing::debug;

use sbcwaste_core::{
    model::{AddressMatch, Uprn},
    plugin::SourcePlugin,
    ports::{AddressPort, AddressSearch, FetchedIcon, IconFetcher, PageFetcher, PortError},
};

const PAGE_URL: &str = "https://www.swindon.gov.uk/info/20122/rubbish_and_recycling_collection_days";
const MAPS_URL: &str = "https://maps.swindon.gov.uk/getdata.aspx";

/// Browser-like agent; the council site rejects unknown clients.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36";

/// Per-request time budget.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

/// Body of a location search, once unwrapped from its JSONP callback.
#[derive(Debug, Deserialize)]
struct LocationResponse {
    #[serde(default)]
    data: Vec<Vec<String>>,
}

/// Schedule page download for Swindon.
pub struct SwindonPageFetcher {
    client: Client,
}

impl SwindonPageFetcher {
    /// Create a new page fetcher bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for SwindonPageFetcher {
    fn source_url(&self, uprn: &Uprn) -> String {
        schedule_url(uprn)
    }

    async fn fetch_page(&self, uprn: &Uprn) -> Result<String, PortError> {
        let req = self.client.get(schedule_url(uprn)).timeout(REQUEST_TIMEOUT);
        let body = fetch_text(req).await?;
        debug!(uprn = %uprn, bytes = body.len(), "downloaded schedule page");
        Ok(body)
    }
}

/// Address lookup and search through the maps location service.
pub struct SwindonAddressPort {
    client: Client,
}

impl SwindonAddressPort {
    /// Create a new address port bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn location_search(&self, location: &str, page_size: &str) -> RequestBuilder {
        self.client
            .get(MAPS_URL)
            .query(&[
                ("callback", "sbcwaste_callback"),
                ("type", "jsonp"),
                ("service", "LocationSearch"),
                ("RequestType", "LocationSearch"),
                ("location", location),
                ("pagesize", page_size),
                ("startnum", "1"),
                ("gettotals", "false"),
                ("mapsource", "mapsources/MyHouse"),
            ])
            .timeout(REQUEST_TIMEOUT)
    }
}

#[async_trait]
impl AddressPort for SwindonAddressPort {
    async fn lookup(&self, uprn: &Uprn) -> Result<String, PortError> {
        let body = fetch_text(self.location_search(uprn.as_str(), "13")).await?;
        let response = parse_jsonp(&body)?;
        Ok(address_from_lookup(&response))
    }

    async fn search(
        &self,
        query: &AddressSearch,
        limit: usize,
    ) -> Result<Vec<AddressMatch>, PortError> {
        if limit == 0 || query.is_empty() {
            return Ok(Vec::new());
        }

        let body = fetch_text(self.location_search(query.text.trim(), "100")).await?;
        let response = parse_jsonp(&body)?;
        let mut matches = matches_from_search(response);
        matches.truncate(limit);
        Ok(matches)
    }
}

/// HTTP download of bin icons.
///
/// Icon URLs come from scraped markup, so hosts resolving to loopback,
/// private or link-local addresses are refused before any request is sent.
pub struct HttpIconFetcher {
    client: Client,
}

impl HttpIconFetcher {
    /// Create a new icon fetcher bound to the given HTTP client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IconFetcher for HttpIconFetcher {
    async fn fetch_icon(&self, url: &str) -> Result<FetchedIcon, PortError> {
        let url = ensure_public_destination(url).await?;
        let resp = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .error_for_status()?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        let bytes = resp.bytes().await?.to_vec();
        Ok(FetchedIcon {
            bytes,
            content_type,
        })
    }
}

/// Build the plugin bundle for the Swindon provider.
#[must_use]
pub fn plugin(client: Client) -> SourcePlugin {
    let page_fetcher = Arc::new(SwindonPageFetcher::new(client.clone()));
    let address_port = Arc::new(SwindonAddressPort::new(client.clone()));
    let icon_fetcher = Arc::new(HttpIconFetcher::new(client));

    SourcePlugin {
        name: "swindon",
        page_fetcher,
        address_port,
        icon_fetcher,
    }
}

/// Schedule page URL for `uprn`.
#[must_use]
pub fn schedule_url(uprn: &Uprn) -> String {
    format!("{PAGE_URL}?addressList={uprn}&uprnSubmit=Yes")
}

/// Unwrap a JSONP body: the JSON between the first `(` and the last `)`.
fn parse_jsonp(body: &str) -> Result<LocationResponse, PortError> {
    let start = body
        .find('(')
        .ok_or_else(|| PortError::InvalidResponse("JSONP body has no opening parenthesis".into()))?;
    let end = body
        .rfind(')')
        .filter(|end| *end > start)
        .ok_or_else(|| PortError::InvalidResponse("JSONP body has no closing parenthesis".into()))?;
    let json = body.get(start + 1..end).unwrap_or_default();
    serde_json::from_str(json).map_err(|err| PortError::InvalidResponse(err.to_string()))
}

/// Third column of the first row, or empty when there is no such cell.
fn address_from_lookup(response: &LocationResponse) -> String {
    response
        .data
        .first()
        .and_then(|row| row.get(2))
        .map(|address| address.trim().to_owned())
        .unwrap_or_default()
}

fn matches_from_search(response: LocationResponse) -> Vec<AddressMatch> {
    response
        .data
        .into_iter()
        .filter_map(|row| {
            let [uprn, _, address, ..] = row.as_slice() else {
                return None;
            };
            Some(AddressMatch {
                uprn: uprn.trim().to_owned(),
                address: strip_tags(address),
            })
        })
        .collect()
}

/// Parse `raw` and check every address its host resolves to.
async fn ensure_public_destination(raw: &str) -> Result<Url, PortError> {
    let url = Url::parse(raw).map_err(|err| PortError::Refused(format!("{raw}: {err}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PortError::Refused(format!("unsupported scheme in {raw}")));
    }
    let host = url
        .host_str()
        .ok_or_else(|| PortError::Refused(format!("no host in {raw}")))?;
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    let addresses: Vec<IpAddr> = if let Ok(ip) = bare.parse::<IpAddr>() {
        vec![ip]
    } else {
        let port = url.port_or_known_default().unwrap_or(80);
        tokio::net::lookup_host((bare, port))
            .await
            .map_err(|err| PortError::Refused(format!("dns lookup failed for {bare}: {err}")))?
            .map(|addr| addr.ip())
            .collect()
    };
    if addresses.is_empty() {
        return Err(PortError::Refused(format!("{bare} has no addresses")));
    }
    if let Some(ip) = addresses.into_iter().find(|ip| is_internal(*ip)) {
        return Err(PortError::Refused(format!(
            "private/local address {ip} ({bare})"
        )));
    }
    Ok(url)
}

/// Loopback, private, unspecified or link-local (unicast and multicast).
fn is_internal(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [first, second, third, _] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || (first, second, third) == (224, 0, 0)
        }
        IpAddr::V6(v6) => {
            if let Some(mapped) = v6.to_ipv4_mapped() {
                return is_internal(IpAddr::V4(mapped));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || v6.is_unique_local()
                || v6.is_unicast_link_local()
                || v6.segments().first().is_some_and(|segment| segment & 0xff0f == 0xff02)
        }
    }
}

fn strip_tags(text: &str) -> String {
    HTML_TAG.replace_all(text, "").trim().to_owned()
}

async fn fetch_text(req: RequestBuilder) -> Result<String, PortError> {
    Ok(req.send().await?.error_for_status()?.text().await?)
}
