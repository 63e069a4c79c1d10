//! Locating collection blocks in the council's schedule page.
//!
//! The page has been served in two templates over time. Each template is an
//! [`ExtractionStrategy`]; [`PageExtractor`] tries them in order and the first
//! one that recognises the document decides the result.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;

use crate::date::parse_date;
use crate::model::Collection;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors raised while extracting collections from a page.
pub enum ExtractError {
    /// No strategy produced a single collection.
    #[error("No collections found on the page")]
    NoCollectionsFound,
}

/// One page template the extractor knows how to read.
pub trait ExtractionStrategy: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Read collections from `document`.
    ///
    /// Returns `None` when the document is not in this template, so the next
    /// strategy gets a turn. `Some(vec![])` means the template matched but held
    /// nothing usable.
    fn extract(&self, document: &Html) -> Option<Vec<Collection>>;

    /// Icon URLs keyed by collection type, read in a separate pass.
    ///
    /// Only consulted when icons were requested.
    fn icon_urls(&self, _document: &Html) -> Vec<(String, String)> {
        Vec::new()
    }
}

struct Selectors {
    container: Selector,
    container_header: Selector,
    next_date: Selector,
    date_list_item: Selector,
    icon: Selector,
    legacy_header: Selector,
    legacy_group: Selector,
    paragraph: Selector,
}

static SELECTORS: LazyLock<Selectors> = LazyLock::new(|| Selectors {
    container: css("div.bin-collection-container"),
    container_header: css("h3"),
    next_date: css(".nextCollectionDate"),
    date_list_item: css("ul.collection-dates li"),
    icon: css(".bin-icons"),
    legacy_header: css("div.content-left h3"),
    legacy_group: css("div.row.collection-next > div.row"),
    paragraph: css("p"),
});

static ICON_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"url\(\s*['"]?([^'")]+?)['"]?\s*\)"#).expect("icon url pattern is valid")
});

fn css(selector: &str) -> Selector {
    Selector::parse(selector).expect("built-in selectors are valid")
}

/// Element text with runs of whitespace collapsed to single spaces.
fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_into(dates: &mut Vec<String>, raw: &str) {
    match parse_date(raw) {
        Ok(date) => dates.push(date),
        Err(err) => debug!(%err, "dropping unparseable date"),
    }
}

/// Pull the address out of a CSS `url(...)` value.
#[must_use]
pub fn icon_url_from_style(style: &str) -> Option<String> {
    ICON_URL
        .captures(style)
        .and_then(|captures| captures.get(1))
        .map(|found| found.as_str().trim().to_owned())
        .filter(|url| !url.is_empty())
}

/// Current template: one container per collection holding its header, dates and icon.
pub struct ContainerLayout;

impl ExtractionStrategy for ContainerLayout {
    fn name(&self) -> &'static str {
        "container"
    }

    fn extract(&self, document: &Html) -> Option<Vec<Collection>> {
        let selectors = &*SELECTORS;
        let containers: Vec<ElementRef<'_>> = document.select(&selectors.container).collect();
        if containers.is_empty() {
            return None;
        }

        let mut collections = Vec::with_capacity(containers.len());
        for container in containers {
            let kind = container
                .select(&selectors.container_header)
                .next()
                .map(text_of)
                .unwrap_or_default();
            if kind.is_empty() {
                debug!("skipping container without a header");
                continue;
            }

            let mut dates = Vec::new();
            if let Some(next) = container.select(&selectors.next_date).next() {
                parse_into(&mut dates, &text_of(next));
            }
            for item in container.select(&selectors.date_list_item) {
                parse_into(&mut dates, &text_of(item));
            }

            if dates.is_empty() {
                debug!(kind = %kind, "skipping container without parseable dates");
                continue;
            }
            collections.push(Collection::new(kind, dates));
        }
        Some(collections)
    }

    fn icon_urls(&self, document: &Html) -> Vec<(String, String)> {
        let selectors = &*SELECTORS;
        document
            .select(&selectors.container)
            .filter_map(|container| {
                let kind = container
                    .select(&selectors.container_header)
                    .next()
                    .map(text_of)?;
                let url = container
                    .select(&selectors.icon)
                    .filter_map(|icon| icon.value().attr("style"))
                    .find_map(icon_url_from_style)?;
                Some((kind, url))
            })
            .collect()
    }
}

/// Older template: two side-by-side streams whose parts are listed separately.
pub struct LegacyLayout;

/// The legacy template always renders exactly this many streams.
const LEGACY_STREAMS: usize = 2;

impl LegacyLayout {
    /// Follow-up date strings of one group, one per paragraph or, failing that, per line.
    fn group_dates(group: ElementRef<'_>) -> Vec<String> {
        let paragraphs: Vec<String> = group
            .select(&SELECTORS.paragraph)
            .map(text_of)
            .filter(|text| !text.is_empty())
            .collect();
        if !paragraphs.is_empty() {
            return paragraphs;
        }
        group
            .text()
            .collect::<String>()
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .collect()
    }
}

impl ExtractionStrategy for LegacyLayout {
    fn name(&self) -> &'static str {
        "legacy"
    }

    fn extract(&self, document: &Html) -> Option<Vec<Collection>> {
        let selectors = &*SELECTORS;
        let headers: Vec<String> = document
            .select(&selectors.legacy_header)
            .map(text_of)
            .collect();
        if headers.is_empty() {
            return None;
        }
        let first_dates: Vec<String> = document
            .select(&selectors.next_date)
            .map(text_of)
            .collect();

        // Position of each stream in the output, keyed by its pair index.
        let mut slots: HashMap<usize, usize> = HashMap::new();
        let mut collections = Vec::with_capacity(LEGACY_STREAMS);
        for (pair, (kind, first)) in headers
            .iter()
            .zip(first_dates.iter())
            .take(LEGACY_STREAMS)
            .enumerate()
        {
            match parse_date(first) {
                Ok(date) => {
                    slots.insert(pair, collections.len());
                    collections.push(Collection::new(kind.clone(), vec![date]));
                }
                Err(err) => debug!(%err, pair, "skipping stream with unparseable first date"),
            }
        }

        for (pair, group) in document
            .select(&selectors.legacy_group)
            .take(LEGACY_STREAMS)
            .enumerate()
        {
            let Some(collection) = slots
                .get(&pair)
                .and_then(|slot| collections.get_mut(*slot))
            else {
                continue;
            };
            for raw in Self::group_dates(group) {
                parse_into(&mut collection.collection_dates, &raw);
            }
        }

        // Icons are assumed to render in header order.
        let icons = document
            .select(&selectors.icon)
            .map(|icon| icon.value().attr("style").and_then(icon_url_from_style));
        for (collection, icon) in collections.iter_mut().zip(icons) {
            if let Some(url) = icon {
                collection.icon_url = url;
            }
        }

        Some(collections)
    }
}

/// Ordered cascade of [`ExtractionStrategy`] implementations.
pub struct PageExtractor {
    strategies: Vec<Box<dyn ExtractionStrategy>>,
}

impl Default for PageExtractor {
    fn default() -> Self {
        Self::new(vec![Box::new(ContainerLayout), Box::new(LegacyLayout)])
    }
}

impl PageExtractor {
    /// Build an extractor that tries `strategies` in the given order.
    #[must_use]
    pub fn new(strategies: Vec<Box<dyn ExtractionStrategy>>) -> Self {
        Self { strategies }
    }

    /// Extract collections from a parsed document.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::NoCollectionsFound`] when no strategy yields a collection.
    pub fn extract(&self, document: &Html) -> Result<Vec<Collection>, ExtractError> {
        self.run(document, false)
    }

    /// Extract collections and fill in icon URLs the template exposes separately.
    ///
    /// # Errors
    ///
    /// Returns [`ExtractError::NoCollectionsFound`] when no strategy yields a collection.
    pub fn extract_with_icons(&self, document: &Html) -> Result<Vec<Collection>, ExtractError> {
        self.run(document, true)
    }

    #[cfg(test)]
    fn extract_html(&self, html: &str) -> Result<Vec<Collection>, ExtractError> {
        self.extract(&Html::parse_document(html))
    }

    fn run(&self, document: &Html, with_icons: bool) -> Result<Vec<Collection>, ExtractError> {
        for strategy in &self.strategies {
            let Some(mut collections) = strategy.extract(document) else {
                continue;
            };
            debug!(
                strategy = strategy.name(),
                found = collections.len(),
                "page template recognised"
            );
            if collections.is_empty() {
                return Err(ExtractError::NoCollectionsFound);
            }
            if with_icons {
                let icons: HashMap<String, String> =
                    strategy.icon_urls(document).into_iter().collect();
                for collection in collections
                    .iter_mut()
                    .filter(|entry| entry.icon_url.is_empty())
                {
                    if let Some(url) = icons.get(&collection.kind) {
                        collection.icon_url.clone_from(url);
                    }
                }
            }
            return Ok(collections);
        }
        Err(ExtractError::NoCollectionsFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONTAINER_FIXTURE: &str = include_str!("../tests/fixtures/container_layout.html");
    const LEGACY_FIXTURE: &str = include_str!("../tests/fixtures/legacy_layout.html");

    fn dates(collection: &Collection) -> Vec<&str> {
        collection
            .collection_dates
            .iter()
            .map(String::as_str)
            .collect()
    }

    #[test]
    fn container_layout_reads_each_block_in_page_order() {
        let collections = PageExtractor::default()
            .extract_html(CONTAINER_FIXTURE)
            .expect("collections");

        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].kind, "Refuse");
        assert_eq!(
            dates(&collections[0]),
            ["2025-10-20", "2025-11-03", "2025-11-10"]
        );
        assert_eq!(collections[1].kind, "Recycling");
        assert_eq!(
            dates(&collections[1]),
            ["2025-10-27", "2025-11-17", "2025-11-24"]
        );
        assert!(collections.iter().all(|entry| entry.icon_url.is_empty()));
    }

    #[test]
    fn container_layout_icon_pass_is_keyed_by_type() {
        let document = Html::parse_document(CONTAINER_FIXTURE);
        let collections = PageExtractor::default()
            .extract_with_icons(&document)
            .expect("collections");

        assert_eq!(
            collections[0].icon_url,
            "https://www.swindon.gov.uk/site/images/bin-refuse.png"
        );
        assert_eq!(
            collections[1].icon_url,
            "https://www.swindon.gov.uk/site/images/bin-recycling.png"
        );
    }

    #[test]
    fn container_layout_skips_blocks_without_header_or_dates() {
        let html = r#"
            <div class="bin-collection-container"><h3> </h3>
                <span class="nextCollectionDate">Monday, 20 October 2025</span></div>
            <div class="bin-collection-container"><h3>Garden waste</h3>
                <span class="nextCollectionDate">whenever</span></div>
            <div class="bin-collection-container"><h3>Refuse</h3>
                <span class="nextCollectionDate">Monday, 20 October 2025</span></div>
        "#;
        let collections = PageExtractor::default()
            .extract_html(html)
            .expect("collections");
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].kind, "Refuse");
    }

    #[test]
    fn container_layout_wins_over_legacy_markup() {
        let html = r#"
            <div class="content-left"><h3>Legacy</h3></div>
            <div class="bin-collection-container"><h3>Current</h3>
                <span class="nextCollectionDate">Monday, 20 October 2025</span></div>
        "#;
        let collections = PageExtractor::default()
            .extract_html(html)
            .expect("collections");
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].kind, "Current");
    }

    #[test]
    fn matched_container_layout_with_nothing_usable_is_an_error() {
        let html = r#"<div class="bin-collection-container"><h3>Refuse</h3></div>
            <div class="content-left"><h3>Legacy</h3></div>
            <span class="nextCollectionDate">Monday, 20 October 2025</span>"#;
        assert_eq!(
            PageExtractor::default().extract_html(html),
            Err(ExtractError::NoCollectionsFound)
        );
    }

    #[test]
    fn legacy_layout_pairs_by_position_and_merges_follow_ups() {
        let collections = PageExtractor::default()
            .extract_html(LEGACY_FIXTURE)
            .expect("collections");

        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].kind, "Recycling and food waste");
        assert_eq!(
            dates(&collections[0]),
            ["2025-11-07", "2025-11-21", "2025-12-05", "2025-12-19"]
        );
        assert_eq!(collections[1].kind, "Rubbish bin and food waste");
        assert_eq!(
            dates(&collections[1]),
            ["2025-10-31", "2025-11-14", "2025-11-28", "2025-12-12"]
        );
        assert_eq!(
            collections[0].icon_url,
            "https://www.swindon.gov.uk/site/images/recycling.png"
        );
        assert_eq!(
            collections[1].icon_url,
            "https://www.swindon.gov.uk/site/images/rubbish.png"
        );
    }

    #[test]
    fn legacy_layout_skips_pair_with_bad_first_date() {
        let html = r#"
            <div class="content-left"><h3>First</h3></div>
            <div class="content-left"><h3>Second</h3></div>
            <span class="nextCollectionDate">soon</span>
            <span class="nextCollectionDate">Friday, 31 October 2025</span>
            <div class="row collection-next">
                <div class="row"><p>Friday, 7 November 2025</p></div>
                <div class="row"><p>Friday, 14 November 2025</p></div>
            </div>
        "#;
        let collections = PageExtractor::default()
            .extract_html(html)
            .expect("collections");
        assert_eq!(collections.len(), 1);
        assert_eq!(collections[0].kind, "Second");
        assert_eq!(dates(&collections[0]), ["2025-10-31", "2025-11-14"]);
    }

    #[test]
    fn legacy_group_without_paragraphs_is_split_by_line() {
        let html = "<div class=\"content-left\"><h3>Refuse</h3></div>\
            <span class=\"nextCollectionDate\">Friday, 31 October 2025</span>\
            <div class=\"row collection-next\"><div class=\"row\">\n\
            Friday, 7 November 2025\n  Friday, 14 November 2025\n</div></div>";
        let collections = PageExtractor::default()
            .extract_html(html)
            .expect("collections");
        assert_eq!(
            dates(&collections[0]),
            ["2025-10-31", "2025-11-07", "2025-11-14"]
        );
    }

    #[test]
    fn legacy_icon_without_style_keeps_its_position() {
        let html = r#"
            <div class="content-left"><h3>Recycling</h3><span class="bin-icons"></span></div>
            <div class="content-left"><h3>Refuse</h3>
                <span class="bin-icons" style="background-image: url('/site/images/refuse.png')"></span></div>
            <span class="nextCollectionDate">Friday, 7 November 2025</span>
            <span class="nextCollectionDate">Friday, 31 October 2025</span>
        "#;
        let document = Html::parse_document(html);
        let collections = PageExtractor::default()
            .extract_with_icons(&document)
            .expect("collections");
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].icon_url, "");
        assert_eq!(collections[1].kind, "Refuse");
        assert_eq!(collections[1].icon_url, "/site/images/refuse.png");
    }

    #[test]
    fn unknown_document_has_no_collections() {
        let html = "<html><body><h1>Page not found</h1></body></html>";
        assert_eq!(
            PageExtractor::default().extract_html(html),
            Err(ExtractError::NoCollectionsFound)
        );
    }

    #[test]
    fn extraction_is_repeatable() {
        let extractor = PageExtractor::default();
        let first = extractor.extract_html(CONTAINER_FIXTURE);
        let second = extractor.extract_html(CONTAINER_FIXTURE);
        assert_eq!(first, second);
    }

    #[test]
    fn icon_url_is_read_from_css() {
        assert_eq!(
            icon_url_from_style("background-image: url(\"https://x.test/a.png\");").as_deref(),
            Some("https://x.test/a.png")
        );
        assert_eq!(
            icon_url_from_style("background-image:url('/b.svg')").as_deref(),
            Some("/b.svg")
        );
        assert_eq!(icon_url_from_style("color: red"), None);
    }
}
