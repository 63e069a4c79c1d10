//! iCalendar (RFC 5545) rendering of collection schedules.

use chrono::{Days, NaiveDate};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::date::CANONICAL_FORMAT;
use crate::format::RenderContext;
use crate::model::{Collection, Collections};

/// Longest content line, in octets, before folding.
pub const FOLD_LIMIT: usize = 74;
/// Domain suffix of every event UID.
pub const UID_DOMAIN: &str = "sbcwaste.com";

const CRLF: &str = "\r\n";

/// Fold a content line into chunks of at most [`FOLD_LIMIT`] octets.
///
/// Continuation chunks are introduced by CRLF and a single space. Chunks never
/// split a UTF-8 sequence, so for ASCII every chunk but the last is exactly
/// [`FOLD_LIMIT`] characters.
#[must_use]
pub fn fold_line(line: &str) -> String {
    if line.len() <= FOLD_LIMIT {
        return line.to_owned();
    }

    let mut folded = String::with_capacity(line.len() + 3 * (line.len() / FOLD_LIMIT));
    let mut rest = line;
    while !rest.is_empty() {
        let mut end = rest.len().min(FOLD_LIMIT);
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (chunk, tail) = rest.split_at(end);
        if !folded.is_empty() {
            folded.push_str(CRLF);
            folded.push(' ');
        }
        folded.push_str(chunk);
        rest = tail;
    }
    folded
}

/// Stable event identifier: `sha256(kind + date + address)` in hex, at [`UID_DOMAIN`].
#[must_use]
pub fn generate_uid(kind: &str, date: &str, address: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(kind.as_bytes());
    hasher.update(date.as_bytes());
    hasher.update(address.as_bytes());
    format!("{}@{UID_DOMAIN}", hex::encode(hasher.finalize()))
}

/// Escape a TEXT property value.
fn escape_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            ';' => escaped.push_str("\\;"),
            ',' => escaped.push_str("\\,"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            other => escaped.push(other),
        }
    }
    escaped
}

/// Assembles a VCALENDAR document, one VEVENT per collection date.
pub struct IcsBuilder<'a> {
    context: &'a RenderContext,
    body: String,
    events: usize,
}

impl<'a> IcsBuilder<'a> {
    /// Start a calendar for the given render context.
    #[must_use]
    pub fn new(context: &'a RenderContext) -> Self {
        let mut builder = Self {
            context,
            body: String::new(),
            events: 0,
        };
        builder.line("BEGIN:VCALENDAR");
        builder.line("VERSION:2.0");
        let prodid = format!(
            "PRODID:-//Swindon Borough Council Waste Collections//sbcwaste-{}//EN",
            context.environment
        );
        builder.line(&prodid);
        builder
    }

    fn line(&mut self, content: &str) {
        self.body.push_str(&fold_line(content));
        self.body.push_str(CRLF);
    }

    /// Add an event for every date of `collection`.
    pub fn add_collection(&mut self, collection: &Collection, address: &str) {
        for date in &collection.collection_dates {
            match NaiveDate::parse_from_str(date, CANONICAL_FORMAT) {
                Ok(start) => self.add_event(collection, address, date, start),
                Err(err) => warn!(date = %date, %err, "skipping non-canonical date"),
            }
        }
    }

    fn add_event(&mut self, collection: &Collection, address: &str, date: &str, start: NaiveDate) {
        let Some(end) = start.checked_add_days(Days::new(1)) else {
            warn!(date = %date, "date has no following day");
            return;
        };
        let stamp = self.context.stamp.format("%Y%m%dT%H%M%SZ");

        self.line("BEGIN:VEVENT");
        self.line(&format!("UID:{}", generate_uid(&collection.kind, date, address)));
        self.line(&format!("DTSTAMP:{stamp}"));
        self.line(&format!("DTSTART;VALUE=DATE:{}", start.format("%Y%m%d")));
        self.line(&format!("DTEND;VALUE=DATE:{}", end.format("%Y%m%d")));
        self.line(&format!("SUMMARY:{}", escape_text(&collection.kind)));
        self.line(&format!("LOCATION:{}", escape_text(address)));
        if !collection.icon_data_uri.is_empty() {
            self.line(&format!("ATTACH;VALUE=URI:{}", collection.icon_data_uri));
        }
        let url = format!("URL:{}", self.context.source_url);
        self.line(&url);
        self.line("TRANSP:TRANSPARENT");
        self.line("END:VEVENT");
        self.events += 1;
    }

    /// Number of events added so far.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.events
    }

    /// Close the calendar and return the document.
    #[must_use]
    pub fn finish(mut self) -> String {
        self.line("END:VCALENDAR");
        debug!(events = self.events, bytes = self.body.len(), "rendered calendar");
        self.body
    }
}

/// Render every collection of `collections` as a calendar.
#[must_use]
pub fn build_calendar(collections: &Collections, context: &RenderContext) -> String {
    let mut builder = IcsBuilder::new(context);
    for collection in &collections.collections {
        builder.add_collection(collection, &collections.address);
    }
    let mut calendar = builder.finish();
    calendar.shrink_to_fit();
    calendar
}
