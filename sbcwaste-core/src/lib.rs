//! Core types and pipeline for the Swindon waste collection service.

/// Key/value cache contract and the in-memory backend.
pub mod cache;
/// Parsing of council date strings.
pub mod date;
/// Extraction of collections from schedule pages.
pub mod extract;
/// Fetch pipeline for a single property.
pub mod fetcher;
/// Output formats.
pub mod format;
/// Icon download and inlining.
pub mod icons;
/// iCalendar rendering.
pub mod ics;
/// Domain models and identifiers shared by all crates.
pub mod model;
/// Bundle of provider ports.
pub mod plugin;
/// Traits describing the upstream interfaces.
pub mod ports;
/// High-level service facade used by clients.
pub mod service;

pub use cache::*;
pub use format::*;
pub use model::*;
pub use plugin::*;
pub use ports::*;
pub use service::*;
