//! Output formats for a property's collections.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::ics::build_calendar;
use crate::model::{Collection, Collections};
use crate::service::WasteError;

#[derive(thiserror::Error, Debug)]
/// Serialization failures while rendering.
pub enum FormatError {
    /// JSON encoding failed.
    #[error("Failed to encode JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// XML encoding failed.
    #[error("Failed to encode XML: {0}")]
    Xml(String),
    /// YAML encoding failed.
    #[error("Failed to encode YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// Serialization selected by the caller.
pub enum OutputFormat {
    /// Pretty-printed JSON.
    #[default]
    Json,
    /// XML rooted at `<collections>`.
    Xml,
    /// YAML.
    Yaml,
    /// iCalendar.
    Ics,
}

impl OutputFormat {
    /// MIME type of the rendered body.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Xml => "application/xml",
            Self::Yaml => "application/x-yaml",
            Self::Ics => "text/calendar",
        }
    }

    /// Serialize `collections`.
    ///
    /// # Errors
    ///
    /// Returns a [`FormatError`] if the serializer rejects the value.
    pub fn render(
        self,
        collections: &Collections,
        context: &RenderContext,
    ) -> Result<Rendered, FormatError> {
        let body = match self {
            Self::Json => serde_json::to_string_pretty(collections)?,
            Self::Xml => quick_xml::se::to_string(&XmlCollections::from(collections))
                .map_err(|err| FormatError::Xml(err.to_string()))?,
            Self::Yaml => serde_yaml::to_string(collections)?,
            Self::Ics => build_calendar(collections, context),
        };
        Ok(Rendered {
            content_type: self.content_type(),
            body,
        })
    }
}

impl FromStr for OutputFormat {
    type Err = WasteError;

    /// Case-insensitive. An empty string selects JSON.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "json" => Ok(Self::Json),
            "xml" => Ok(Self::Xml),
            "yaml" | "yml" => Ok(Self::Yaml),
            "ics" => Ok(Self::Ics),
            _ => Err(WasteError::UnsupportedFormat(raw.to_owned())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(match self {
            Self::Json => "json",
            Self::Xml => "xml",
            Self::Yaml => "yaml",
            Self::Ics => "ics",
        })
    }
}

#[derive(Debug, Clone)]
/// Request-scoped values some formats embed.
pub struct RenderContext {
    /// Schedule page the data came from.
    pub source_url: String,
    /// Environment name, shown in the calendar `PRODID`.
    pub environment: String,
    /// Generation time, used for `DTSTAMP`.
    pub stamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A rendered response body.
pub struct Rendered {
    /// MIME type of `body`.
    pub content_type: &'static str,
    /// Serialized document.
    pub body: String,
}

#[derive(Serialize)]
#[serde(rename = "collections")]
struct XmlCollections<'a> {
    #[serde(rename = "collection")]
    collections: &'a [Collection],
    address: &'a str,
}

impl<'a> From<&'a Collections> for XmlCollections<'a> {
    fn from(collections: &'a Collections) -> Self {
        Self {
            collections: &collections.collections,
            address: &collections.address,
        }
    }
}
