use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Duration written on EXTINF lines when the source did not carry one
pub const UNKNOWN_DURATION: i64 = -1;

/// Single channel entry (the unit every stage works on)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelEntry {
    pub name: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tvg_id: Option<String>,
    #[serde(default = "default_duration")]
    pub duration: i64,
    /// Remaining EXTINF attributes, in source order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra: Vec<(String, String)>,
}

fn default_duration() -> i64 {
    UNKNOWN_DURATION
}

lazy_static! {
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
}

/// Trim and collapse whitespace runs into a single space
pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text.trim(), " ").into_owned()
}

/// Stored form of an attribute value; quotes cannot appear inside M3U attributes
fn attribute_value(value: &str) -> String {
    value.replace('"', "'")
}

/// Stored form of a known metadata field; empty means absent
pub fn metadata_field(value: &str) -> Option<String> {
    let value = attribute_value(&collapse_whitespace(value));
    (!value.is_empty()).then_some(value)
}

impl ChannelEntry {
    /// Names are whitespace-collapsed; an empty name falls back to the URL
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        let url = url.into();
        let name = collapse_whitespace(&name.into());
        Self {
            name: if name.is_empty() { url.clone() } else { name },
            url,
            group: None,
            logo: None,
            tvg_id: None,
            duration: UNKNOWN_DURATION,
            extra: Vec::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = metadata_field(&group.into());
        self
    }

    pub fn with_logo(mut self, logo: impl Into<String>) -> Self {
        self.logo = metadata_field(&logo.into());
        self
    }

    pub fn with_tvg_id(mut self, tvg_id: impl Into<String>) -> Self {
        self.tvg_id = metadata_field(&tvg_id.into());
        self
    }

    /// Append a raw EXTINF attribute
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), attribute_value(&value.into())));
        self
    }

    /// Number of non-empty optional metadata fields, used to rank duplicates
    pub fn richness(&self) -> usize {
        let optional = [&self.group, &self.logo, &self.tvg_id]
            .iter()
            .filter(|field| field.as_deref().is_some_and(|v| !v.is_empty()))
            .count();
        let extra = self.extra.iter().filter(|(_, v)| !v.is_empty()).count();
        optional + extra
    }
}

/// Ordered sequence of entries (one source, or one stage's output)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Collection {
    pub entries: Vec<ChannelEntry>,
}

impl Collection {
    pub fn new(entries: Vec<ChannelEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChannelEntry> {
        self.entries.iter()
    }
}

impl FromIterator<ChannelEntry> for Collection {
    fn from_iter<I: IntoIterator<Item = ChannelEntry>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl IntoIterator for Collection {
    type Item = ChannelEntry;
    type IntoIter = std::vec::IntoIter<ChannelEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// How far a source is trusted when building the conservative tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trust {
    Trusted,
    Untrusted,
}

impl Default for Trust {
    fn default() -> Self {
        Self::Trusted
    }
}

/// A source's output, tagged with where it came from
#[derive(Debug, Clone)]
pub struct SourceCollection {
    pub source: String,
    pub trust: Trust,
    pub collection: Collection,
}
