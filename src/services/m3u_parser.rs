use lazy_static::lazy_static;
use regex::Regex;

use crate::error::{PipelineError, Result};
use crate::models::channel::{collapse_whitespace, metadata_field};
use crate::models::{ChannelEntry, Collection, UNKNOWN_DURATION};
use crate::services::url_audit::{self, Checked};

// Defensive limit for a single playlist line
const MAX_LINE_BYTES: usize = 32 * 1024;

const HEADER: &str = "#EXTM3U";
const EXTINF: &str = "#EXTINF:";
const EXTGRP: &str = "#EXTGRP:";

lazy_static! {
    /// Regex to parse EXTINF attributes (tvg-id="...", group-title="...", etc)
    static ref ATTR_REGEX: Regex = Regex::new(r#"(\w+(?:-\w+)*)="([^"]*)""#).unwrap();

    /// Regex to extract duration from EXTINF line
    static ref DURATION_REGEX: Regex = Regex::new(r"^\s*(-?\d+)").unwrap();
}

/// Parsed EXTINF line data
#[derive(Debug, Default)]
struct ExtinfData {
    duration: i64,
    attributes: Vec<(String, String)>,
    title: String,
    /// Group from a following #EXTGRP line
    group_hint: Option<String>,
}

impl ExtinfData {
    fn into_entry(self, url: String) -> ChannelEntry {
        let name = if !self.title.is_empty() {
            self.title
        } else {
            self.attributes
                .iter()
                .find(|(k, v)| k == "tvg-name" && !v.trim().is_empty())
                .map(|(_, v)| v.clone())
                .unwrap_or_default()
        };

        // Empty names fall back to the URL
        let mut entry = ChannelEntry::new(name, url);
        entry.duration = self.duration;

        for (key, value) in self.attributes {
            let slot = match key.as_str() {
                "tvg-id" => &mut entry.tvg_id,
                "tvg-logo" => &mut entry.logo,
                "group-title" => &mut entry.group,
                _ => {
                    entry.extra.push((key, value));
                    continue;
                }
            };
            if slot.is_none() {
                *slot = metadata_field(&value);
            }
        }

        if entry.group.is_none() {
            entry.group = self.group_hint.as_deref().and_then(metadata_field);
        }

        entry
    }
}

/// Position of the first comma outside a quoted attribute value
fn title_separator(content: &str) -> Option<usize> {
    let mut in_quotes = false;
    for (idx, c) in content.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => return Some(idx),
            _ => {}
        }
    }
    None
}

fn starts_with_ignore_case(line: &str, prefix: &str) -> bool {
    line.len() >= prefix.len()
        && line.is_char_boundary(prefix.len())
        && line[..prefix.len()].eq_ignore_ascii_case(prefix)
}

/// Parse an EXTINF line
/// Format: #EXTINF:duration tvg-id="..." tvg-name="..." tvg-logo="..." group-title="...",Title
fn parse_extinf(line: &str) -> Option<ExtinfData> {
    if !starts_with_ignore_case(line, EXTINF) {
        return None;
    }

    let content = &line[EXTINF.len()..];

    // Unbalanced quotes leave no separator outside quotes
    let separator = title_separator(content)?;

    let header = &content[..separator];
    let title = collapse_whitespace(&content[separator + 1..]);

    let duration = DURATION_REGEX
        .captures(header)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(UNKNOWN_DURATION);

    let attributes = ATTR_REGEX
        .captures_iter(header)
        .map(|caps| {
            let key = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
            let value = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
            (key, value)
        })
        .collect();

    Some(ExtinfData {
        duration,
        attributes,
        title,
        group_hint: None,
    })
}

/// Parsed collection plus what was skipped on the way
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseReport {
    pub collection: Collection,
    /// Broken lines: missing header, orphan or unparsable EXTINF, oversize lines
    pub malformed: usize,
    /// URL lines with no EXTINF; kept with the URL as their name
    pub bare_urls: usize,
    /// URLs repaired by the audit
    pub fixed_urls: usize,
    /// URLs rejected by the audit, dropped with their metadata
    pub quarantined: usize,
    pub header_found: bool,
}

impl ParseReport {
    pub fn skipped(&self) -> usize {
        self.malformed + self.quarantined
    }
}

/// Parse playlist text into a collection
///
/// Bad lines are skipped and counted. Fails only when the input is empty or
/// nothing in it could be parsed.
pub fn parse_playlist(input: &str) -> Result<ParseReport> {
    let input = input.trim_start_matches('\u{feff}');
    if input.trim().is_empty() {
        return Err(PipelineError::MalformedInput("playlist is empty".to_string()));
    }

    let mut report = ParseReport::default();
    let mut entries = Vec::new();
    let mut pending: Option<ExtinfData> = None;

    for line in input.lines() {
        if line.len() > MAX_LINE_BYTES {
            tracing::debug!("Skipping line over {} bytes", MAX_LINE_BYTES);
            report.malformed += 1;
            pending = None;
            continue;
        }

        let trimmed = line.trim();

        if trimmed.is_empty() {
            continue;
        }

        // Check M3U header (may carry attributes such as url-tvg)
        if starts_with_ignore_case(trimmed, HEADER) && !starts_with_ignore_case(trimmed, "#EXTM3U8") {
            report.header_found = true;
            continue;
        }

        if starts_with_ignore_case(trimmed, EXTINF) {
            if pending.is_some() {
                // Previous EXTINF never got a URL
                report.malformed += 1;
            }
            pending = parse_extinf(trimmed);
            if pending.is_none() {
                tracing::debug!("Skipping malformed EXTINF: {}", trimmed);
                report.malformed += 1;
            }
            continue;
        }

        if starts_with_ignore_case(trimmed, EXTGRP) {
            if let Some(extinf) = pending.as_mut() {
                extinf.group_hint = Some(trimmed[EXTGRP.len()..].to_string());
            }
            continue;
        }

        // Skip other directives and comments
        if trimmed.starts_with('#') {
            continue;
        }

        // Stream URL line
        let url = match url_audit::check(trimmed) {
            Checked::Valid { url, issues } => {
                if !issues.is_empty() {
                    tracing::debug!(url = %url, issues = ?issues, "URL has soft issues");
                }
                url
            }
            Checked::Fixed { original, url } => {
                tracing::debug!("Fixed URL {} -> {}", original, url);
                report.fixed_urls += 1;
                url
            }
            Checked::Rejected { issues } => {
                tracing::debug!(line = %trimmed, issues = ?issues, "Quarantined record");
                report.quarantined += 1;
                pending = None;
                continue;
            }
        };

        let entry = match pending.take() {
            Some(extinf) => extinf.into_entry(url),
            None => {
                report.bare_urls += 1;
                ChannelEntry::new(url.clone(), url)
            }
        };
        entries.push(entry);
    }

    if pending.is_some() {
        report.malformed += 1;
    }

    if !report.header_found {
        report.malformed += 1;
    }

    if entries.is_empty() && report.skipped() > 0 {
        return Err(PipelineError::MalformedInput(format!(
            "no parsable entries ({} malformed lines, {} quarantined URLs)",
            report.malformed, report.quarantined
        )));
    }

    report.collection = Collection::new(entries);
    Ok(report)
}

fn push_attribute(line: &mut String, key: &str, value: &str) {
    line.push(' ');
    line.push_str(key);
    line.push_str("=\"");
    // Quotes cannot be escaped inside M3U attributes
    line.push_str(&value.replace('"', "'"));
    line.push('"');
}

/// Format the EXTINF line for an entry
pub fn format_extinf(entry: &ChannelEntry) -> String {
    let mut line = format!("{}{}", EXTINF, entry.duration);

    if let Some(ref tvg_id) = entry.tvg_id {
        push_attribute(&mut line, "tvg-id", tvg_id);
    }
    if let Some(ref logo) = entry.logo {
        push_attribute(&mut line, "tvg-logo", logo);
    }
    if let Some(ref group) = entry.group {
        push_attribute(&mut line, "group-title", group);
    }
    for (key, value) in &entry.extra {
        push_attribute(&mut line, key, value);
    }

    line.push(',');
    line.push_str(&entry.name);
    line
}

/// Serialize a collection into playlist text
pub fn write_playlist(collection: &Collection) -> String {
    let mut out = String::with_capacity(64 + collection.len() * 160);
    out.push_str(HEADER);
    out.push('\n');

    for entry in collection.iter() {
        out.push_str(&format_extinf(entry));
        out.push('\n');
        out.push_str(&entry.url);
        out.push('\n');
    }

    out
}
