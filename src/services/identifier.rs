//! Identifier extraction from media file names and paths
//!
//! Parses names like:
//! - "Alien (1979) {tmdb-348}.mkv"
//! - "Severance S01E02 1080p WEB h264.mkv"
//! - "The Thing [imdb-tt0084787]/thing.remux.mkv"

use std::path::Path;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::trace;

static TMDB_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\{\[]\s*tmdb(?:id)?\s*[-=:]?\s*(\d+)\s*[\}\]]").unwrap());
static IMDB_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\{\[]\s*imdb(?:id)?\s*[-=:]?\s*(tt\d+)\s*[\}\]]").unwrap());
static TVDB_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)[\{\[]\s*tvdb(?:id)?\s*[-=:]?\s*(\d+)\s*[\}\]]").unwrap());
static ANY_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\{\[][^\}\]]*[\}\]]").unwrap());
static SXXEYY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b[Ss](\d{1,2})\s*[Ee](\d{1,3})\b").unwrap());
static NXNN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{1,2})x(\d{2,3})\b").unwrap());
static VERBOSE_EP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\bSeason\s*(\d{1,2})\b.*?\bEpisode\s*(\d{1,3})\b").unwrap());
static YEAR_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").unwrap());
static SPACE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Structured identifiers extracted from a single name or merged from
/// several path segments
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedIds {
    /// Primary catalog id (TMDB numbering)
    pub tmdb_id: Option<i64>,
    /// Alternate catalog id, IMDb namespace
    pub imdb_id: Option<String>,
    /// Alternate catalog id, TheTVDB namespace
    pub tvdb_id: Option<i64>,
    pub year: Option<i32>,
    pub season: Option<u32>,
    pub episode: Option<u32>,
    /// Cleaned freeform title guess, used for search fallback
    pub title: Option<String>,
}

impl ExtractedIds {
    /// True when no field matched at all
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when the entry can drive a metadata lookup (an id or a title)
    pub fn is_usable(&self) -> bool {
        self.tmdb_id.is_some() || self.title.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Field-by-field merge, `self` taking priority over `fallback`
    pub fn merged_over(self, fallback: ExtractedIds) -> ExtractedIds {
        ExtractedIds {
            tmdb_id: self.tmdb_id.or(fallback.tmdb_id),
            imdb_id: self.imdb_id.or(fallback.imdb_id),
            tvdb_id: self.tvdb_id.or(fallback.tvdb_id),
            year: self.year.or(fallback.year),
            season: self.season.or(fallback.season),
            episode: self.episode.or(fallback.episode),
            title: self.title.or(fallback.title),
        }
    }
}

/// Extract identifiers from a single filename or path segment.
///
/// Never fails; a name with nothing recognizable yields empty fields.
pub fn extract(name: &str) -> ExtractedIds {
    let mut ids = ExtractedIds {
        tmdb_id: TMDB_TAG_RE
            .captures(name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok()),
        imdb_id: IMDB_TAG_RE
            .captures(name)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase()),
        tvdb_id: TVDB_TAG_RE
            .captures(name)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok()),
        ..Default::default()
    };

    // Strip bracketed tags and the extension before positional parsing so a
    // tag id is never mistaken for a year or title text
    let stem = strip_extension(name);
    let untagged = ANY_TAG_RE.replace_all(stem, " ");
    let cleaned = untagged.replace(['.', '_'], " ");

    let mut title_end = cleaned.len();

    if let Some(caps) = SXXEYY_RE.captures(&cleaned) {
        ids.season = caps.get(1).and_then(|m| m.as_str().parse().ok());
        ids.episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
        title_end = title_end.min(caps.get(0).unwrap().start());
    } else if let Some(caps) = NXNN_RE.captures(&cleaned) {
        ids.season = caps.get(1).and_then(|m| m.as_str().parse().ok());
        ids.episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
        title_end = title_end.min(caps.get(0).unwrap().start());
    } else if let Some(caps) = VERBOSE_EP_RE.captures(&cleaned) {
        ids.season = caps.get(1).and_then(|m| m.as_str().parse().ok());
        ids.episode = caps.get(2).and_then(|m| m.as_str().parse().ok());
        title_end = title_end.min(caps.get(0).unwrap().start());
    }

    if let Some(caps) = YEAR_RE.captures(&cleaned) {
        ids.year = caps.get(1).and_then(|m| m.as_str().parse().ok());
        title_end = title_end.min(caps.get(0).unwrap().start());
    }

    let title = clean_title(&cleaned[..title_end]);
    if !title.is_empty() {
        ids.title = Some(title);
    }

    trace!(name = name, ids = ?ids, "Extracted identifiers");
    ids
}

/// Extract identifiers from a full path: the filename extraction merged over
/// the containing-path extraction, filename taking priority per field.
pub fn extract_from_path(path: &Path) -> ExtractedIds {
    let file_ids = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(extract)
        .unwrap_or_default();

    // Walk ancestors nearest-first so the closest directory wins among them
    let mut parent_ids = ExtractedIds::default();
    for ancestor in path.ancestors().skip(1) {
        if let Some(segment) = ancestor.file_name().and_then(|n| n.to_str()) {
            parent_ids = parent_ids.merged_over(extract(segment));
        }
    }

    // Directory names carry no episode numbering worth trusting
    parent_ids.episode = None;

    file_ids.merged_over(parent_ids)
}

/// Drop a trailing media-style extension (short alphanumeric suffix)
fn strip_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, ext))
            if !stem.is_empty() && (1..=4).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphanumeric()) =>
        {
            stem
        }
        _ => name,
    }
}

/// Clean up a freeform title fragment
fn clean_title(raw: &str) -> String {
    let trimmed = raw.trim_matches(|c: char| c.is_whitespace() || c == '-' || c == '(' || c == ')');
    SPACE_RE.replace_all(trimmed, " ").trim().to_string()
}
