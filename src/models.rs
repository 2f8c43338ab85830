use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Publication status, normalized across all sources
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MangaStatus {
    Ongoing,
    Completed,
    Hiatus,
    Cancelled,
    Unknown,
}

impl MangaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MangaStatus::Ongoing => "ongoing",
            MangaStatus::Completed => "completed",
            MangaStatus::Hiatus => "hiatus",
            MangaStatus::Cancelled => "cancelled",
            MangaStatus::Unknown => "unknown",
        }
    }
}

/// Sort orders a source may support for list queries
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Relevance,
    Popular,
    Latest,
    Title,
}

/// Canonical catalog entry. The `id` is always `"<sourceId>:<nativeSlug>"`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Manga {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub alt_titles: Vec<String>,
    pub description: Option<String>,
    pub cover_url: Option<String>,
    pub author: String,
    pub artist: String,
    pub status: MangaStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    pub rating: Option<f64>,
    pub is_adult: bool,
    pub updated_at: Option<DateTime<Utc>>,
    pub source_id: String,
}

/// Canonical chapter entry. `id` is the provider-native chapter id and is
/// only unique within its source; `chapter_number` keeps the raw decimal
/// string ("12.5") and is never parsed for identity.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Chapter {
    pub id: String,
    pub manga_id: String,
    pub chapter_number: String,
    pub volume: Option<String>,
    pub title: String,
    pub page_count: u32,
    pub language: String,
    pub scanlation_group: String,
    pub published_at: Option<DateTime<Utc>>,
    pub source_id: String,
}

/// One page of a chapter
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PageRef {
    pub index: u32,
    pub url: String,
}

/// Which filter capabilities a source exposes natively
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SourceFilters {
    pub tags: bool,
    pub status: bool,
    #[serde(default)]
    pub sort_options: Vec<SortOrder>,
}

/// Static metadata for a registered source.
///
/// `is_adult` is tri-state: `Some(false)` = always safe, `Some(true)` =
/// always adult, `None` = mixed content shown under both filters.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SourceDescriptor {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub is_adult: Option<bool>,
    pub enabled: bool,
    /// Member of the priority fan-out tier (fast, reliable, queried first)
    #[serde(default)]
    pub priority: bool,
    #[serde(default)]
    pub content_types: Vec<String>,
    #[serde(default)]
    pub filters: SourceFilters,
    /// Minimum pacing between outbound requests to this source
    #[serde(default = "default_min_interval")]
    pub min_request_interval_ms: u64,
}

fn default_min_interval() -> u64 {
    100
}

/// Adult-content filter applied when selecting sources.
///
/// Query-string form: `adult=false` → safe only, `adult=true` → everything,
/// `adult=only` → 18+ only.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default)]
pub struct AdultFilter {
    pub include_adult: bool,
    pub adult_only: bool,
}

impl AdultFilter {
    /// Tri-state match: mixed sources always pass, adult sources need
    /// `include_adult` or `adult_only`, safe sources pass unless `adult_only`.
    pub fn matches(&self, is_adult: Option<bool>) -> bool {
        match is_adult {
            None => true,
            Some(true) => self.include_adult || self.adult_only,
            Some(false) => !self.adult_only,
        }
    }
}

/// Search parameters handed to each provider
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SearchQuery {
    pub query: String,
    pub page: u32,
    pub include_adult: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    pub status: Option<MangaStatus>,
    pub sort: Option<SortOrder>,
}

impl SearchQuery {
    pub fn new(query: &str) -> Self {
        SearchQuery {
            query: query.to_string(),
            page: 1,
            ..Default::default()
        }
    }
}

/// Options for aggregate search requests
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct QueryOptions {
    /// Explicit source ids; bypasses the enabled flag when set
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub include_adult: bool,
    #[serde(default)]
    pub adult_only: bool,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub exclude_tags: Vec<String>,
    pub status: Option<MangaStatus>,
    pub sort: Option<SortOrder>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for QueryOptions {
    fn default() -> Self {
        QueryOptions {
            sources: None,
            include_adult: false,
            adult_only: false,
            page: 1,
            tags: Vec::new(),
            exclude_tags: Vec::new(),
            status: None,
            sort: None,
            limit: default_limit(),
        }
    }
}

impl QueryOptions {
    pub fn adult_filter(&self) -> AdultFilter {
        AdultFilter {
            include_adult: self.include_adult,
            adult_only: self.adult_only,
        }
    }
}

/// Options for aggregate popular/latest requests
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ListOptions {
    pub sources: Option<Vec<String>>,
    #[serde(default)]
    pub include_adult: bool,
    #[serde(default)]
    pub adult_only: bool,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

impl Default for ListOptions {
    fn default() -> Self {
        ListOptions {
            sources: None,
            include_adult: false,
            adult_only: false,
            page: 1,
            limit: default_limit(),
        }
    }
}

impl ListOptions {
    pub fn adult_filter(&self) -> AdultFilter {
        AdultFilter {
            include_adult: self.include_adult,
            adult_only: self.adult_only,
        }
    }
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> usize {
    24
}

/// A content type entry for the sources listing
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ContentType {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SourcesResponse {
    pub sources: Vec<SourceDescriptor>,
    pub enabled: Vec<String>,
    pub content_types: Vec<ContentType>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagsResponse {
    pub tags: Vec<String>,
    pub by_source: HashMap<String, Vec<String>>,
}

/// Result of a connectivity probe against one source
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SourceStatus {
    pub id: String,
    pub name: String,
    pub available: bool,
    pub last_check: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_adult_filter_tristate() {
        let safe_only = AdultFilter { include_adult: false, adult_only: false };
        let everything = AdultFilter { include_adult: true, adult_only: false };
        let adult_only = AdultFilter { include_adult: false, adult_only: true };

        // mixed passes every filter
        assert!(safe_only.matches(None));
        assert!(everything.matches(None));
        assert!(adult_only.matches(None));

        // always-adult needs include_adult or adult_only
        assert!(!safe_only.matches(Some(true)));
        assert!(everything.matches(Some(true)));
        assert!(adult_only.matches(Some(true)));

        // always-safe is excluded only by adult_only
        assert!(safe_only.matches(Some(false)));
        assert!(everything.matches(Some(false)));
        assert!(!adult_only.matches(Some(false)));
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let s = serde_json::to_string(&MangaStatus::Ongoing).unwrap();
        assert_eq!(s, "\"ongoing\"");
    }
}
