use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::Value;

use crate::error::SourceError;
use crate::http_client::ApiClient;
use crate::models::{
    Chapter, Manga, PageRef, SearchQuery, SortOrder, SourceDescriptor, SourceFilters,
};
use crate::normalize::normalize_status;
use crate::sources::MangaSource;

pub const API_URL: &str = "https://kitsu.io/api/edge";
const PAGE_SIZE: u32 = 24;

/// Kitsu adapter over the JSON:API catalog.
///
/// Kitsu is a metadata database: it knows titles, ratings and statuses but
/// hosts no chapters, so the content operations return empty lists.
pub struct KitsuSource {
    client: ApiClient,
    api_url: String,
}

impl KitsuSource {
    pub fn new(client: ApiClient) -> Self {
        Self::with_api_url(client, API_URL)
    }

    pub fn with_api_url(client: ApiClient, api_url: &str) -> Self {
        KitsuSource {
            client,
            api_url: api_url.to_string(),
        }
    }

    pub fn descriptor() -> SourceDescriptor {
        SourceDescriptor {
            id: "kitsu".to_string(),
            name: "Kitsu".to_string(),
            description: "Manga database with a reliable JSON API".to_string(),
            is_adult: Some(false),
            enabled: true,
            priority: false,
            content_types: ["manga", "manhwa", "oneshot"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            filters: SourceFilters {
                tags: false,
                status: true,
                sort_options: vec![SortOrder::Popular, SortOrder::Latest],
            },
            min_request_interval_ms: 500,
        }
    }

    async fn fetch_list(&self, url: Url) -> Result<Vec<Manga>, SourceError> {
        let response: Value = self.client.get_json(url).await?;
        let items = response
            .get("data")
            .and_then(|d| d.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(items.iter().filter_map(Self::map_manga).collect())
    }

    fn map_manga(item: &Value) -> Option<Manga> {
        let id = item.get("id")?.as_str()?.to_string();
        let attrs = item.get("attributes")?;

        let title = attrs
            .pointer("/canonicalTitle")
            .or_else(|| attrs.pointer("/titles/en"))
            .or_else(|| attrs.pointer("/titles/en_jp"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let alt_titles: Vec<String> = attrs
            .pointer("/titles")
            .and_then(|v| v.as_object())
            .map(|map| {
                map.values()
                    .filter_map(|v| v.as_str())
                    .filter(|t| !t.is_empty() && *t != title)
                    .map(|t| t.to_string())
                    .collect()
            })
            .unwrap_or_default();

        let cover_url = ["large", "medium", "small", "original"]
            .iter()
            .find_map(|size| {
                attrs
                    .pointer(&format!("/posterImage/{}", size))
                    .and_then(|v| v.as_str())
            })
            .map(|s| s.to_string());

        // averageRating is a 0-100 string, normalized to 0-10
        let rating = attrs
            .pointer("/averageRating")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<f64>().ok())
            .map(|r| r / 10.0);

        let updated_at = attrs
            .pointer("/updatedAt")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Some(Manga {
            id,
            title,
            alt_titles,
            description: attrs
                .pointer("/synopsis")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string()),
            cover_url,
            author: String::new(),
            artist: String::new(),
            status: normalize_status(
                attrs.pointer("/status").and_then(|v| v.as_str()).unwrap_or(""),
            ),
            tags: Vec::new(),
            genres: Vec::new(),
            rating,
            is_adult: attrs.pointer("/ageRating").and_then(|v| v.as_str()) == Some("R18"),
            updated_at,
            source_id: String::new(),
        })
    }
}

#[async_trait]
impl MangaSource for KitsuSource {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Manga>, SourceError> {
        let limit = PAGE_SIZE.to_string();
        let offset = (query.page.saturating_sub(1) * PAGE_SIZE).to_string();
        let params = [
            ("filter[text]", query.query.as_str()),
            ("page[limit]", limit.as_str()),
            ("page[offset]", offset.as_str()),
        ];
        let url = Url::parse_with_params(&format!("{}/manga", self.api_url), &params)
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        self.fetch_list(url).await
    }

    async fn popular(
        &self,
        page: u32,
        _include_adult: bool,
        _sort: Option<SortOrder>,
    ) -> Result<Vec<Manga>, SourceError> {
        let limit = PAGE_SIZE.to_string();
        let offset = (page.saturating_sub(1) * PAGE_SIZE).to_string();
        let params = [
            ("sort", "-userCount"),
            ("page[limit]", limit.as_str()),
            ("page[offset]", offset.as_str()),
        ];
        let url = Url::parse_with_params(&format!("{}/manga", self.api_url), &params)
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        self.fetch_list(url).await
    }

    async fn latest(&self, page: u32, _include_adult: bool) -> Result<Vec<Manga>, SourceError> {
        let limit = PAGE_SIZE.to_string();
        let offset = (page.saturating_sub(1) * PAGE_SIZE).to_string();
        let params = [
            ("sort", "-updatedAt"),
            ("page[limit]", limit.as_str()),
            ("page[offset]", offset.as_str()),
        ];
        let url = Url::parse_with_params(&format!("{}/manga", self.api_url), &params)
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        self.fetch_list(url).await
    }

    async fn manga_details(&self, native_id: &str) -> Result<Manga, SourceError> {
        let url = Url::parse(&format!("{}/manga/{}", self.api_url, native_id))
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        let response: Value = self.client.get_json(url).await?;
        response
            .get("data")
            .and_then(Self::map_manga)
            .ok_or_else(|| SourceError::NotFound(native_id.to_string()))
    }

    async fn chapters(&self, _native_manga_id: &str) -> Result<Vec<Chapter>, SourceError> {
        // metadata source, no hosted chapters
        Ok(Vec::new())
    }

    async fn chapter_pages(
        &self,
        _chapter_id: &str,
        _native_manga_id: Option<&str>,
    ) -> Result<Vec<PageRef>, SourceError> {
        Ok(Vec::new())
    }

    async fn tags(&self) -> Result<Vec<String>, SourceError> {
        let params = [("page[limit]", "60")];
        let url = Url::parse_with_params(&format!("{}/genres", self.api_url), &params)
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        let response: Value = self.client.get_json(url).await?;
        let mut tags: Vec<String> = response
            .get("data")
            .and_then(|d| d.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item.pointer("/attributes/name"))
                    .filter_map(|v| v.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();
        tags.sort();
        Ok(tags)
    }

    async fn check_connectivity(&self) -> bool {
        let url = match Url::parse_with_params(
            &format!("{}/manga", self.api_url),
            &[("page[limit]", "1")],
        ) {
            Ok(url) => url,
            Err(_) => return false,
        };
        self.client.probe(url, Duration::from_secs(5)).await
    }
}
