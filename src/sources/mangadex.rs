use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Deserialize;

use crate::error::SourceError;
use crate::http_client::ApiClient;
use crate::models::{
    Chapter, Manga, PageRef, SearchQuery, SortOrder, SourceDescriptor, SourceFilters,
};
use crate::normalize::{adult_from_rating, normalize_status};
use crate::sources::MangaSource;

pub const API_URL: &str = "https://api.mangadex.org";
const COVER_URL: &str = "https://uploads.mangadex.org/covers";
const PAGE_SIZE: u32 = 24;
const CHAPTER_FEED_LIMIT: u32 = 500;

#[derive(Deserialize)]
struct MangaListResponse {
    #[serde(default)]
    data: Vec<MangaData>,
}

#[derive(Deserialize)]
struct MangaDetailResponse {
    data: MangaData,
}

#[derive(Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MangaAttributes {
    #[serde(default)]
    title: HashMap<String, String>,
    #[serde(default)]
    alt_titles: Vec<HashMap<String, String>>,
    #[serde(default)]
    description: HashMap<String, String>,
    #[serde(default)]
    status: String,
    #[serde(default)]
    content_rating: String,
    #[serde(default)]
    tags: Vec<TagData>,
    #[serde(default)]
    updated_at: Option<String>,
}

#[derive(Deserialize)]
struct Relationship {
    #[serde(rename = "type")]
    rel_type: String,
    #[serde(default)]
    attributes: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct TagData {
    attributes: TagAttributes,
}

#[derive(Deserialize)]
struct TagAttributes {
    #[serde(default)]
    name: HashMap<String, String>,
}

#[derive(Deserialize)]
struct ChapterListResponse {
    #[serde(default)]
    data: Vec<ChapterData>,
}

#[derive(Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChapterAttributes {
    chapter: Option<String>,
    title: Option<String>,
    volume: Option<String>,
    #[serde(default)]
    pages: u32,
    translated_language: Option<String>,
    publish_at: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AtHomeResponse {
    base_url: String,
    chapter: AtHomeChapter,
}

#[derive(Deserialize)]
struct AtHomeChapter {
    hash: String,
    #[serde(default)]
    data: Vec<String>,
}

#[derive(Deserialize)]
struct TagListResponse {
    #[serde(default)]
    data: Vec<TagData>,
}

/// MangaDex adapter over the official JSON API
pub struct MangadexSource {
    client: ApiClient,
    api_url: String,
}

impl MangadexSource {
    pub fn new(client: ApiClient) -> Self {
        Self::with_api_url(client, API_URL)
    }

    pub fn with_api_url(client: ApiClient, api_url: &str) -> Self {
        MangadexSource {
            client,
            api_url: api_url.to_string(),
        }
    }

    pub fn descriptor() -> SourceDescriptor {
        SourceDescriptor {
            id: "mangadex".to_string(),
            name: "MangaDex".to_string(),
            description: "Official API, reliable".to_string(),
            // hosts both safe and adult content behind a rating filter
            is_adult: None,
            enabled: true,
            priority: true,
            content_types: ["manga", "manhwa", "manhua", "oneshot"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            filters: SourceFilters {
                tags: false,
                status: true,
                sort_options: vec![
                    SortOrder::Relevance,
                    SortOrder::Popular,
                    SortOrder::Latest,
                    SortOrder::Title,
                ],
            },
            min_request_interval_ms: 100,
        }
    }

    fn list_url(
        &self,
        query: Option<&str>,
        page: u32,
        include_adult: bool,
        order: (&str, &str),
        status: Option<&str>,
    ) -> Result<Url, SourceError> {
        let offset = page.saturating_sub(1) * PAGE_SIZE;
        let mut params: Vec<(&str, String)> = vec![
            ("limit", PAGE_SIZE.to_string()),
            ("offset", offset.to_string()),
            ("includes[]", "cover_art".to_string()),
            ("includes[]", "author".to_string()),
            ("includes[]", "artist".to_string()),
            (order.0, order.1.to_string()),
            ("contentRating[]", "safe".to_string()),
            ("contentRating[]", "suggestive".to_string()),
        ];
        if include_adult {
            params.push(("contentRating[]", "erotica".to_string()));
            params.push(("contentRating[]", "pornographic".to_string()));
        }
        if let Some(q) = query {
            if !q.is_empty() {
                params.push(("title", q.to_string()));
            }
        }
        if let Some(s) = status {
            params.push(("status[]", s.to_string()));
        }
        Url::parse_with_params(&format!("{}/manga", self.api_url), &params)
            .map_err(|e| SourceError::Decode(e.to_string()))
    }

    fn map_manga(data: MangaData) -> Manga {
        let attrs = data.attributes;

        let title = attrs
            .title
            .get("en")
            .or_else(|| attrs.title.get("ja"))
            .cloned()
            .unwrap_or_else(|| attrs.title.values().next().cloned().unwrap_or_default());

        let mut alt_titles: Vec<String> = Vec::new();
        for map in &attrs.alt_titles {
            for t in map.values() {
                if !t.is_empty() && *t != title && !alt_titles.contains(t) {
                    alt_titles.push(t.clone());
                }
            }
        }

        let description = attrs
            .description
            .get("en")
            .cloned()
            .or_else(|| attrs.description.values().next().cloned())
            .filter(|d| !d.is_empty());

        let cover_url = data
            .relationships
            .iter()
            .find(|r| r.rel_type == "cover_art")
            .and_then(|r| r.attributes.as_ref())
            .and_then(|a| a.get("fileName"))
            .and_then(|f| f.as_str())
            .map(|file| format!("{}/{}/{}.512.jpg", COVER_URL, data.id, file));

        let person = |kind: &str| -> String {
            data.relationships
                .iter()
                .find(|r| r.rel_type == kind)
                .and_then(|r| r.attributes.as_ref())
                .and_then(|a| a.get("name"))
                .and_then(|n| n.as_str())
                .unwrap_or("")
                .to_string()
        };

        let tags: Vec<String> = attrs
            .tags
            .iter()
            .filter_map(|t| t.attributes.name.get("en").cloned())
            .collect();

        let updated_at = attrs
            .updated_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Manga {
            id: data.id,
            title,
            alt_titles,
            description,
            cover_url,
            author: person("author"),
            artist: person("artist"),
            status: normalize_status(&attrs.status),
            tags,
            genres: Vec::new(),
            rating: None,
            is_adult: adult_from_rating(&attrs.content_rating),
            updated_at,
            source_id: String::new(),
        }
    }

    fn map_chapter(data: ChapterData) -> Chapter {
        let attrs = data.attributes;
        let scanlation_group = data
            .relationships
            .iter()
            .find(|r| r.rel_type == "scanlation_group")
            .and_then(|r| r.attributes.as_ref())
            .and_then(|a| a.get("name"))
            .and_then(|n| n.as_str())
            .unwrap_or("")
            .to_string();

        let published_at = attrs
            .publish_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        Chapter {
            id: data.id,
            manga_id: String::new(),
            chapter_number: attrs.chapter.unwrap_or_else(|| "0".to_string()),
            volume: attrs.volume,
            title: attrs.title.unwrap_or_default(),
            page_count: attrs.pages,
            language: attrs.translated_language.unwrap_or_else(|| "en".to_string()),
            scanlation_group,
            published_at,
            source_id: String::new(),
        }
    }
}

#[async_trait]
impl MangaSource for MangadexSource {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Manga>, SourceError> {
        let order = match query.sort {
            Some(SortOrder::Popular) => ("order[followedCount]", "desc"),
            Some(SortOrder::Latest) => ("order[updatedAt]", "desc"),
            Some(SortOrder::Title) => ("order[title]", "asc"),
            _ => ("order[relevance]", "desc"),
        };
        let status = query.status.map(|s| s.as_str()).filter(|s| *s != "unknown");
        let url = self.list_url(
            Some(&query.query),
            query.page,
            query.include_adult,
            order,
            status,
        )?;
        let response: MangaListResponse = self.client.get_json(url).await?;
        Ok(response.data.into_iter().map(Self::map_manga).collect())
    }

    async fn popular(
        &self,
        page: u32,
        include_adult: bool,
        _sort: Option<SortOrder>,
    ) -> Result<Vec<Manga>, SourceError> {
        let url = self.list_url(None, page, include_adult, ("order[followedCount]", "desc"), None)?;
        let response: MangaListResponse = self.client.get_json(url).await?;
        Ok(response.data.into_iter().map(Self::map_manga).collect())
    }

    async fn latest(&self, page: u32, include_adult: bool) -> Result<Vec<Manga>, SourceError> {
        let url = self.list_url(None, page, include_adult, ("order[updatedAt]", "desc"), None)?;
        let response: MangaListResponse = self.client.get_json(url).await?;
        Ok(response.data.into_iter().map(Self::map_manga).collect())
    }

    async fn manga_details(&self, native_id: &str) -> Result<Manga, SourceError> {
        let params = [
            ("includes[]", "cover_art"),
            ("includes[]", "author"),
            ("includes[]", "artist"),
        ];
        let url = Url::parse_with_params(
            &format!("{}/manga/{}", self.api_url, native_id),
            &params,
        )
        .map_err(|e| SourceError::Decode(e.to_string()))?;
        let response: MangaDetailResponse = self.client.get_json(url).await?;
        Ok(Self::map_manga(response.data))
    }

    async fn chapters(&self, native_manga_id: &str) -> Result<Vec<Chapter>, SourceError> {
        let limit = CHAPTER_FEED_LIMIT.to_string();
        let params = [
            ("manga", native_manga_id),
            ("limit", &limit),
            ("translatedLanguage[]", "en"),
            ("order[chapter]", "asc"),
            ("includes[]", "scanlation_group"),
        ];
        let url = Url::parse_with_params(&format!("{}/chapter", self.api_url), &params)
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        let response: ChapterListResponse = self.client.get_json(url).await?;
        Ok(response.data.into_iter().map(Self::map_chapter).collect())
    }

    async fn chapter_pages(
        &self,
        chapter_id: &str,
        _native_manga_id: Option<&str>,
    ) -> Result<Vec<PageRef>, SourceError> {
        let url = Url::parse(&format!("{}/at-home/server/{}", self.api_url, chapter_id))
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        let response: AtHomeResponse = self.client.get_json(url).await?;
        let pages = response
            .chapter
            .data
            .into_iter()
            .enumerate()
            .map(|(i, file)| PageRef {
                index: i as u32 + 1,
                url: format!("{}/data/{}/{}", response.base_url, response.chapter.hash, file),
            })
            .collect();
        Ok(pages)
    }

    async fn tags(&self) -> Result<Vec<String>, SourceError> {
        let url = Url::parse(&format!("{}/manga/tag", self.api_url))
            .map_err(|e| SourceError::Decode(e.to_string()))?;
        let response: TagListResponse = self.client.get_json(url).await?;
        let mut tags: Vec<String> = response
            .data
            .into_iter()
            .filter_map(|t| t.attributes.name.get("en").cloned())
            .collect();
        tags.sort();
        Ok(tags)
    }

    async fn check_connectivity(&self) -> bool {
        match Url::parse(&format!("{}/ping", self.api_url)) {
            Ok(url) => self.client.probe(url, Duration::from_secs(5)).await,
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MangaStatus;

    fn sample_manga_json() -> serde_json::Value {
        serde_json::json!({
            "id": "a1b2",
            "attributes": {
                "title": { "en": "Test Manga", "ja": "テスト" },
                "altTitles": [ { "ja": "テスト" } ],
                "description": { "en": "A test." },
                "status": "ongoing",
                "contentRating": "erotica",
                "tags": [ { "attributes": { "name": { "en": "Action" } } } ],
                "updatedAt": "2024-03-01T12:00:00+00:00"
            },
            "relationships": [
                { "type": "cover_art", "attributes": { "fileName": "cover.jpg" } },
                { "type": "author", "attributes": { "name": "Author A" } }
            ]
        })
    }

    #[test]
    fn test_map_manga() {
        let data: MangaData = serde_json::from_value(sample_manga_json()).unwrap();
        let manga = MangadexSource::map_manga(data);
        assert_eq!(manga.id, "a1b2");
        assert_eq!(manga.title, "Test Manga");
        assert_eq!(manga.alt_titles, vec!["テスト"]);
        assert_eq!(manga.status, MangaStatus::Ongoing);
        assert!(manga.is_adult);
        assert_eq!(manga.author, "Author A");
        assert_eq!(
            manga.cover_url.as_deref(),
            Some("https://uploads.mangadex.org/covers/a1b2/cover.jpg.512.jpg")
        );
        assert_eq!(manga.tags, vec!["Action"]);
        assert!(manga.updated_at.is_some());
    }

    #[test]
    fn test_map_manga_tolerates_missing_fields() {
        let data: MangaData =
            serde_json::from_value(serde_json::json!({ "id": "x", "attributes": {} })).unwrap();
        let manga = MangadexSource::map_manga(data);
        assert_eq!(manga.id, "x");
        assert_eq!(manga.title, "");
        assert_eq!(manga.status, MangaStatus::Unknown);
        assert!(!manga.is_adult);
        assert!(manga.cover_url.is_none());
    }

    #[test]
    fn test_map_chapter() {
        let data: ChapterData = serde_json::from_value(serde_json::json!({
            "id": "ch-1",
            "attributes": {
                "chapter": "12.5",
                "title": "Interlude",
                "volume": "2",
                "pages": 18,
                "translatedLanguage": "en",
                "publishAt": "2024-02-10T00:00:00+00:00"
            },
            "relationships": [
                { "type": "scanlation_group", "attributes": { "name": "Group X" } }
            ]
        }))
        .unwrap();
        let chapter = MangadexSource::map_chapter(data);
        assert_eq!(chapter.chapter_number, "12.5");
        assert_eq!(chapter.volume.as_deref(), Some("2"));
        assert_eq!(chapter.page_count, 18);
        assert_eq!(chapter.scanlation_group, "Group X");
    }

    #[test]
    fn test_list_url_adult_gating() {
        let source = MangadexSource::new(ApiClient::new().unwrap());
        let safe = source
            .list_url(Some("naruto"), 1, false, ("order[relevance]", "desc"), None)
            .unwrap();
        assert!(!safe.as_str().contains("pornographic"));
        let adult = source
            .list_url(Some("naruto"), 1, true, ("order[relevance]", "desc"), None)
            .unwrap();
        assert!(adult.as_str().contains("erotica"));
        assert!(adult.as_str().contains("pornographic"));
    }
}
