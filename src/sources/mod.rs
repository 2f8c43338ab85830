pub mod kitsu;
pub mod mangadex;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::models::{Chapter, Manga, PageRef, SearchQuery, SortOrder};
use crate::normalize::split_id;

/// Uniform contract every source adapter implements.
///
/// Every method is mandatory; a source that cannot support an operation
/// returns an empty result instead of being partially implemented. Records
/// come back with provider-native ids — the orchestrator stamps the
/// canonical `"<sourceId>:"` prefix when merging.
#[async_trait]
pub trait MangaSource: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Manga>, SourceError>;

    async fn popular(
        &self,
        page: u32,
        include_adult: bool,
        sort: Option<SortOrder>,
    ) -> Result<Vec<Manga>, SourceError>;

    async fn latest(&self, page: u32, include_adult: bool) -> Result<Vec<Manga>, SourceError>;

    /// Fails with [`SourceError::NotFound`] when the entity is absent
    async fn manga_details(&self, native_id: &str) -> Result<Manga, SourceError>;

    async fn chapters(&self, native_manga_id: &str) -> Result<Vec<Chapter>, SourceError>;

    /// Chapter list for a chapter id; `native_manga_id` is provided when the
    /// source needs it to build page URLs
    async fn chapter_pages(
        &self,
        chapter_id: &str,
        native_manga_id: Option<&str>,
    ) -> Result<Vec<PageRef>, SourceError>;

    async fn tags(&self) -> Result<Vec<String>, SourceError>;

    /// Best-effort liveness probe. Short timeout, never errors.
    async fn check_connectivity(&self) -> bool;

    /// Fallback used during chapter consolidation when a direct id lookup
    /// yields nothing: search for the title and take the top hit's chapters.
    async fn chapters_by_title(&self, title: &str) -> Result<Vec<Chapter>, SourceError> {
        let mut query = SearchQuery::new(title);
        query.include_adult = true;
        let hits = self.search(&query).await?;
        match hits.first() {
            Some(hit) => {
                let native = split_id(&hit.id).map(|(_, n)| n).unwrap_or(&hit.id);
                self.chapters(native).await
            }
            None => Ok(Vec::new()),
        }
    }
}
