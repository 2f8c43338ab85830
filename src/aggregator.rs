//! Fan-out orchestrator
//!
//! Executes one logical operation against a set of sources concurrently,
//! bounding total wall-clock time regardless of how many sources are slow or
//! hanging. One slow or failing source can never block or corrupt results
//! from the others: every provider call is isolated, and a fault becomes an
//! empty contribution for that source only.
//!
//! Two deadlines bound each aggregate operation: a short one for the
//! priority tier and an absolute one measured from request start. Both are
//! soft — a source that misses its window is abandoned, not cancelled, and
//! its eventual result is discarded. Merging happens only after each tier's
//! race has resolved, in registration order, so first-seen-wins dedup is
//! deterministic for a fixed source configuration.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tokio::time::timeout;

use crate::cache::TtlCache;
use crate::config::AggregationConfig;
use crate::error::{AggregatorError, SourceError};
use crate::metrics::MetricsTracker;
use crate::models::{
    AdultFilter, Chapter, ContentType, ListOptions, Manga, PageRef, QueryOptions, SearchQuery,
    SortOrder, SourceStatus, SourcesResponse, TagsResponse,
};
use crate::normalize::{self, DefaultTitleNormalizer, TitleNormalizer};
use crate::registry::{ProviderHandle, SourceRegistry};

/// Content types the API can describe, filtered per request to those the
/// matching sources actually serve
const CONTENT_TYPES: &[(&str, &str, &str)] = &[
    ("manga", "Manga", "Japanese comics"),
    ("manhwa", "Manhwa", "Korean comics"),
    ("manhua", "Manhua", "Chinese comics"),
    ("doujinshi", "Doujinshi", "Fan-made/indie works"),
    ("oneshot", "One-shot", "Single chapter works"),
    ("comic", "Comic", "General comics"),
];

#[derive(Clone)]
enum ListOp {
    Search(SearchQuery),
    Popular {
        page: u32,
        include_adult: bool,
        sort: Option<SortOrder>,
    },
    Latest {
        page: u32,
        include_adult: bool,
    },
}

impl ListOp {
    fn label(&self) -> &'static str {
        match self {
            ListOp::Search(_) => "search",
            ListOp::Popular { .. } => "popular",
            ListOp::Latest { .. } => "latest",
        }
    }
}

pub struct MangaAggregator {
    registry: Arc<SourceRegistry>,
    cache: TtlCache,
    metrics: MetricsTracker,
    normalizer: Box<dyn TitleNormalizer>,
    config: AggregationConfig,
}

impl MangaAggregator {
    pub fn new(registry: Arc<SourceRegistry>, config: AggregationConfig) -> Self {
        Self::with_normalizer(registry, config, Box::new(DefaultTitleNormalizer))
    }

    pub fn with_normalizer(
        registry: Arc<SourceRegistry>,
        config: AggregationConfig,
        normalizer: Box<dyn TitleNormalizer>,
    ) -> Self {
        MangaAggregator {
            registry,
            cache: TtlCache::new(),
            metrics: MetricsTracker::new(),
            normalizer,
            config,
        }
    }

    pub fn metrics(&self) -> &MetricsTracker {
        &self.metrics
    }

    pub fn cache(&self) -> &TtlCache {
        &self.cache
    }

    /// Drop all cached results and metrics. Teardown hook for tests.
    #[allow(dead_code)]
    pub fn reset(&self) {
        self.cache.clear();
        self.metrics.reset();
    }

    fn priority_deadline(&self) -> Duration {
        Duration::from_millis(self.config.priority_deadline_ms)
    }

    fn overall_deadline(&self) -> Duration {
        Duration::from_millis(self.config.overall_deadline_ms)
    }

    fn list_ttl(&self) -> Duration {
        Duration::from_secs(self.config.list_cache_ttl_secs)
    }

    /// Target set for a fan-out: explicit source ids bypass the enabled
    /// flag (unknown ids are silently dropped), otherwise the registry's
    /// enabled sources matching the adult filter.
    fn targets(&self, sources: Option<&[String]>, filter: &AdultFilter) -> Vec<Arc<ProviderHandle>> {
        match sources {
            Some(ids) if !ids.is_empty() => ids
                .iter()
                .filter_map(|id| self.registry.resolve(id).ok())
                .collect(),
            _ => self.registry.fanout_targets(filter),
        }
    }

    /// One isolated provider call: pace, dispatch, record metrics, and turn
    /// any fault into an empty contribution
    async fn collect(&self, handle: Arc<ProviderHandle>, op: &ListOp) -> Vec<Manga> {
        handle.limiter().wait_turn().await;
        let started = Instant::now();
        let result = match op {
            ListOp::Search(query) => handle.provider().search(query).await,
            ListOp::Popular {
                page,
                include_adult,
                sort,
            } => handle.provider().popular(*page, *include_adult, *sort).await,
            ListOp::Latest { page, include_adult } => {
                handle.provider().latest(*page, *include_adult).await
            }
        };
        match result {
            Ok(list) => {
                self.metrics.record_success(handle.id(), started.elapsed());
                list.into_iter()
                    .map(|m| normalize::finalize_manga(m, handle.id()))
                    .collect()
            }
            Err(e) => {
                self.metrics.record_failure(handle.id(), e.to_string());
                log::warn!("[{}] {} failed: {}", handle.id(), op.label(), e);
                Vec::new()
            }
        }
    }

    /// First-seen-wins merge keyed by normalized title
    fn merge_works(&self, merged: &mut Vec<Manga>, seen: &mut HashSet<String>, list: Vec<Manga>) {
        for manga in list {
            let key = self.normalizer.normalize(&manga.title);
            if seen.insert(key) {
                merged.push(manga);
            }
        }
    }

    /// Tiered fan-out: priority sources raced against the short deadline,
    /// then (if the accumulator is still short of `limit`) a bounded number
    /// of remaining sources raced against what is left of the absolute
    /// deadline.
    async fn fan_out(
        &self,
        targets: Vec<Arc<ProviderHandle>>,
        op: ListOp,
        limit: usize,
    ) -> Vec<Manga> {
        let started = tokio::time::Instant::now();
        let (mut tier, mut remainder): (Vec<_>, Vec<_>) =
            targets.into_iter().partition(|h| h.is_priority());
        // no priority sources configured: run everything as the first tier
        if tier.is_empty() {
            std::mem::swap(&mut tier, &mut remainder);
        }

        let mut seen = HashSet::new();
        let mut merged = Vec::new();

        let tier_round = join_all(tier.iter().map(|h| self.collect(h.clone(), &op)));
        match timeout(self.priority_deadline(), tier_round).await {
            Ok(lists) => {
                for list in lists {
                    self.merge_works(&mut merged, &mut seen, list);
                }
            }
            Err(_) => {
                for h in &tier {
                    self.metrics.record_deadline_miss(h.id());
                }
                log::warn!(
                    "priority tier missed the {}ms deadline for {}",
                    self.config.priority_deadline_ms,
                    op.label()
                );
            }
        }

        if merged.len() >= limit {
            merged.truncate(limit);
            return merged;
        }

        remainder.truncate(self.config.max_secondary_sources);
        if !remainder.is_empty() {
            let budget = self.overall_deadline().saturating_sub(started.elapsed());
            if budget > Duration::ZERO {
                let round = join_all(remainder.iter().map(|h| self.collect(h.clone(), &op)));
                match timeout(budget, round).await {
                    Ok(lists) => {
                        for list in lists {
                            self.merge_works(&mut merged, &mut seen, list);
                        }
                    }
                    Err(_) => {
                        for h in &remainder {
                            self.metrics.record_deadline_miss(h.id());
                        }
                    }
                }
            }
        }

        merged.truncate(limit);
        merged
    }

    /// Two-level fallback for popular/latest: best source first with a
    /// short deadline, full fan-out only when it comes back empty
    async fn primary_with_fallback(
        &self,
        mut targets: Vec<Arc<ProviderHandle>>,
        op: ListOp,
        limit: usize,
    ) -> Vec<Manga> {
        if targets.is_empty() {
            return Vec::new();
        }
        let started = tokio::time::Instant::now();
        let primary_idx = targets.iter().position(|h| h.is_priority()).unwrap_or(0);
        let primary = targets.remove(primary_idx);

        let mut results =
            match timeout(self.priority_deadline(), self.collect(primary.clone(), &op)).await {
                Ok(list) => list,
                Err(_) => {
                    self.metrics.record_deadline_miss(primary.id());
                    Vec::new()
                }
            };
        if !results.is_empty() {
            results.truncate(limit);
            return results;
        }
        log::warn!(
            "[{}] primary {} returned nothing, falling back",
            primary.id(),
            op.label()
        );

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        targets.truncate(self.config.max_secondary_sources);
        let budget = self.overall_deadline().saturating_sub(started.elapsed());
        if !targets.is_empty() && budget > Duration::ZERO {
            let round = join_all(targets.iter().map(|h| self.collect(h.clone(), &op)));
            match timeout(budget, round).await {
                Ok(lists) => {
                    for list in lists {
                        self.merge_works(&mut merged, &mut seen, list);
                    }
                }
                Err(_) => {
                    for h in &targets {
                        self.metrics.record_deadline_miss(h.id());
                    }
                }
            }
        }
        merged.truncate(limit);
        merged
    }

    /// Search across sources. Never fails: provider faults degrade to
    /// partial or empty results.
    pub async fn search(&self, query: &str, opts: &QueryOptions) -> Vec<Manga> {
        let key = format!("search:{}:{}", query, params_key(opts));
        self.cache
            .get_or_fetch(&key, self.list_ttl(), || async move {
                let targets = self.targets(opts.sources.as_deref(), &opts.adult_filter());
                let search_query = SearchQuery {
                    query: query.to_string(),
                    page: opts.page,
                    include_adult: opts.include_adult || opts.adult_only,
                    tags: opts.tags.clone(),
                    exclude_tags: opts.exclude_tags.clone(),
                    status: opts.status,
                    sort: opts.sort,
                };
                let mut results = self
                    .fan_out(targets, ListOp::Search(search_query), opts.limit)
                    .await;

                // post-filters for sources without native support
                if let Some(status) = opts.status {
                    results.retain(|m| m.status == status);
                }
                match opts.sort {
                    Some(SortOrder::Title) => results.sort_by(|a, b| a.title.cmp(&b.title)),
                    Some(SortOrder::Latest) => {
                        results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at))
                    }
                    _ => {}
                }
                results
            })
            .await
    }

    pub async fn popular(&self, opts: &ListOptions) -> Vec<Manga> {
        let key = format!("popular:{}", params_key(opts));
        self.cache
            .get_or_fetch(&key, self.list_ttl(), || async move {
                let targets = self.targets(opts.sources.as_deref(), &opts.adult_filter());
                let op = ListOp::Popular {
                    page: opts.page,
                    include_adult: opts.include_adult || opts.adult_only,
                    sort: Some(SortOrder::Popular),
                };
                self.primary_with_fallback(targets, op, opts.limit).await
            })
            .await
    }

    pub async fn latest(&self, opts: &ListOptions) -> Vec<Manga> {
        let key = format!("latest:{}", params_key(opts));
        self.cache
            .get_or_fetch(&key, self.list_ttl(), || async move {
                let targets = self.targets(opts.sources.as_deref(), &opts.adult_filter());
                let op = ListOp::Latest {
                    page: opts.page,
                    include_adult: opts.include_adult || opts.adult_only,
                };
                let mut results = self.primary_with_fallback(targets, op, opts.limit).await;
                results.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                results
            })
            .await
    }

    /// Details from the owning source. The id's prefix names the source;
    /// an unknown source or a provider miss both surface as `NotFound`.
    pub async fn manga_details(&self, id: &str) -> Result<Manga, AggregatorError> {
        let (source_id, native) =
            normalize::split_id(id).ok_or_else(|| AggregatorError::NotFound(id.to_string()))?;
        let handle = self
            .registry
            .resolve(source_id)
            .map_err(|_| AggregatorError::NotFound(id.to_string()))?;

        let key = format!("manga:{}", id);
        self.cache
            .get_or_try_fetch(&key, self.list_ttl(), || async move {
                handle.limiter().wait_turn().await;
                let started = Instant::now();
                match handle.provider().manga_details(native).await {
                    Ok(manga) => {
                        self.metrics.record_success(handle.id(), started.elapsed());
                        Ok(normalize::finalize_manga(manga, handle.id()))
                    }
                    Err(SourceError::NotFound(what)) => {
                        self.metrics.record_failure(handle.id(), "not found".to_string());
                        Err(AggregatorError::NotFound(what))
                    }
                    Err(e) => {
                        self.metrics.record_failure(handle.id(), e.to_string());
                        Err(AggregatorError::Source(e))
                    }
                }
            })
            .await
    }

    /// One isolated chapter lookup. The owning source gets a direct id
    /// lookup with a by-title fallback; other sources are only ever searched
    /// by title.
    async fn collect_chapters(
        &self,
        handle: Arc<ProviderHandle>,
        manga_id: &str,
        title: Option<&str>,
    ) -> Vec<Chapter> {
        handle.limiter().wait_turn().await;
        let started = Instant::now();
        let owning = normalize::split_id(manga_id)
            .map(|(source_id, _)| source_id == handle.id())
            .unwrap_or(false);

        let result = if owning {
            let native = normalize::split_id(manga_id)
                .map(|(_, native)| native)
                .unwrap_or(manga_id);
            match handle.provider().chapters(native).await {
                Ok(list) if list.is_empty() => match title {
                    Some(t) => handle.provider().chapters_by_title(t).await,
                    None => Ok(list),
                },
                other => other,
            }
        } else {
            match title {
                Some(t) => handle.provider().chapters_by_title(t).await,
                None => Ok(Vec::new()),
            }
        };

        match result {
            Ok(list) => {
                self.metrics.record_success(handle.id(), started.elapsed());
                if !list.is_empty() {
                    log::debug!("[{}] found {} chapters", handle.id(), list.len());
                }
                list.into_iter()
                    .map(|c| normalize::finalize_chapter(c, handle.id(), manga_id))
                    .collect()
            }
            Err(e) => {
                self.metrics.record_failure(handle.id(), e.to_string());
                log::warn!("[{}] chapter lookup failed: {}", handle.id(), e);
                Vec::new()
            }
        }
    }

    /// Consolidated chapter list across every enabled source. Chapters
    /// colliding on (number, language) keep the copy with more pages;
    /// output is sorted ascending by the numeric chapter value.
    pub async fn chapters_from_all_sources(
        &self,
        manga_id: &str,
        title: Option<&str>,
        include_adult: bool,
    ) -> Vec<Chapter> {
        let key = format!("chapters:{}:{}", manga_id, include_adult);
        self.cache
            .get_or_fetch(&key, self.list_ttl(), || async move {
                let filter = AdultFilter {
                    include_adult,
                    adult_only: false,
                };
                let targets = self.registry.fanout_targets(&filter);
                let deadline = self.overall_deadline();

                let rounds = join_all(targets.iter().map(|handle| {
                    let handle = handle.clone();
                    async move {
                        match timeout(deadline, self.collect_chapters(handle.clone(), manga_id, title))
                            .await
                        {
                            Ok(list) => list,
                            Err(_) => {
                                self.metrics.record_deadline_miss(handle.id());
                                Vec::new()
                            }
                        }
                    }
                }))
                .await;

                let mut by_key: HashMap<(String, String), Chapter> = HashMap::new();
                for list in rounds {
                    for chapter in list {
                        let key = (chapter.chapter_number.clone(), chapter.language.clone());
                        match by_key.get(&key) {
                            Some(existing) if existing.page_count >= chapter.page_count => {}
                            _ => {
                                by_key.insert(key, chapter);
                            }
                        }
                    }
                }

                let mut chapters: Vec<Chapter> = by_key.into_values().collect();
                chapters.sort_by(|a, b| {
                    normalize::chapter_sort_key(&a.chapter_number)
                        .partial_cmp(&normalize::chapter_sort_key(&b.chapter_number))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.chapter_number.cmp(&b.chapter_number))
                        .then_with(|| a.language.cmp(&b.language))
                });
                chapters
            })
            .await
    }

    /// Pages for a chapter from an explicitly named source
    pub async fn chapter_pages(
        &self,
        chapter_id: &str,
        source_id: &str,
    ) -> Result<Vec<PageRef>, AggregatorError> {
        let handle = self.registry.resolve(source_id)?;
        let key = format!("pages:{}:{}", source_id, chapter_id);
        self.cache
            .get_or_try_fetch(&key, self.list_ttl(), || async move {
                handle.limiter().wait_turn().await;
                let started = Instant::now();
                match handle.provider().chapter_pages(chapter_id, None).await {
                    Ok(pages) => {
                        self.metrics.record_success(handle.id(), started.elapsed());
                        Ok(pages)
                    }
                    Err(SourceError::NotFound(what)) => {
                        self.metrics.record_failure(handle.id(), "not found".to_string());
                        Err(AggregatorError::NotFound(what))
                    }
                    Err(e) => {
                        self.metrics.record_failure(handle.id(), e.to_string());
                        Err(AggregatorError::Source(e))
                    }
                }
            })
            .await
    }

    /// Union of tags across the targeted sources plus a per-source map
    pub async fn tags_for_sources(
        &self,
        source_ids: Option<&[String]>,
        include_adult: bool,
    ) -> TagsResponse {
        let scope = source_ids
            .map(|ids| ids.join(","))
            .unwrap_or_else(|| "all".to_string());
        let key = format!("tags:{}:{}", scope, include_adult);
        let ttl = Duration::from_secs(self.config.tags_cache_ttl_secs);

        self.cache
            .get_or_fetch(&key, ttl, || async move {
                let filter = AdultFilter {
                    include_adult,
                    adult_only: false,
                };
                let targets = self.targets(source_ids, &filter);
                let deadline = self.overall_deadline();

                let rounds = join_all(targets.iter().map(|handle| {
                    let handle = handle.clone();
                    async move {
                        handle.limiter().wait_turn().await;
                        match timeout(deadline, handle.provider().tags()).await {
                            Ok(Ok(tags)) => (handle.id().to_string(), tags),
                            Ok(Err(e)) => {
                                log::warn!("[{}] tags failed: {}", handle.id(), e);
                                (handle.id().to_string(), Vec::new())
                            }
                            Err(_) => {
                                self.metrics.record_deadline_miss(handle.id());
                                (handle.id().to_string(), Vec::new())
                            }
                        }
                    }
                }))
                .await;

                let mut union: HashSet<String> = HashSet::new();
                let mut by_source = HashMap::new();
                for (id, tags) in rounds {
                    for tag in &tags {
                        union.insert(tag.clone());
                    }
                    if !tags.is_empty() {
                        by_source.insert(id, tags);
                    }
                }
                let mut tags: Vec<String> = union.into_iter().collect();
                tags.sort();
                TagsResponse { tags, by_source }
            })
            .await
    }

    /// Descriptors matching the filter, the enabled subset, and the content
    /// types those sources serve
    pub fn list_sources(&self, filter: &AdultFilter) -> SourcesResponse {
        let sources = self.registry.list_sources(filter);
        let enabled = sources
            .iter()
            .filter(|d| d.enabled)
            .map(|d| d.id.clone())
            .collect();

        let served: HashSet<&str> = sources
            .iter()
            .flat_map(|d| d.content_types.iter().map(String::as_str))
            .collect();
        let content_types = CONTENT_TYPES
            .iter()
            .filter(|(id, _, _)| served.contains(id))
            .map(|(id, name, description)| ContentType {
                id: id.to_string(),
                name: name.to_string(),
                description: description.to_string(),
            })
            .collect();

        SourcesResponse {
            sources,
            enabled,
            content_types,
        }
    }

    pub fn set_source_enabled(&self, id: &str, enabled: bool) -> Result<(), AggregatorError> {
        self.registry.set_enabled(id, enabled)
    }

    /// Probe every registered source. Results are cached briefly so the
    /// status endpoint cannot hammer upstreams.
    pub async fn check_sources(&self) -> Vec<SourceStatus> {
        let ttl = Duration::from_secs(self.config.status_cache_ttl_secs);
        self.cache
            .get_or_fetch("status", ttl, || async move {
                let probe_timeout = Duration::from_secs(self.config.connectivity_timeout_secs);
                join_all(self.registry.handles().iter().map(|handle| {
                    let handle = handle.clone();
                    async move {
                        let available = timeout(probe_timeout, handle.provider().check_connectivity())
                            .await
                            .unwrap_or(false);
                        SourceStatus {
                            id: handle.id().to_string(),
                            name: handle.name().to_string(),
                            available,
                            last_check: Utc::now().timestamp(),
                        }
                    }
                }))
                .await
            })
            .await
    }
}

/// Stable serialization of request parameters for cache keys
fn params_key<T: Serialize>(params: &T) -> String {
    serde_json::to_string(params).unwrap_or_default()
}
