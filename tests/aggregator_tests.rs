//! Integration tests for the fan-out orchestrator, driven by scripted mock
//! sources with configurable delays and failures. Timing-sensitive tests run
//! under tokio's paused clock so they are instant and deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use manga_aggregator::aggregator::MangaAggregator;
use manga_aggregator::config::AggregationConfig;
use manga_aggregator::error::{AggregatorError, SourceError};
use manga_aggregator::models::{
    Chapter, ListOptions, Manga, MangaStatus, PageRef, QueryOptions, SearchQuery, SortOrder,
    SourceDescriptor, SourceFilters,
};
use manga_aggregator::registry::SourceRegistry;
use manga_aggregator::sources::MangaSource;

fn work(title: &str) -> Manga {
    let slug = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect::<String>();
    Manga {
        id: slug,
        title: title.to_string(),
        alt_titles: Vec::new(),
        description: None,
        cover_url: None,
        author: "Unknown".to_string(),
        artist: "Unknown".to_string(),
        status: MangaStatus::Ongoing,
        tags: Vec::new(),
        genres: Vec::new(),
        rating: None,
        is_adult: false,
        updated_at: None,
        source_id: String::new(),
    }
}

fn chapter(number: &str, page_count: u32) -> Chapter {
    Chapter {
        id: format!("ch-{}", number),
        manga_id: String::new(),
        chapter_number: number.to_string(),
        volume: None,
        title: String::new(),
        page_count,
        language: "en".to_string(),
        scanlation_group: String::new(),
        published_at: None,
        source_id: String::new(),
    }
}

fn descriptor(id: &str, priority: bool, is_adult: Option<bool>) -> SourceDescriptor {
    SourceDescriptor {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        is_adult,
        enabled: true,
        priority,
        content_types: vec!["manga".to_string()],
        filters: SourceFilters::default(),
        // no pacing noise in tests
        min_request_interval_ms: 0,
    }
}

/// Scripted source: fixed result set, optional delay, optional failure
struct MockSource {
    works: Vec<Manga>,
    chapters: Vec<Chapter>,
    tag_list: Vec<String>,
    delay: Duration,
    fail: bool,
    calls: Arc<AtomicUsize>,
}

impl MockSource {
    fn new(titles: &[&str]) -> Self {
        MockSource {
            works: titles.iter().map(|t| work(t)).collect(),
            chapters: Vec::new(),
            tag_list: Vec::new(),
            delay: Duration::ZERO,
            fail: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    fn with_chapters(mut self, chapters: Vec<Chapter>) -> Self {
        self.chapters = chapters;
        self
    }

    fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tag_list = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }

    async fn respond(&self) -> Result<Vec<Manga>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(SourceError::Decode("simulated failure".to_string()));
        }
        Ok(self.works.clone())
    }
}

#[async_trait]
impl MangaSource for MockSource {
    async fn search(&self, _query: &SearchQuery) -> Result<Vec<Manga>, SourceError> {
        self.respond().await
    }

    async fn popular(
        &self,
        _page: u32,
        _include_adult: bool,
        _sort: Option<SortOrder>,
    ) -> Result<Vec<Manga>, SourceError> {
        self.respond().await
    }

    async fn latest(&self, _page: u32, _include_adult: bool) -> Result<Vec<Manga>, SourceError> {
        self.respond().await
    }

    async fn manga_details(&self, native_id: &str) -> Result<Manga, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SourceError::Decode("simulated failure".to_string()));
        }
        self.works
            .iter()
            .find(|m| m.id == native_id)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(native_id.to_string()))
    }

    async fn chapters(&self, _native_manga_id: &str) -> Result<Vec<Chapter>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail {
            return Err(SourceError::Decode("simulated failure".to_string()));
        }
        Ok(self.chapters.clone())
    }

    async fn chapter_pages(
        &self,
        chapter_id: &str,
        _native_manga_id: Option<&str>,
    ) -> Result<Vec<PageRef>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(SourceError::NotFound(chapter_id.to_string()));
        }
        Ok(vec![PageRef {
            index: 1,
            url: format!("https://example.com/{}/1.jpg", chapter_id),
        }])
    }

    async fn tags(&self) -> Result<Vec<String>, SourceError> {
        Ok(self.tag_list.clone())
    }

    async fn check_connectivity(&self) -> bool {
        !self.fail
    }
}

fn test_config() -> AggregationConfig {
    AggregationConfig {
        priority_deadline_ms: 3000,
        overall_deadline_ms: 3500,
        ..Default::default()
    }
}

fn build(sources: Vec<(SourceDescriptor, MockSource)>) -> MangaAggregator {
    let mut registry = SourceRegistry::new();
    for (desc, source) in sources {
        registry.register(desc, Arc::new(source)).unwrap();
    }
    MangaAggregator::new(Arc::new(registry), test_config())
}

fn titles(results: &[Manga]) -> Vec<&str> {
    results.iter().map(|m| m.title.as_str()).collect()
}

#[tokio::test]
async fn test_ids_round_trip_to_source() {
    let aggregator = build(vec![
        (descriptor("alpha", true, None), MockSource::new(&["Naruto"])),
        (descriptor("beta", false, None), MockSource::new(&["Bleach"])),
    ]);

    let results = aggregator.search("x", &QueryOptions::default()).await;
    assert_eq!(results.len(), 2);
    for manga in &results {
        let source_id = manga.id.split(':').next().unwrap();
        assert_eq!(source_id, manga.source_id);
    }
}

#[tokio::test]
async fn test_dedup_is_deterministic_and_first_seen_wins() {
    let aggregator = build(vec![
        (
            descriptor("alpha", true, None),
            MockSource::new(&["Naruto", "Bleach"]),
        ),
        (
            descriptor("beta", false, None),
            MockSource::new(&["NARUTO!!", "One Piece"]),
        ),
    ]);

    let first = aggregator.search("naruto", &QueryOptions::default()).await;
    assert_eq!(titles(&first), vec!["Naruto", "Bleach", "One Piece"]);
    // the beta copy of Naruto was dropped, not merged
    assert!(first.iter().all(|m| m.source_id == "alpha" || m.title == "One Piece"));

    // repeated runs merge to the same sequence
    for _ in 0..3 {
        aggregator.reset();
        let again = aggregator.search("naruto", &QueryOptions::default()).await;
        assert_eq!(titles(&again), titles(&first));
    }
}

#[tokio::test]
async fn test_all_sources_failing_degrades_to_empty() {
    let aggregator = build(vec![
        (descriptor("alpha", true, None), MockSource::new(&["A"]).failing()),
        (descriptor("beta", false, None), MockSource::new(&["B"]).failing()),
        (descriptor("gamma", false, None), MockSource::new(&["C"]).failing()),
    ]);

    assert!(aggregator.search("x", &QueryOptions::default()).await.is_empty());
    aggregator.reset();
    assert!(aggregator.popular(&ListOptions::default()).await.is_empty());
    aggregator.reset();
    assert!(aggregator.latest(&ListOptions::default()).await.is_empty());
}

#[tokio::test]
async fn test_failing_source_does_not_poison_siblings() {
    // the broken source is the priority/primary one
    let aggregator = build(vec![
        (descriptor("broken", true, None), MockSource::new(&["X"]).failing()),
        (descriptor("alpha", false, None), MockSource::new(&["Naruto"])),
    ]);

    // the fallback chain skips the broken primary and still yields results
    let results = aggregator.popular(&ListOptions::default()).await;
    assert_eq!(titles(&results), vec!["Naruto"]);

    aggregator.reset();
    let results = aggregator.search("naruto", &QueryOptions::default()).await;
    assert_eq!(titles(&results), vec!["Naruto"]);
}

#[tokio::test(start_paused = true)]
async fn test_search_is_bounded_when_every_source_hangs() {
    let hang = Duration::from_secs(3600);
    let aggregator = build(vec![
        (
            descriptor("alpha", true, None),
            MockSource::new(&["A"]).with_delay(hang),
        ),
        (
            descriptor("beta", false, None),
            MockSource::new(&["B"]).with_delay(hang),
        ),
    ]);

    let started = tokio::time::Instant::now();
    let results = aggregator.search("x", &QueryOptions::default()).await;
    assert!(results.is_empty());
    // bounded by the overall deadline, not by the hanging sources
    assert!(started.elapsed() <= Duration::from_millis(3600));
}

#[tokio::test(start_paused = true)]
async fn test_slow_secondary_source_is_excluded() {
    let alpha = MockSource::new(&["Naruto"]).with_delay(Duration::from_millis(200));
    let beta = MockSource::new(&["NARUTO!!"]).with_delay(Duration::from_millis(4000));

    let aggregator = build(vec![
        (descriptor("alpha", true, None), alpha),
        (descriptor("beta", false, None), beta),
    ]);

    let started = tokio::time::Instant::now();
    let results = aggregator.search("naruto", &QueryOptions::default()).await;

    // beta's answer lands after its contribution window closed
    assert_eq!(titles(&results), vec!["Naruto"]);
    assert!(started.elapsed() <= Duration::from_millis(3600));
}

#[tokio::test]
async fn test_enough_priority_results_skip_secondary_sources() {
    let alpha = MockSource::new(&["A", "B", "C"]);
    let beta = MockSource::new(&["D"]);
    let beta_calls = beta.call_counter();

    let aggregator = build(vec![
        (descriptor("alpha", true, None), alpha),
        (descriptor("beta", false, None), beta),
    ]);

    let opts = QueryOptions {
        limit: 2,
        ..Default::default()
    };
    let results = aggregator.search("x", &opts).await;
    assert_eq!(titles(&results), vec!["A", "B"]);
    assert_eq!(beta_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_chapter_merge_keeps_higher_page_count() {
    let alpha = MockSource::new(&["Naruto"]).with_chapters(vec![
        chapter("2", 10),
        chapter("12", 5),
    ]);
    let beta = MockSource::new(&["Naruto"]).with_chapters(vec![
        chapter("12", 10),
        chapter("1.5", 3),
    ]);

    let aggregator = build(vec![
        (descriptor("alpha", true, None), alpha),
        (descriptor("beta", false, None), beta),
    ]);

    let chapters = aggregator
        .chapters_from_all_sources("alpha:naruto", Some("Naruto"), false)
        .await;

    let numbers: Vec<&str> = chapters.iter().map(|c| c.chapter_number.as_str()).collect();
    assert_eq!(numbers, vec!["1.5", "2", "12"]);

    let twelve = chapters.iter().find(|c| c.chapter_number == "12").unwrap();
    assert_eq!(twelve.page_count, 10);
    assert_eq!(twelve.source_id, "beta");

    // every merged chapter carries the canonical manga id
    assert!(chapters.iter().all(|c| c.manga_id == "alpha:naruto"));
}

#[tokio::test]
async fn test_cache_hit_skips_fanout_and_expires() {
    let alpha = MockSource::new(&["Naruto"]);
    let calls = alpha.call_counter();

    let mut registry = SourceRegistry::new();
    registry
        .register(descriptor("alpha", true, None), Arc::new(alpha))
        .unwrap();
    let config = AggregationConfig {
        list_cache_ttl_secs: 1,
        ..test_config()
    };
    let aggregator = MangaAggregator::new(Arc::new(registry), config);

    let opts = QueryOptions::default();
    aggregator.search("naruto", &opts).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // within the TTL window: served from cache, no provider contact
    aggregator.search("naruto", &opts).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    // different parameters miss the cache
    let other = QueryOptions { page: 2, ..Default::default() };
    aggregator.search("naruto", &other).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // after expiry the fan-out runs again
    std::thread::sleep(Duration::from_millis(1100));
    aggregator.search("naruto", &opts).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_disabled_source_skips_fanout_but_serves_explicit_requests() {
    let beta = MockSource::new(&["Bleach"]);
    let beta_calls = beta.call_counter();

    let aggregator = build(vec![
        (descriptor("alpha", true, None), MockSource::new(&["Naruto"])),
        (descriptor("beta", false, None), beta),
    ]);
    aggregator.set_source_enabled("beta", false).unwrap();

    let results = aggregator.search("x", &QueryOptions::default()).await;
    assert_eq!(titles(&results), vec!["Naruto"]);
    assert_eq!(beta_calls.load(Ordering::SeqCst), 0);

    // explicit source list bypasses the enabled flag
    aggregator.reset();
    let opts = QueryOptions {
        sources: Some(vec!["beta".to_string()]),
        ..Default::default()
    };
    let results = aggregator.search("x", &opts).await;
    assert_eq!(titles(&results), vec!["Bleach"]);
    assert_eq!(beta_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_adult_sources_need_opt_in() {
    let adult = MockSource::new(&["Lewd"]);
    let adult_calls = adult.call_counter();

    let aggregator = build(vec![
        (descriptor("alpha", true, Some(false)), MockSource::new(&["Naruto"])),
        (descriptor("nhx", false, Some(true)), adult),
    ]);

    let results = aggregator.search("x", &QueryOptions::default()).await;
    assert_eq!(titles(&results), vec!["Naruto"]);
    assert_eq!(adult_calls.load(Ordering::SeqCst), 0);

    aggregator.reset();
    let opts = QueryOptions {
        include_adult: true,
        ..Default::default()
    };
    let results = aggregator.search("x", &opts).await;
    assert_eq!(titles(&results), vec!["Naruto", "Lewd"]);

    aggregator.reset();
    let opts = QueryOptions {
        adult_only: true,
        ..Default::default()
    };
    let results = aggregator.search("x", &opts).await;
    assert_eq!(titles(&results), vec!["Lewd"]);
}

#[tokio::test]
async fn test_popular_falls_back_when_primary_is_empty() {
    let aggregator = build(vec![
        (descriptor("alpha", true, None), MockSource::new(&[])),
        (descriptor("beta", false, None), MockSource::new(&["Backup Hit"])),
    ]);

    let results = aggregator.popular(&ListOptions::default()).await;
    assert_eq!(titles(&results), vec!["Backup Hit"]);
}

#[tokio::test]
async fn test_manga_details_routing() {
    let aggregator = build(vec![(
        descriptor("alpha", true, None),
        MockSource::new(&["Naruto"]),
    )]);

    let manga = aggregator.manga_details("alpha:naruto").await.unwrap();
    assert_eq!(manga.title, "Naruto");
    assert_eq!(manga.id, "alpha:naruto");

    // provider miss
    let err = aggregator.manga_details("alpha:nope").await.unwrap_err();
    assert!(matches!(err, AggregatorError::NotFound(_)));

    // unknown owning source
    let err = aggregator.manga_details("ghost:naruto").await.unwrap_err();
    assert!(matches!(err, AggregatorError::NotFound(_)));

    // malformed id without a prefix
    let err = aggregator.manga_details("naruto").await.unwrap_err();
    assert!(matches!(err, AggregatorError::NotFound(_)));
}

#[tokio::test]
async fn test_chapter_pages_requires_known_source() {
    let aggregator = build(vec![(
        descriptor("alpha", true, None),
        MockSource::new(&["Naruto"]),
    )]);

    let pages = aggregator.chapter_pages("ch-1", "alpha").await.unwrap();
    assert_eq!(pages.len(), 1);
    assert_eq!(pages[0].index, 1);

    let err = aggregator.chapter_pages("ch-1", "ghost").await.unwrap_err();
    assert!(matches!(err, AggregatorError::UnknownSource(_)));
}

#[tokio::test]
async fn test_tags_union_and_per_source_map() {
    let aggregator = build(vec![
        (
            descriptor("alpha", true, None),
            MockSource::new(&["A"]).with_tags(&["Action", "Drama"]),
        ),
        (
            descriptor("beta", false, None),
            MockSource::new(&["B"]).with_tags(&["Action", "Romance"]),
        ),
    ]);

    let response = aggregator.tags_for_sources(None, false).await;
    assert_eq!(response.tags, vec!["Action", "Drama", "Romance"]);
    assert_eq!(
        response.by_source.get("alpha").unwrap(),
        &vec!["Action".to_string(), "Drama".to_string()]
    );
    assert_eq!(
        response.by_source.get("beta").unwrap(),
        &vec!["Action".to_string(), "Romance".to_string()]
    );
}

#[tokio::test]
async fn test_connectivity_probe_reports_per_source() {
    let aggregator = build(vec![
        (descriptor("alpha", true, None), MockSource::new(&["A"])),
        (descriptor("broken", false, None), MockSource::new(&["B"]).failing()),
    ]);

    let statuses = aggregator.check_sources().await;
    assert_eq!(statuses.len(), 2);
    assert!(statuses.iter().find(|s| s.id == "alpha").unwrap().available);
    assert!(!statuses.iter().find(|s| s.id == "broken").unwrap().available);
}

#[tokio::test]
async fn test_metrics_record_successes_and_failures() {
    let aggregator = build(vec![
        (descriptor("alpha", true, None), MockSource::new(&["A"])),
        (descriptor("broken", true, None), MockSource::new(&["B"]).failing()),
    ]);

    aggregator.search("x", &QueryOptions::default()).await;

    let alpha = aggregator.metrics().get("alpha").unwrap();
    assert_eq!(alpha.successful_requests, 1);
    let broken = aggregator.metrics().get("broken").unwrap();
    assert_eq!(broken.failed_requests, 1);
    assert!(broken.last_error.is_some());
}
