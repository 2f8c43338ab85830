//! Source registry
//!
//! Owns every registered source for the process lifetime: static metadata,
//! the live provider implementation, and the per-source rate limiter.
//! Registration happens once at startup; after that the only mutable bit is
//! the enabled flag. Iteration order is always registration order, which is
//! what makes fan-out merging deterministic.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::AggregatorError;
use crate::models::{AdultFilter, SourceDescriptor};
use crate::rate_limit::RateLimiter;
use crate::sources::MangaSource;

/// Runtime binding of a descriptor to a live provider
pub struct ProviderHandle {
    descriptor: SourceDescriptor,
    enabled: AtomicBool,
    provider: Arc<dyn MangaSource>,
    limiter: RateLimiter,
}

impl ProviderHandle {
    fn new(descriptor: SourceDescriptor, provider: Arc<dyn MangaSource>) -> Self {
        let limiter = RateLimiter::new(Duration::from_millis(descriptor.min_request_interval_ms));
        let enabled = AtomicBool::new(descriptor.enabled);
        ProviderHandle {
            descriptor,
            enabled,
            provider,
            limiter,
        }
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    pub fn is_priority(&self) -> bool {
        self.descriptor.priority
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    /// Descriptor snapshot with the live enabled flag
    pub fn descriptor(&self) -> SourceDescriptor {
        let mut d = self.descriptor.clone();
        d.enabled = self.is_enabled();
        d
    }

    pub fn is_adult(&self) -> Option<bool> {
        self.descriptor.is_adult
    }

    pub fn provider(&self) -> &dyn MangaSource {
        self.provider.as_ref()
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}

pub struct SourceRegistry {
    handles: Vec<Arc<ProviderHandle>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        SourceRegistry { handles: Vec::new() }
    }

    /// Add a source. Fails when the id is already taken.
    pub fn register(
        &mut self,
        descriptor: SourceDescriptor,
        provider: Arc<dyn MangaSource>,
    ) -> Result<(), AggregatorError> {
        if self.handles.iter().any(|h| h.id() == descriptor.id) {
            return Err(AggregatorError::DuplicateSource(descriptor.id));
        }
        self.handles.push(Arc::new(ProviderHandle::new(descriptor, provider)));
        Ok(())
    }

    /// Descriptors matching the adult filter, in registration order.
    /// Disabled sources are included — they just carry `enabled: false`.
    pub fn list_sources(&self, filter: &AdultFilter) -> Vec<SourceDescriptor> {
        self.handles
            .iter()
            .filter(|h| filter.matches(h.is_adult()))
            .map(|h| h.descriptor())
            .collect()
    }

    /// Enabled sources matching the adult filter — the default fan-out
    /// target set, in registration order
    pub fn fanout_targets(&self, filter: &AdultFilter) -> Vec<Arc<ProviderHandle>> {
        self.handles
            .iter()
            .filter(|h| h.is_enabled() && filter.matches(h.is_adult()))
            .cloned()
            .collect()
    }

    /// Look up a source by id. Resolution ignores the enabled flag so
    /// explicit single-source requests keep working when a source is
    /// disabled for fan-out.
    pub fn resolve(&self, id: &str) -> Result<Arc<ProviderHandle>, AggregatorError> {
        self.handles
            .iter()
            .find(|h| h.id() == id)
            .cloned()
            .ok_or_else(|| AggregatorError::UnknownSource(id.to_string()))
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), AggregatorError> {
        let handle = self.resolve(id)?;
        handle.set_enabled(enabled);
        Ok(())
    }

    pub fn handles(&self) -> &[Arc<ProviderHandle>] {
        &self.handles
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::models::{Chapter, Manga, PageRef, SearchQuery, SortOrder, SourceFilters};
    use async_trait::async_trait;

    struct NullSource;

    #[async_trait]
    impl MangaSource for NullSource {
        async fn search(&self, _query: &SearchQuery) -> Result<Vec<Manga>, SourceError> {
            Ok(Vec::new())
        }
        async fn popular(
            &self,
            _page: u32,
            _include_adult: bool,
            _sort: Option<SortOrder>,
        ) -> Result<Vec<Manga>, SourceError> {
            Ok(Vec::new())
        }
        async fn latest(&self, _page: u32, _include_adult: bool) -> Result<Vec<Manga>, SourceError> {
            Ok(Vec::new())
        }
        async fn manga_details(&self, native_id: &str) -> Result<Manga, SourceError> {
            Err(SourceError::NotFound(native_id.to_string()))
        }
        async fn chapters(&self, _native_manga_id: &str) -> Result<Vec<Chapter>, SourceError> {
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
            Ok(Vec::new())
        }
        async fn check_connectivity(&self) -> bool {
            true
        }
    }

    fn descriptor(id: &str, is_adult: Option<bool>) -> SourceDescriptor {
        SourceDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            description: String::new(),
            is_adult,
            enabled: true,
            priority: false,
            content_types: vec!["manga".to_string()],
            filters: SourceFilters::default(),
            min_request_interval_ms: 100,
        }
    }

    fn registry() -> SourceRegistry {
        let mut reg = SourceRegistry::new();
        reg.register(descriptor("safe", Some(false)), Arc::new(NullSource)).unwrap();
        reg.register(descriptor("adult", Some(true)), Arc::new(NullSource)).unwrap();
        reg.register(descriptor("mixed", None), Arc::new(NullSource)).unwrap();
        reg
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut reg = registry();
        let err = reg
            .register(descriptor("safe", Some(false)), Arc::new(NullSource))
            .unwrap_err();
        assert!(matches!(err, AggregatorError::DuplicateSource(id) if id == "safe"));
    }

    #[test]
    fn test_adult_filtering() {
        let reg = registry();

        let safe: Vec<String> = reg
            .list_sources(&AdultFilter::default())
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(safe, vec!["safe", "mixed"]);

        let all: Vec<String> = reg
            .list_sources(&AdultFilter { include_adult: true, adult_only: false })
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(all, vec!["safe", "adult", "mixed"]);

        let adult: Vec<String> = reg
            .list_sources(&AdultFilter { include_adult: false, adult_only: true })
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(adult, vec!["adult", "mixed"]);
    }

    #[test]
    fn test_disabled_sources_skip_fanout_but_resolve() {
        let reg = registry();
        reg.set_enabled("safe", false).unwrap();

        let targets: Vec<String> = reg
            .fanout_targets(&AdultFilter::default())
            .into_iter()
            .map(|h| h.id().to_string())
            .collect();
        assert_eq!(targets, vec!["mixed"]);

        // direct resolution still works for explicit requests
        assert!(reg.resolve("safe").is_ok());
        assert!(!reg.resolve("safe").unwrap().is_enabled());
    }

    #[test]
    fn test_unknown_source() {
        let reg = registry();
        assert!(matches!(
            reg.resolve("nope"),
            Err(AggregatorError::UnknownSource(_))
        ));
        assert!(matches!(
            reg.set_enabled("nope", true),
            Err(AggregatorError::UnknownSource(_))
        ));
    }
}
