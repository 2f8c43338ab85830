//! Normalization helpers for provider records
//!
//! Everything here is total: malformed upstream data degrades to defaults
//! instead of failing the batch.
//!
//! - Status strings are folded into [`MangaStatus`] by substring matching
//! - Canonical ids are `"<sourceId>:<nativeId>"` and split on the first `:`
//! - Title normalization for cross-source dedup is a pluggable strategy

use crate::models::{Chapter, Manga, MangaStatus};

/// Fold a raw provider status string into the canonical enum
pub fn normalize_status(raw: &str) -> MangaStatus {
    let s = raw.to_lowercase();
    if s.contains("ongoing") || s.contains("releasing") || s.contains("current") {
        MangaStatus::Ongoing
    } else if s.contains("complete") || s.contains("finished") {
        MangaStatus::Completed
    } else if s.contains("hiatus") {
        MangaStatus::Hiatus
    } else if s.contains("cancel") {
        MangaStatus::Cancelled
    } else {
        MangaStatus::Unknown
    }
}

/// Content-rating buckets that imply adult content
pub fn adult_from_rating(rating: &str) -> bool {
    matches!(rating, "erotica" | "pornographic")
}

/// Build a canonical id from a source id and a provider-native id
pub fn canonical_id(source_id: &str, native_id: &str) -> String {
    format!("{}:{}", source_id, native_id)
}

/// Split a canonical id into (source_id, native_id) on the first `:`
pub fn split_id(id: &str) -> Option<(&str, &str)> {
    let mut parts = id.splitn(2, ':');
    match (parts.next(), parts.next()) {
        (Some(source), Some(native)) if !source.is_empty() => Some((source, native)),
        _ => None,
    }
}

/// Numeric value of a chapter number string, for ordering only
pub fn chapter_sort_key(chapter_number: &str) -> f64 {
    if let Ok(n) = chapter_number.trim().parse::<f64>() {
        return n;
    }
    regex::Regex::new(r"(\d+(?:\.\d+)?)")
        .ok()
        .and_then(|re| {
            re.captures(chapter_number)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        })
        .unwrap_or(0.0)
}

/// Strategy for normalizing titles before dedup comparison
pub trait TitleNormalizer: Send + Sync {
    fn normalize(&self, title: &str) -> String;
}

/// Default normalization: lowercase, strip non-word characters, collapse
/// whitespace
pub struct DefaultTitleNormalizer;

impl TitleNormalizer for DefaultTitleNormalizer {
    fn normalize(&self, title: &str) -> String {
        let lowered = title.to_lowercase();
        let stripped: String = lowered
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
            .collect();
        stripped.split_whitespace().collect::<Vec<_>>().join(" ")
    }
}

/// Stamp a provider record with its owning source and fill missing fields.
///
/// Adapters hand back records with native ids; this enforces the id prefix
/// invariant and the field defaults in one place.
pub fn finalize_manga(mut manga: Manga, source_id: &str) -> Manga {
    let prefix = format!("{}:", source_id);
    if !manga.id.starts_with(&prefix) {
        manga.id = canonical_id(source_id, &manga.id);
    }
    manga.source_id = source_id.to_string();
    if manga.title.trim().is_empty() {
        manga.title = manga.id.clone();
    }
    if manga.author.trim().is_empty() {
        manga.author = "Unknown".to_string();
    }
    if manga.artist.trim().is_empty() {
        manga.artist = manga.author.clone();
    }
    manga
}

/// Stamp a chapter with its owning source and canonical manga id
pub fn finalize_chapter(mut chapter: Chapter, source_id: &str, manga_id: &str) -> Chapter {
    chapter.source_id = source_id.to_string();
    chapter.manga_id = manga_id.to_string();
    if chapter.language.trim().is_empty() {
        chapter.language = "en".to_string();
    }
    if chapter.chapter_number.trim().is_empty() {
        chapter.chapter_number = "0".to_string();
    }
    chapter
}
