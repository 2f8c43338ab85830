use thiserror::Error;

/// Errors raised inside a provider implementation
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response shape: {0}")]
    Decode(String),

    #[error("not found: {0}")]
    NotFound(String),
}

/// Errors surfaced by the aggregation engine.
///
/// Aggregate operations (search/popular/latest/chapter consolidation) never
/// return these for provider faults — partial or empty results are success.
/// Single-source operations propagate `NotFound`/`UnknownSource` since there
/// is no fallback target.
#[derive(Debug, Error)]
pub enum AggregatorError {
    #[error("unknown source: {0}")]
    UnknownSource(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("source already registered: {0}")]
    DuplicateSource(String),

    #[error(transparent)]
    Source(#[from] SourceError),
}
