//! Application state for the Actix-web server
//!
//! The `AppState` struct is wrapped in `web::Data` and shared across all
//! HTTP handlers. The aggregator owns every piece of mutable engine state
//! (registry flags, cache, metrics), so the state itself needs no locking.

use std::sync::Arc;

use crate::aggregator::MangaAggregator;
use crate::config::Config;

pub struct AppState {
    /// The source aggregation engine
    pub aggregator: Arc<MangaAggregator>,
    /// Application configuration
    pub config: Config,
}
