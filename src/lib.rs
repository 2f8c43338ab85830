// Library interface for the manga aggregation engine
// This allows tests and external crates to use the engine components

pub mod aggregator;
pub mod app_state;
pub mod cache;
pub mod config;
pub mod error;
pub mod http_client;
pub mod metrics;
pub mod models;
pub mod normalize;
pub mod rate_limit;
pub mod registry;
pub mod sources;
