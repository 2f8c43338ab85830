mod aggregator;
mod app_state;
mod cache;
mod config;
mod error;
mod http_client;
mod metrics;
mod models;
mod normalize;
mod rate_limit;
mod registry;
mod sources;

use std::collections::HashMap;
use std::sync::Arc;

use actix_web::{get, post, web, App, HttpResponse, HttpServer, Responder};
use log::{error, info};
use serde::Deserialize;
use serde_json::json;

use crate::aggregator::MangaAggregator;
use crate::app_state::AppState;
use crate::config::Config;
use crate::error::AggregatorError;
use crate::models::{AdultFilter, ListOptions, MangaStatus, QueryOptions, SortOrder};
use crate::registry::SourceRegistry;
use crate::sources::kitsu::KitsuSource;
use crate::sources::mangadex::MangadexSource;

type Query = web::Query<HashMap<String, String>>;

/// adult=false → safe only, adult=true → everything, adult=only → 18+ only
fn parse_adult(query: &HashMap<String, String>) -> AdultFilter {
    let adult = query.get("adult").map(String::as_str).unwrap_or("false");
    let adult_only = adult == "only";
    AdultFilter {
        include_adult: adult == "true" || adult_only,
        adult_only,
    }
}

fn parse_csv(query: &HashMap<String, String>, key: &str) -> Option<Vec<String>> {
    query
        .get(key)
        .map(|s| {
            s.split(',')
                .map(|x| x.trim().to_string())
                .filter(|x| !x.is_empty())
                .collect::<Vec<String>>()
        })
        .filter(|v| !v.is_empty())
}

fn parse_page(query: &HashMap<String, String>) -> u32 {
    query
        .get("page")
        .and_then(|s| s.parse::<u32>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1)
}

fn parse_sort(raw: &str) -> Option<SortOrder> {
    match raw {
        "relevance" => Some(SortOrder::Relevance),
        "popular" => Some(SortOrder::Popular),
        "latest" | "updated" => Some(SortOrder::Latest),
        "title" => Some(SortOrder::Title),
        _ => None,
    }
}

fn parse_status(raw: &str) -> Option<MangaStatus> {
    match raw {
        "ongoing" => Some(MangaStatus::Ongoing),
        "completed" => Some(MangaStatus::Completed),
        "hiatus" => Some(MangaStatus::Hiatus),
        "cancelled" => Some(MangaStatus::Cancelled),
        _ => None,
    }
}

fn error_response(err: AggregatorError) -> HttpResponse {
    match err {
        AggregatorError::NotFound(_) | AggregatorError::UnknownSource(_) => {
            HttpResponse::NotFound().json(json!({ "error": err.to_string() }))
        }
        AggregatorError::DuplicateSource(_) => {
            HttpResponse::Conflict().json(json!({ "error": err.to_string() }))
        }
        AggregatorError::Source(_) => {
            HttpResponse::InternalServerError().json(json!({ "error": err.to_string() }))
        }
    }
}

#[get("/api/sources")]
async fn get_sources(data: web::Data<AppState>, query: Query) -> impl Responder {
    let filter = parse_adult(&query);
    HttpResponse::Ok().json(data.aggregator.list_sources(&filter))
}

#[derive(Deserialize)]
struct ToggleRequest {
    enabled: bool,
}

#[post("/api/sources/{id}/toggle")]
async fn toggle_source(
    data: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<ToggleRequest>,
) -> impl Responder {
    let success = data.aggregator.set_source_enabled(&id, body.enabled).is_ok();
    HttpResponse::Ok().json(json!({ "success": success }))
}

#[get("/api/sources/status")]
async fn source_status(data: web::Data<AppState>) -> impl Responder {
    let statuses = data.aggregator.check_sources().await;
    HttpResponse::Ok().json(statuses)
}

#[get("/api/manga/search")]
async fn search_manga(data: web::Data<AppState>, query: Query) -> impl Responder {
    let filter = parse_adult(&query);
    let q = query.get("q").cloned().unwrap_or_default();
    let limit = query
        .get("limit")
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|l| *l >= 1)
        .unwrap_or(data.config.aggregation.default_limit);

    // empty query falls back to a popular listing
    let results = if q.is_empty() {
        let opts = ListOptions {
            sources: parse_csv(&query, "sources"),
            include_adult: filter.include_adult,
            adult_only: filter.adult_only,
            page: parse_page(&query),
            limit,
        };
        data.aggregator.popular(&opts).await
    } else {
        let opts = QueryOptions {
            sources: parse_csv(&query, "sources"),
            include_adult: filter.include_adult,
            adult_only: filter.adult_only,
            page: parse_page(&query),
            tags: parse_csv(&query, "tags").unwrap_or_default(),
            exclude_tags: parse_csv(&query, "exclude").unwrap_or_default(),
            status: query.get("status").and_then(|s| parse_status(s)),
            sort: query.get("sort").and_then(|s| parse_sort(s)),
            limit,
        };
        data.aggregator.search(&q, &opts).await
    };

    HttpResponse::Ok().json(json!({ "total": results.len(), "data": results }))
}

#[get("/api/manga/popular")]
async fn get_popular(data: web::Data<AppState>, query: Query) -> impl Responder {
    let filter = parse_adult(&query);
    let opts = ListOptions {
        sources: parse_csv(&query, "sources"),
        include_adult: filter.include_adult,
        adult_only: filter.adult_only,
        page: parse_page(&query),
        limit: data.config.aggregation.default_limit,
    };
    let results = data.aggregator.popular(&opts).await;
    HttpResponse::Ok().json(json!({ "total": results.len(), "data": results }))
}

#[get("/api/manga/latest")]
async fn get_latest(data: web::Data<AppState>, query: Query) -> impl Responder {
    let filter = parse_adult(&query);
    let opts = ListOptions {
        sources: parse_csv(&query, "sources"),
        include_adult: filter.include_adult,
        adult_only: filter.adult_only,
        page: parse_page(&query),
        limit: data.config.aggregation.default_limit,
    };
    let results = data.aggregator.latest(&opts).await;
    HttpResponse::Ok().json(json!({ "total": results.len(), "data": results }))
}

#[get("/api/manga/{id}")]
async fn get_manga(data: web::Data<AppState>, id: web::Path<String>) -> impl Responder {
    match data.aggregator.manga_details(&id).await {
        Ok(manga) => HttpResponse::Ok().json(manga),
        Err(e) => error_response(e),
    }
}

#[get("/api/manga/{id}/chapters")]
async fn get_chapters(data: web::Data<AppState>, id: web::Path<String>, query: Query) -> impl Responder {
    let filter = parse_adult(&query);
    let title = query.get("title").map(String::as_str);
    let chapters = data
        .aggregator
        .chapters_from_all_sources(&id, title, filter.include_adult)
        .await;
    HttpResponse::Ok().json(json!({ "total": chapters.len(), "data": chapters }))
}

#[get("/api/chapters/{chapter_id}/pages")]
async fn get_chapter_pages(
    data: web::Data<AppState>,
    chapter_id: web::Path<String>,
    query: Query,
) -> impl Responder {
    let source_id = match query.get("source") {
        Some(s) if !s.is_empty() => s.clone(),
        _ => {
            return HttpResponse::BadRequest()
                .json(json!({ "error": "missing 'source' query parameter" }))
        }
    };
    match data.aggregator.chapter_pages(&chapter_id, &source_id).await {
        Ok(pages) => HttpResponse::Ok().json(pages),
        Err(e) => error_response(e),
    }
}

#[get("/api/tags")]
async fn get_tags(data: web::Data<AppState>, query: Query) -> impl Responder {
    let filter = parse_adult(&query);
    let sources = parse_csv(&query, "sources");
    let tags = data
        .aggregator
        .tags_for_sources(sources.as_deref(), filter.include_adult)
        .await;
    HttpResponse::Ok().json(tags)
}

#[get("/api/metrics")]
async fn get_metrics(data: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(data.aggregator.metrics().snapshot())
}

fn build_registry(config: &Config) -> SourceRegistry {
    let mut registry = SourceRegistry::new();

    let mangadex_client = config
        .http
        .create_api_client()
        .expect("Failed to create MangaDex HTTP client");
    registry
        .register(
            MangadexSource::descriptor(),
            Arc::new(MangadexSource::new(mangadex_client)),
        )
        .expect("Failed to register MangaDex");

    let kitsu_client = config
        .http
        .create_api_client()
        .expect("Failed to create Kitsu HTTP client");
    registry
        .register(KitsuSource::descriptor(), Arc::new(KitsuSource::new(kitsu_client)))
        .expect("Failed to register Kitsu");

    registry
}

/// Probe sources once at startup, then sweep expired cache entries on a
/// fixed cadence
fn spawn_maintenance(aggregator: Arc<MangaAggregator>) {
    actix_web::rt::spawn(async move {
        let statuses = aggregator.check_sources().await;
        for status in &statuses {
            info!(
                "source {} ({}): {}",
                status.id,
                status.name,
                if status.available { "available" } else { "unreachable" }
            );
        }
        loop {
            actix_web::rt::time::sleep(std::time::Duration::from_secs(60)).await;
            let removed = aggregator.cache().sweep();
            if removed > 0 {
                log::debug!("cache sweep removed {} expired entries", removed);
            }
        }
    });
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    log4rs::init_file("log4rs.yml", Default::default()).unwrap();

    let cfg = Config::load();
    let registry = Arc::new(build_registry(&cfg));
    let aggregator = Arc::new(MangaAggregator::new(registry, cfg.aggregation.clone()));

    info!("Aggregation engine initialized:");
    info!("  Priority deadline: {}ms", cfg.aggregation.priority_deadline_ms);
    info!("  Overall deadline: {}ms", cfg.aggregation.overall_deadline_ms);
    info!("  List cache TTL: {}s", cfg.aggregation.list_cache_ttl_secs);

    spawn_maintenance(aggregator.clone());

    let data = web::Data::new(AppState {
        aggregator,
        config: cfg,
    });

    // Try to bind to an available port starting at 8080
    let mut last_err: Option<std::io::Error> = None;
    for port in 8080..=8090 {
        let data_clone = data.clone();
        let addr = format!("127.0.0.1:{}", port);
        match HttpServer::new(move || {
            App::new()
                .app_data(data_clone.clone())
                .service(get_sources)
                .service(toggle_source)
                .service(source_status)
                .service(search_manga)
                .service(get_popular)
                .service(get_latest)
                .service(get_manga)
                .service(get_chapters)
                .service(get_chapter_pages)
                .service(get_tags)
                .service(get_metrics)
        })
        .bind(&addr)
        {
            Ok(server) => {
                info!("Listening on http://{}", addr);
                return server.run().await;
            }
            Err(e) => {
                error!("Failed to bind {}: {}", addr, e);
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap())
}
