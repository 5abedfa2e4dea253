pub mod auth;
pub mod config;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod posts;
pub mod store;
pub mod translate;
pub mod users;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    Json, Router,
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
};
use blog_db::Database;
use blog_search::{ElasticsearchBackend, IndexSync, MemoryIndex, SearchBackend};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{AppState, AppStateInner};
use crate::config::Config;
use crate::middleware::require_auth;
use crate::translate::Translator;

/// Search backend selected by `ELASTICSEARCH_URL`.
pub fn search_from_config(config: &Config) -> Result<IndexSync> {
    let backend: Option<Arc<dyn SearchBackend>> = match config.elasticsearch_url.as_deref() {
        None => {
            info!("Full-text search disabled (ELASTICSEARCH_URL not set)");
            None
        }
        Some("memory") => {
            info!("Full-text search using in-process index");
            Some(Arc::new(MemoryIndex::new()))
        }
        Some(url) => {
            info!("Full-text search using Elasticsearch at {}", url);
            Some(Arc::new(ElasticsearchBackend::new(url)?))
        }
    };
    Ok(IndexSync::new(backend))
}

pub fn build_state(db: Database, config: Config, search: IndexSync) -> Result<AppState> {
    let translator = Translator::new(config.ms_translator_key.clone())?;
    Ok(Arc::new(AppStateInner {
        db,
        config,
        search,
        translator,
    }))
}

pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/reset_password_request", post(auth::reset_password_request))
        .route("/auth/reset_password/{token}", post(auth::reset_password))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/feed", get(posts::feed))
        .route("/explore", get(posts::explore))
        .route("/search", get(posts::search))
        .route("/posts", post(posts::create_post))
        .route("/posts/{post_id}", delete(posts::delete_post))
        .route("/users/{username}", get(users::get_profile))
        .route("/profile", put(users::edit_profile))
        .route("/follow/{username}", post(users::follow))
        .route("/unfollow/{username}", post(users::unfollow))
        .route("/messages", get(messages::list_messages))
        .route("/messages/{username}", post(messages::send_message))
        .route("/notifications", get(messages::notifications))
        .route("/translate", post(translate::translate_text))
        .layer(from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
