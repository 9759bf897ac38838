mod api;
mod error;
mod state;
mod types;

use std::sync::Arc;

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub use self::state::*;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::search_handler,
        api::rebuild_handler,
        api::abort_rebuild_handler,
        api::stats_handler,
        api::toggle_augmentation_handler,
        api::metrics_handler,
    ),
    components(schemas(
        types::SearchForm,
        types::SearchResponse,
        types::RebuildResponse,
        types::AbortResponse,
        types::ToggleRequest,
        types::ToggleResponse,
        crate::engine::EngineStats,
    ))
)]
pub struct ApiDoc;

/// 构建API服务器
pub fn create_app(state: Arc<AppState>) -> Router {
    let corpus = ServeDir::new(state.engine.corpus_dir());
    Router::new()
        .route("/search", post(api::search_handler))
        .route("/rebuild", get(api::rebuild_handler).post(api::rebuild_handler))
        .route("/rebuild/abort", post(api::abort_rebuild_handler))
        .route("/stats", get(api::stats_handler))
        .route("/toggle_augmentation", post(api::toggle_augmentation_handler))
        .route("/metrics", get(api::metrics_handler))
        .nest_service("/uploads/products", corpus)
        .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::disable())
        // 上传限制：10M
        .layer(RequestBodyLimitLayer::new(1024 * 1024 * 10))
        .with_state(state)
}
