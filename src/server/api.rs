use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum_typed_multipart::TypedMultipart;
use log::info;
use serde_json::json;
use tokio::task::{block_in_place, spawn_blocking};

use super::error::Result;
use super::state::AppState;
use super::types::*;
use crate::engine::EngineStats;
use crate::metrics;

/// 搜索一张图片
#[utoipa::path(
    post,
    path = "/search",
    request_body(content = SearchForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, body = SearchResponse),
        (status = 400, description = "图片无法解码或参数无效"),
        (status = 503, description = "索引尚未构建"),
    )
)]
pub async fn search_handler(
    State(state): State<Arc<AppState>>,
    data: TypedMultipart<SearchRequest>,
) -> Result<Json<SearchResponse>> {
    let params = data.params();

    info!("正在搜索上传图片: {} 字节", data.image.len());
    let response = block_in_place(|| state.engine.search(&data.image, &params))?;

    let results = response
        .results
        .into_iter()
        .map(|hit| SearchResult { image_url: format!("/uploads/products/{}", hit.image), hit })
        .collect();

    Ok(Json(SearchResponse {
        total_results: response.total_results,
        min_similarity: response.min_similarity,
        results,
        timing: response.timing,
        use_augmentation: response.use_augmentation,
        model: response.model,
    }))
}

/// 重新扫描图库并构建索引
#[utoipa::path(
    post,
    path = "/rebuild",
    responses(
        (status = 200, body = RebuildResponse),
        (status = 409, description = "图库为空、构建失败、被中止或已有构建在进行"),
    )
)]
pub async fn rebuild_handler(State(state): State<Arc<AppState>>) -> Result<Json<RebuildResponse>> {
    let engine = state.engine.clone();
    let report = spawn_blocking(move || engine.rebuild()).await??;
    Ok(Json(RebuildResponse {
        status: "success".to_string(),
        message: "已重新构建图片索引".to_string(),
        total: report.total,
        indexed: report.indexed,
        failed: report.failed,
        elapsed: report.elapsed.as_secs_f64(),
    }))
}

/// 中止正在进行的重建
#[utoipa::path(
    post,
    path = "/rebuild/abort",
    responses(
        (status = 200, body = AbortResponse),
    )
)]
pub async fn abort_rebuild_handler(State(state): State<Arc<AppState>>) -> Result<Json<AbortResponse>> {
    let aborted = state.engine.abort_rebuild();
    Ok(Json(AbortResponse { status: "success".to_string(), aborted }))
}

/// 获取索引统计信息
#[utoipa::path(
    get,
    path = "/stats",
    responses(
        (status = 200, body = EngineStats),
    )
)]
pub async fn stats_handler(State(state): State<Arc<AppState>>) -> Result<Json<EngineStats>> {
    Ok(Json(state.engine.stats()))
}

/// 切换全局图像增强开关
#[utoipa::path(
    post,
    path = "/toggle_augmentation",
    request_body = ToggleRequest,
    responses(
        (status = 200, body = ToggleResponse),
        (status = 400, description = "缺少 enabled 字段"),
    )
)]
pub async fn toggle_augmentation_handler(
    State(state): State<Arc<AppState>>,
    Json(data): Json<ToggleRequest>,
) -> Result<Response> {
    let Some(enabled) = data.enabled else {
        return Ok((StatusCode::BAD_REQUEST, Json(json!({ "error": "Invalid request" }))).into_response());
    };
    state.engine.set_augmentation(enabled);
    Ok(Json(ToggleResponse { status: "success".to_string(), augmentation_enabled: enabled }).into_response())
}

/// Prometheus 指标
#[utoipa::path(get, path = "/metrics")]
pub async fn metrics_handler() -> Result<Response> {
    let body = metrics::encode()?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body).into_response())
}
