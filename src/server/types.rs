use axum::body::Bytes;
use axum_typed_multipart::TryFromMultipart;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::engine::{SearchParams, Timing};
use crate::rank::{RankParams, SearchHit};

/// 搜索请求参数
#[derive(TryFromMultipart)]
pub struct SearchRequest {
    pub image: Bytes,
    pub min_similarity: Option<f32>,
    pub top_k: Option<usize>,
    pub category: Option<String>,
    pub use_augmentation: Option<bool>,
}

impl SearchRequest {
    /// 未填写的字段使用默认值，`use_augmentation` 默认为 `true`
    pub fn params(&self) -> SearchParams {
        let defaults = RankParams::default();
        SearchParams {
            rank: RankParams {
                min_similarity: self.min_similarity.unwrap_or(defaults.min_similarity),
                top_k: self.top_k.unwrap_or(defaults.top_k),
                category: self.category.clone().filter(|c| !c.is_empty()),
            },
            use_augmentation: Some(self.use_augmentation.unwrap_or(true)),
        }
    }
}

/// 搜索表单（用于API文档）
#[derive(Debug, ToSchema)]
#[allow(unused)]
pub struct SearchForm {
    /// 上传的图片文件
    #[schema(format = Binary, content_media_type = "application/octet-stream")]
    pub image: String,
    /// 最低相似度，默认 0.65
    pub min_similarity: Option<f32>,
    /// 最多返回的结果数量，默认 50
    pub top_k: Option<usize>,
    /// 只返回该分类下的图片
    pub category: Option<String>,
    /// 本次搜索是否使用图像增强，默认为 true，不会修改全局设置
    pub use_augmentation: Option<bool>,
}

/// 单条搜索结果
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResult {
    #[serde(flatten)]
    pub hit: SearchHit,
    /// 图片的访问地址
    pub image_url: String,
}

/// 搜索响应
#[derive(Debug, Serialize, ToSchema)]
pub struct SearchResponse {
    pub total_results: usize,
    pub min_similarity: f32,
    pub results: Vec<SearchResult>,
    /// 各阶段耗时，单位为秒
    pub timing: Timing,
    pub use_augmentation: bool,
    pub model: String,
}

/// 重建索引响应
#[derive(Debug, Serialize, ToSchema)]
pub struct RebuildResponse {
    pub status: String,
    pub message: String,
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
    /// 构建耗时，单位为秒
    pub elapsed: f64,
}

/// 中止重建响应
#[derive(Debug, Serialize, ToSchema)]
pub struct AbortResponse {
    pub status: String,
    /// 是否有正在进行的重建收到了中止请求
    pub aborted: bool,
}

/// 切换图像增强的参数
#[derive(Debug, Deserialize, ToSchema)]
pub struct ToggleRequest {
    pub enabled: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ToggleResponse {
    pub status: String,
    pub augmentation_enabled: bool,
}
