use ndarray::{Array1, ArrayView1};
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::{Error, Result};
use crate::index::{FeatureIndex, Metadata};
use crate::vector::FeatureVector;

pub const DEFAULT_MIN_SIMILARITY: f32 = 0.65;
pub const DEFAULT_TOP_K: usize = 50;

#[derive(Debug, Clone, PartialEq)]
pub struct RankParams {
    /// 低于该相似度的结果会被过滤
    pub min_similarity: f32,
    /// 最多返回的结果数量
    pub top_k: usize,
    /// 只返回该分类下的图片，需完全匹配
    pub category: Option<String>,
}

impl Default for RankParams {
    fn default() -> Self {
        Self { min_similarity: DEFAULT_MIN_SIMILARITY, top_k: DEFAULT_TOP_K, category: None }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SearchHit {
    /// 图片文件名
    pub image: String,
    /// 余弦相似度，范围 [-1, 1]
    pub score: f32,
    pub path: String,
    pub metadata: Metadata,
}

/// 查询向量与索引中每一行的余弦相似度
///
/// 两者均为单位向量，点积即余弦相似度；结果截断到 [-1, 1] 以消除浮点误差。
pub fn similarities(query: &FeatureVector, index: &FeatureIndex) -> Result<Array1<f32>> {
    if index.is_empty() {
        return Ok(Array1::zeros(0));
    }
    if query.dim() != index.dim() {
        return Err(Error::DimensionMismatch { expected: index.dim(), actual: query.dim() });
    }
    let q = ArrayView1::from(query.as_slice());
    Ok(index.matrix().dot(&q).mapv_into(|s| s.clamp(-1.0, 1.0)))
}

/// 按相似度从高到低排列的行号，相似度相同时保持行号升序
pub fn order(sims: &Array1<f32>) -> Vec<usize> {
    let mut idx = (0..sims.len()).collect::<Vec<_>>();
    // sort_by 为稳定排序
    idx.sort_by(|&a, &b| sims[b].total_cmp(&sims[a]));
    idx
}

/// 依次应用阈值、分类过滤，取前 `top_k` 个结果
pub fn select(
    sims: &Array1<f32>,
    order: &[usize],
    index: &FeatureIndex,
    params: &RankParams,
) -> Vec<SearchHit> {
    let mut hits = Vec::with_capacity(params.top_k.min(order.len()));
    for &i in order {
        if hits.len() >= params.top_k {
            break;
        }
        let score = sims[i];
        // 阈值为 NaN 时没有任何结果
        if params.min_similarity.is_nan() || score < params.min_similarity {
            continue;
        }
        let record = index.record(i);
        if let Some(category) = &params.category {
            if record.metadata.category.as_ref() != Some(category) {
                continue;
            }
        }
        hits.push(SearchHit {
            image: record.filename.clone(),
            score,
            path: record.path.clone(),
            metadata: record.metadata.clone(),
        });
    }
    hits
}

/// 在索引中搜索与查询向量最相似的图片
pub fn rank(query: &FeatureVector, index: &FeatureIndex, params: &RankParams) -> Result<Vec<SearchHit>> {
    let sims = similarities(query, index)?;
    let order = order(&sims);
    Ok(select(&sims, &order, index, params))
}
