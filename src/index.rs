use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::{Error, Result};
use crate::vector::FeatureVector;

/// 图片元数据，入库时生成，之后不再修改
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Metadata {
    pub filename: String,
    pub path: String,
    /// `[宽, 高]`
    pub size: [u32; 2],
    /// 文件头识别出的格式，无法识别时为 `None`
    pub format: Option<String>,
    /// 文件创建时间，格式为 `%Y-%m-%d %H:%M:%S`
    pub created: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    /// 索引内唯一的文件名（相对图库根目录，以 `/` 分隔）
    pub filename: String,
    pub path: String,
    pub metadata: Metadata,
}

/// 特征索引：图片记录与按行对齐的特征矩阵，第 i 行对应第 i 条记录
///
/// 构建后不可修改，重建时整体替换。
#[derive(Debug, Clone)]
pub struct FeatureIndex {
    model: String,
    records: Vec<ImageRecord>,
    matrix: Array2<f32>,
}

impl FeatureIndex {
    pub fn new(model: impl Into<String>, records: Vec<ImageRecord>, matrix: Array2<f32>) -> Result<Self> {
        if records.len() != matrix.nrows() {
            return Err(Error::CorruptIndex(format!(
                "记录数 {} 与矩阵行数 {} 不一致",
                records.len(),
                matrix.nrows()
            )));
        }
        Ok(Self { model: model.into(), records, matrix })
    }

    /// 将特征向量按顺序堆叠为矩阵并创建索引
    pub fn from_vectors(
        model: impl Into<String>,
        entries: Vec<(ImageRecord, FeatureVector)>,
    ) -> Result<Self> {
        let dim = entries.first().map(|(_, v)| v.dim()).unwrap_or(0);
        let mut data = Vec::with_capacity(entries.len() * dim);
        let mut records = Vec::with_capacity(entries.len());
        for (record, vector) in entries {
            if vector.dim() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: vector.dim() });
            }
            data.extend_from_slice(&vector);
            records.push(record);
        }
        let matrix = Array2::from_shape_vec((records.len(), dim), data)
            .map_err(|e| Error::CorruptIndex(e.to_string()))?;
        Self::new(model, records, matrix)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 特征维度，空索引为 0
    pub fn dim(&self) -> usize {
        self.matrix.ncols()
    }

    pub fn records(&self) -> &[ImageRecord] {
        &self.records
    }

    pub fn record(&self, i: usize) -> &ImageRecord {
        &self.records[i]
    }

    pub fn vector(&self, i: usize) -> ArrayView1<'_, f32> {
        self.matrix.row(i)
    }

    pub fn matrix(&self) -> &Array2<f32> {
        &self.matrix
    }
}
