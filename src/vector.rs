use std::ops::Deref;
use std::sync::Arc;

use crate::error::{Error, Result};

/// 模长低于该值的向量视为零向量
const MIN_NORM: f32 = 1e-6;

/// 单位长度的特征向量，创建后不可修改，克隆只增加引用计数
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Arc<[f32]>);

impl FeatureVector {
    /// 将模型输出归一化为单位向量，输出为空或全零时返回 `None`
    pub fn normalized(mut raw: Vec<f32>) -> Option<Self> {
        let norm = l2_norm(&raw);
        if raw.is_empty() || !norm.is_finite() || norm < MIN_NORM {
            return None;
        }
        raw.iter_mut().for_each(|x| *x /= norm);
        Some(Self(raw.into()))
    }

    /// 计算多个特征向量的逐元素均值，并重新归一化
    pub fn mean(vectors: &[FeatureVector]) -> Result<Self> {
        let Some(first) = vectors.first() else {
            return Err(Error::DegenerateFeature);
        };
        let dim = first.dim();
        let mut sum = vec![0f32; dim];
        for v in vectors {
            if v.dim() != dim {
                return Err(Error::DimensionMismatch { expected: dim, actual: v.dim() });
            }
            sum.iter_mut().zip(v.iter()).for_each(|(s, x)| *s += x);
        }
        let n = vectors.len() as f32;
        sum.iter_mut().for_each(|s| *s /= n);
        Self::normalized(sum).ok_or(Error::DegenerateFeature)
    }

    pub fn dim(&self) -> usize {
        self.0.len()
    }

    pub fn norm(&self) -> f32 {
        l2_norm(&self.0)
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl Deref for FeatureVector {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.0
    }
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
