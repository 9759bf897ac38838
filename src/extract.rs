use std::sync::Arc;

use opencv::core::Mat;

use crate::augment::augment;
use crate::embed::Embedder;
use crate::error::Result;
use crate::vector::FeatureVector;

/// 组合增强与嵌入模型，为一张图片生成一个稳定的特征向量
#[derive(Clone)]
pub struct FeatureExtractor {
    embedder: Arc<dyn Embedder>,
}

impl FeatureExtractor {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self { embedder }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        &*self.embedder
    }

    /// 提取图片特征
    ///
    /// `augment` 在调用开始时确定，整个调用期间不会改变。开启时对 6 个增强版本
    /// 分别提取特征，取均值后重新归一化；关闭时只对原图调用一次模型。
    pub fn aggregate(&self, image: &Mat, augment_enabled: bool) -> Result<FeatureVector> {
        if !augment_enabled {
            return self.embedder.embed(image);
        }
        let features = augment(image, true)?
            .iter()
            .map(|img| self.embedder.embed(img))
            .collect::<Result<Vec<_>>>()?;
        FeatureVector::mean(&features)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use opencv::core::{self, Mat, Scalar};

    use super::*;
    use crate::error::Error;

    /// 以通道均值作为特征的模型替身，记录调用次数
    #[derive(Default)]
    pub struct MeanColorEmbedder {
        pub calls: AtomicUsize,
    }

    impl Embedder for MeanColorEmbedder {
        fn model_name(&self) -> &str {
            "mean-color"
        }

        fn device(&self) -> &str {
            "cpu"
        }

        fn embed(&self, image: &Mat) -> Result<FeatureVector> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let m = core::mean(image, &core::no_array())?;
            FeatureVector::normalized(vec![m.0[0] as f32 + 1., m.0[1] as f32 + 1., m.0[2] as f32 + 1.])
                .ok_or(Error::DegenerateFeature)
        }
    }

    pub fn solid(b: f64, g: f64, r: f64) -> Mat {
        Mat::new_rows_cols_with_default(16, 24, core::CV_8UC3, Scalar::new(b, g, r, 0.)).unwrap()
    }
}
