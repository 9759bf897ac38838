use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// 图片无法读取或解码
    #[error("无法解码图片: {0}")]
    Decode(String),

    /// 查询参数不合法
    #[error("无效的参数: {0}")]
    InvalidParameter(String),

    /// 嵌入模型推理失败
    #[error("模型推理失败: {0}")]
    ModelInference(String),

    /// 特征向量均值的模长接近 0，无法归一化
    #[error("特征向量退化为零向量")]
    DegenerateFeature,

    #[error("目录中没有可用的图片: {}", .0.display())]
    EmptyCorpus(PathBuf),

    #[error("索引构建失败: {0}")]
    IndexBuildFailed(String),

    #[error("索引尚未构建")]
    IndexUnavailable,

    #[error("向量维度不一致: 期望 {expected}，实际 {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("索引构建已被中止")]
    BuildAborted,

    #[error("已有索引正在构建中")]
    RebuildInProgress,

    #[error("索引文件已损坏: {0}")]
    CorruptIndex(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    NpyRead(#[from] ndarray_npy::ReadNpyError),

    #[error(transparent)]
    NpyWrite(#[from] ndarray_npy::WriteNpyError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}
