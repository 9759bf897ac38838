use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::builder::{DEFAULT_BATCH_SIZE, DEFAULT_SUFFIX, DEFAULT_WORKERS};
use crate::cli::*;
use crate::embed::Device;
use crate::rank::{DEFAULT_MIN_SIMILARITY, DEFAULT_TOP_K};

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "aloxaf", "imclip")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".imclip"));
    ConfDir { path }
});

#[derive(Parser, Debug, Clone)]
pub struct ModelOptions {
    /// ONNX 格式的图像编码器模型文件
    #[arg(short, long, value_name = "PATH")]
    pub model: PathBuf,
    /// 模型名称，决定特征文件名，默认为模型文件名
    #[arg(long, value_name = "NAME")]
    pub model_name: Option<String>,
    /// 推理设备
    #[arg(long, value_enum, default_value_t = Device::Cpu)]
    pub device: Device,
    /// 模型输入尺寸
    #[arg(long, value_name = "SIZE", default_value_t = 224)]
    pub input_size: i32,
}

#[derive(Parser, Debug, Clone)]
pub struct BuildOptions {
    /// 图库目录，子目录名会作为图片的分类
    #[arg(long, value_name = "DIR", default_value = "uploads/products")]
    pub corpus: PathBuf,
    /// 构建索引时，多少张图片为一个批次
    #[arg(long, value_name = "SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,
    /// 特征提取线程数
    #[arg(long, value_name = "N", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,
    /// 扫描的文件后缀名，多个后缀用逗号分隔
    #[arg(short, long, default_value = DEFAULT_SUFFIX)]
    pub suffix: String,
}

#[derive(Parser, Debug, Clone)]
pub struct SearchOptions {
    /// 最低相似度，范围从 -1 到 1
    #[arg(long, value_name = "SCORE", default_value_t = DEFAULT_MIN_SIMILARITY, allow_negative_numbers = true)]
    pub min_similarity: f32,
    /// 显示的结果数量
    #[arg(long, value_name = "COUNT", default_value_t = DEFAULT_TOP_K)]
    pub top_k: usize,
    /// 只显示该分类下的图片
    #[arg(long)]
    pub category: Option<String>,
    /// 不使用图像增强
    #[arg(long)]
    pub no_augmentation: bool,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "imclip", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// imclip 配置文件目录
    #[arg(short, long, default_value_t = CONF_DIR.clone())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 扫描图库并构建索引
    Build(BuildCommand),
    /// 从索引中搜索图片
    Search(SearchCommand),
    /// 启动 HTTP 搜索服务
    Server(ServerCommand),
    /// 显示索引信息
    Show(ShowCommand),
}

#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回索引目录的路径
    pub fn index(&self) -> PathBuf {
        self.path.join("index")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self { path: PathBuf::from(s) })
    }
}

impl std::fmt::Display for ConfDir {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.path.display())
    }
}
