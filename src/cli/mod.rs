mod build;
mod search;
pub mod server;
mod show;

use std::sync::Arc;

pub use build::*;
pub use search::*;
pub use server::*;
pub use show::*;

use crate::config::{BuildOptions, ModelOptions, Opts};
use crate::embed::OnnxEmbedder;
use crate::engine::{EngineConfig, SearchEngine};

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

/// 根据命令行参数加载模型并打开检索引擎
fn open_engine(
    opts: &Opts,
    model: &ModelOptions,
    build: Option<&BuildOptions>,
    cache_size: usize,
) -> anyhow::Result<Arc<SearchEngine>> {
    let embedder = Arc::new(OnnxEmbedder::from_options(model)?);
    let mut config = EngineConfig { index_dir: opts.conf_dir.index(), cache_size, ..Default::default() };
    if let Some(build) = build {
        config.corpus_dir = build.corpus.clone();
        config.batch_size = build.batch_size;
        config.workers = build.workers;
        config.suffix = build.suffix.clone();
    }
    Ok(Arc::new(SearchEngine::open(config, embedder)?))
}
