use clap::Parser;
use log::info;
use tokio::net::TcpListener;
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_engine};
use crate::config::{BuildOptions, ModelOptions};
use crate::engine::DEFAULT_CACHE_SIZE;
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub build: BuildOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:5000")]
    pub addr: String,
    /// 查询缓存容量，为 0 时不缓存
    #[arg(long, value_name = "N", default_value_t = DEFAULT_CACHE_SIZE)]
    pub cache_size: usize,
    /// 启动时关闭图像增强
    #[arg(long)]
    pub no_augmentation: bool,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let engine = open_engine(opts, &self.model, Some(&self.build), self.cache_size)?;
        engine.set_augmentation(!self.no_augmentation);

        // 没有已保存的索引时先构建一次
        if let Some(report) = block_in_place(|| engine.ensure_index())? {
            info!("初始索引构建完成: {} 张图片", report.indexed);
        }

        // 创建应用状态
        let state = server::AppState::new(engine);

        // 创建应用
        let app = server::create_app(state);

        // 启动服务器
        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
