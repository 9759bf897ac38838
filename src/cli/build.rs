use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_engine};
use crate::config::{BuildOptions, ModelOptions, Opts};

#[derive(Parser, Debug, Clone)]
pub struct BuildCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub build: BuildOptions,
    /// 构建时不使用图像增强
    #[arg(long)]
    pub no_augmentation: bool,
}

impl SubCommandExtend for BuildCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let engine = open_engine(opts, &self.model, Some(&self.build), 0)?;
        engine.set_augmentation(!self.no_augmentation);
        let report = block_in_place(|| engine.rebuild())?;
        info!(
            "构建索引成功: 共 {} 张，成功 {} 张，失败 {} 张，耗时 {:.2}s",
            report.total,
            report.indexed,
            report.failed,
            report.elapsed.as_secs_f64()
        );
        Ok(())
    }
}
