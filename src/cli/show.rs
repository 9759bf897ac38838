use std::collections::BTreeMap;

use anyhow::Result;
use clap::Parser;

use crate::cli::SubCommandExtend;
use crate::config::Opts;
use crate::store::IndexStore;

#[derive(Parser, Debug, Clone)]
pub struct ShowCommand {
    /// 列出每个分类的图片数量
    #[arg(long)]
    pub categories: bool,
}

impl SubCommandExtend for ShowCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let store = IndexStore::new(opts.conf_dir.index());
        println!("索引目录: {}", store.dir().display());

        let Some(generation) = store.current_generation()? else {
            println!("尚未构建索引");
            return Ok(());
        };
        println!("当前版本: {}", generation.display());

        let Some(index) = store.model()?.map(|model| store.load(&model)).transpose()?.flatten() else {
            println!("当前版本没有特征文件");
            return Ok(());
        };
        println!("模型 {}: {} 张图片，特征维度 {}", index.model(), index.len(), index.dim());
        if self.categories {
            let mut counts = BTreeMap::new();
            for record in index.records() {
                let category = record.metadata.category.as_deref().unwrap_or("-");
                *counts.entry(category).or_insert(0usize) += 1;
            }
            for (category, count) in counts {
                println!("  {category}\t{count}");
            }
        }
        Ok(())
    }
}
