use std::path::Path;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use log::debug;
use tokio::task::block_in_place;

use crate::cli::{SubCommandExtend, open_engine};
use crate::config::{ModelOptions, Opts, SearchOptions};
use crate::engine::{SearchParams, SearchResponse};
use crate::rank::RankParams;

#[derive(Parser, Debug, Clone)]
pub struct SearchCommand {
    #[command(flatten)]
    pub model: ModelOptions,
    #[command(flatten)]
    pub search: SearchOptions,
    /// 被搜索的图片路径
    pub image: String,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
}

impl From<&SearchOptions> for SearchParams {
    fn from(opts: &SearchOptions) -> Self {
        SearchParams {
            rank: RankParams {
                min_similarity: opts.min_similarity,
                top_k: opts.top_k,
                category: opts.category.clone(),
            },
            use_augmentation: Some(!opts.no_augmentation),
        }
    }
}

impl SubCommandExtend for SearchCommand {
    async fn run(&self, opts: &Opts) -> Result<()> {
        let engine = open_engine(opts, &self.model, None, 0)?;
        let params = SearchParams::from(&self.search);
        let response = block_in_place(|| engine.search_image(Path::new(&self.image), &params))?;

        debug!("feature_extraction    : {:.4}s", response.timing.feature_extraction);
        debug!("similarity_calculation: {:.4}s", response.timing.similarity_calculation);
        debug!("sorting               : {:.4}s", response.timing.sorting);

        print_result(&response, self.output_format)
    }
}

fn print_result(response: &SearchResponse, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(response)?)
        }
        OutputFormat::Table => {
            for hit in &response.results {
                println!("{:.4}\t{}", hit.score, hit.path);
            }
        }
    }
    Ok(())
}

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum OutputFormat {
    Json,
    Table,
}
