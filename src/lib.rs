pub mod augment;
pub mod builder;
pub mod cache;
pub mod cli;
pub mod config;
pub mod embed;
pub mod engine;
pub mod error;
pub mod extract;
pub mod index;
mod metrics;
pub mod rank;
mod server;
pub mod store;
pub mod utils;
pub mod vector;

pub use config::Opts;
pub use engine::{EngineConfig, SearchEngine, SearchParams};
pub use error::{Error, Result};
