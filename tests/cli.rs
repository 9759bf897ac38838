mod common;

use std::process::Command;
use std::sync::Arc;

use anyhow::Result;
use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use common::*;
use imclip::{EngineConfig, SearchEngine};
use predicates::prelude::*;

macro_rules! cargo_run {
    ($cmd:expr, $($args:expr),*) => {
        {
            let mut cmd = Command::cargo_bin($cmd)?;
            $(cmd.arg($args);)*
            cmd.assert()
        }
    };
}

#[test]
fn help_lists_subcommands() -> Result<()> {
    cargo_run!("imclip", "--help")
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("search"))
        .stdout(predicate::str::contains("server"))
        .stdout(predicate::str::contains("show"));
    Ok(())
}

#[test]
fn show_without_index() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    cargo_run!("imclip", "-c", conf_dir.path(), "show")
        .success()
        .stdout(predicate::str::contains("尚未构建索引"));
    Ok(())
}

#[test]
fn show_built_index() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let corpus = conf_dir.child("corpus");
    write_png(&corpus.path().join("shoes/a.png"), 10., 20., 200.);
    write_png(&corpus.path().join("shoes/b.png"), 200., 20., 10.);
    write_png(&corpus.path().join("c.png"), 20., 200., 10.);

    let config = EngineConfig {
        index_dir: conf_dir.path().join("index"),
        corpus_dir: corpus.path().to_path_buf(),
        ..Default::default()
    };
    SearchEngine::open(config, Arc::new(CountingEmbedder::default()))?.rebuild()?;

    cargo_run!("imclip", "-c", conf_dir.path(), "show", "--categories")
        .success()
        .stdout(predicate::str::contains("模型 counting: 3 张图片，特征维度 3"))
        .stdout(predicate::str::contains("shoes\t2"));
    Ok(())
}

#[test]
fn search_with_missing_model() -> Result<()> {
    let conf_dir = assert_fs::TempDir::new()?;
    let image = conf_dir.child("query.png");
    write_png(image.path(), 1., 2., 3.);

    cargo_run!("imclip", "-c", conf_dir.path(), "search", "--model", conf_dir.path().join("nope.onnx"), image.path())
        .failure()
        .stderr(predicate::str::contains("模型文件不存在"));
    Ok(())
}

#[test]
fn build_rejects_unknown_device() -> Result<()> {
    cargo_run!("imclip", "build", "--model", "clip.onnx", "--device", "tpu").failure();
    Ok(())
}
