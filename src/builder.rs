use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use indicatif::ProgressBar;
use log::{info, warn};
use opencv::prelude::*;
use rayon::prelude::*;
use regex::Regex;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::extract::FeatureExtractor;
use crate::index::{FeatureIndex, ImageRecord, Metadata};
use crate::utils::{self, pb_style};
use crate::vector::FeatureVector;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_SUFFIX: &str = "png,jpg,jpeg,webp";

/// 一次构建的统计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BuildReport {
    /// 扫描到的图片数量
    pub total: usize,
    /// 成功入库的数量
    pub indexed: usize,
    /// 读取、解码或提取失败而被跳过的数量
    pub failed: usize,
    pub elapsed: Duration,
}

/// 扫描图库目录并批量提取特征
#[derive(Clone)]
pub struct IndexBuilder {
    extractor: FeatureExtractor,
    batch_size: usize,
    workers: usize,
    re_suffix: Regex,
}

impl IndexBuilder {
    pub fn new(extractor: FeatureExtractor) -> Self {
        Self {
            extractor,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            re_suffix: suffix_regex(DEFAULT_SUFFIX).expect("default suffix is a valid regex"),
        }
    }

    /// 每个批次的图片数量
    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// 工作线程数量
    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// 扫描的文件后缀名，多个后缀用逗号分隔
    pub fn suffix(mut self, suffix: &str) -> Result<Self> {
        self.re_suffix = suffix_regex(suffix)?;
        Ok(self)
    }

    /// 递归扫描目录，返回排序后的图片路径
    pub fn scan(&self, corpus: &Path) -> Vec<PathBuf> {
        info!("开始扫描目录: {}", corpus.display());
        let mut paths = WalkDir::new(corpus)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension().is_some_and(|ext| self.re_suffix.is_match(&ext.to_string_lossy()))
            })
            .collect::<Vec<_>>();
        paths.sort();
        paths
    }

    /// 为目录下所有图片构建索引
    ///
    /// 每个批次开始前以及全部批次结束后检查 `abort`，被置位时返回 [`Error::BuildAborted`]。
    /// 单张图片失败只会记录日志并跳过，结果顺序与扫描顺序一致。
    pub fn build(&self, corpus: &Path, augment: bool, abort: &AtomicBool) -> Result<(FeatureIndex, BuildReport)> {
        let start = Instant::now();
        let paths = self.scan(corpus);
        if paths.is_empty() {
            warn!("目录中没有可用的图片: {}", corpus.display());
            return Err(Error::EmptyCorpus(corpus.to_path_buf()));
        }
        let total = paths.len();
        info!("共找到 {} 张图片，增强: {}", total, augment);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("builder-{i}"))
            .build()
            .map_err(|e| Error::IndexBuildFailed(e.to_string()))?;

        let pb = ProgressBar::new(total as u64).with_style(pb_style());
        let mut entries = Vec::with_capacity(total);
        let mut failed = 0;

        for (i, batch) in paths.chunks(self.batch_size).enumerate() {
            if abort.load(Ordering::SeqCst) {
                pb.abandon_with_message("构建已中止");
                warn!("索引构建在第 {} 批次前被中止", i + 1);
                return Err(Error::BuildAborted);
            }

            let results = pool.install(|| {
                batch
                    .par_iter()
                    .map(|path| {
                        let r = self.process(corpus, path, augment);
                        pb.inc(1);
                        r
                    })
                    .collect::<Vec<_>>()
            });

            for (path, result) in batch.iter().zip(results) {
                match result {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!("处理图片失败 {}: {}", path.display(), e);
                        failed += 1;
                    }
                }
            }

            let done = (i * self.batch_size + batch.len()).min(total);
            let secs = start.elapsed().as_secs_f64();
            info!(
                "已处理 {}/{} 张图片，速度 {:.2} 张/秒",
                done,
                total,
                if secs > 0. { done as f64 / secs } else { 0. }
            );
        }

        // 最后一个批次进行中收到的中止请求
        if abort.load(Ordering::SeqCst) {
            pb.abandon_with_message("构建已中止");
            warn!("索引构建在最后一个批次中被中止");
            return Err(Error::BuildAborted);
        }
        pb.finish_with_message("特征提取完成");

        if entries.is_empty() {
            return Err(Error::IndexBuildFailed(format!("{} 张图片全部处理失败", total)));
        }

        let model = self.extractor.embedder().model_name().to_string();
        let index = FeatureIndex::from_vectors(model, entries)?;
        let report = BuildReport { total, indexed: index.len(), failed, elapsed: start.elapsed() };
        info!(
            "索引构建完成: {} 张成功，{} 张失败，耗时 {:.2}s",
            report.indexed,
            report.failed,
            report.elapsed.as_secs_f64()
        );
        Ok((index, report))
    }

    fn process(&self, corpus: &Path, path: &Path, augment: bool) -> Result<(ImageRecord, FeatureVector)> {
        let bytes = fs::read(path)?;
        let image = utils::imdecode(&bytes)?;
        let vector = self.extractor.aggregate(&image, augment)?;

        let relative = path.strip_prefix(corpus).unwrap_or(path);
        let filename = relative_name(relative);
        let metadata = Metadata {
            filename: filename.clone(),
            path: path.to_string_lossy().to_string(),
            size: [image.cols() as u32, image.rows() as u32],
            format: utils::sniff_format(&bytes).map(str::to_string),
            created: utils::file_created(path)?,
            category: category_of(relative),
        };
        Ok((ImageRecord { filename, path: metadata.path.clone(), metadata }, vector))
    }
}

fn suffix_regex(suffix: &str) -> Result<Regex> {
    let re = format!("(?i)^({})$", suffix.replace(',', "|"));
    Regex::new(&re).map_err(|e| Error::IndexBuildFailed(format!("无效的后缀名 {suffix}: {e}")))
}

/// 以 `/` 连接的相对路径
fn relative_name(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// 图片所在的第一级子目录名，直接位于根目录下的图片没有分类
fn category_of(relative: &Path) -> Option<String> {
    let mut components = relative.components();
    let first = components.next()?;
    components.next()?;
    Some(first.as_os_str().to_string_lossy().to_string())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use super::*;
    use crate::extract::testing::{MeanColorEmbedder, solid};

    fn builder() -> IndexBuilder {
        let embedder = Arc::new(MeanColorEmbedder::default());
        IndexBuilder::new(FeatureExtractor::new(embedder)).batch_size(3).workers(2)
    }

    fn write_png(path: &Path, shade: f64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        utils::imwrite(path.to_str().unwrap(), &solid(shade, 255. - shade, 40.)).unwrap();
    }

    #[test]
    fn test_relative_name_and_category() {
        assert_eq!(relative_name(Path::new("shoes/red/a.png")), "shoes/red/a.png");
        assert_eq!(category_of(Path::new("shoes/red/a.png")).as_deref(), Some("shoes"));
        assert_eq!(category_of(Path::new("a.png")), None);
    }

    #[test]
    fn test_suffix_filter() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("a.PNG"), 10.);
        fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        fs::write(dir.path().join("png"), "no extension").unwrap();

        let paths = builder().scan(dir.path());
        assert_eq!(paths, vec![dir.path().join("a.PNG")]);

        let only_jpg = builder().suffix("jpg").unwrap();
        assert!(only_jpg.scan(dir.path()).is_empty());
    }

    #[test]
    fn test_build_sorted_with_categories() {
        let dir = TempDir::new().unwrap();
        for (i, name) in ["d.png", "b.png", "shoes/c.png", "a.png", "bags/e.png", "shoes/a.png", "f.png"]
            .iter()
            .enumerate()
        {
            write_png(&dir.path().join(name), 20. * i as f64);
        }

        let (index, report) = builder().build(dir.path(), false, &AtomicBool::new(false)).unwrap();
        let names = index.records().iter().map(|r| r.filename.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["a.png", "b.png", "bags/e.png", "d.png", "f.png", "shoes/a.png", "shoes/c.png"]);
        assert_eq!(index.record(2).metadata.category.as_deref(), Some("bags"));
        assert_eq!(index.record(0).metadata.category, None);
        assert_eq!(index.record(0).metadata.size, [24, 16]);
        assert_eq!(index.record(0).metadata.format.as_deref(), Some("PNG"));
        assert_eq!(index.model(), "mean-color");
        assert_eq!((report.total, report.indexed, report.failed), (7, 7, 0));
        for i in 0..index.len() {
            let norm = index.vector(i).dot(&index.vector(i)).sqrt();
            assert!((norm - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_corrupt_file_skipped() {
        let dir = TempDir::new().unwrap();
        for i in 0..5 {
            write_png(&dir.path().join(format!("{i}.png")), 40. * i as f64);
        }
        fs::write(dir.path().join("2b.jpg"), b"definitely not a jpeg").unwrap();

        let (index, report) = builder().build(dir.path(), true, &AtomicBool::new(false)).unwrap();
        assert_eq!(index.len(), 5);
        assert_eq!((report.total, report.failed), (6, 1));
        assert!(index.records().iter().all(|r| r.filename != "2b.jpg"));
    }

    #[test]
    fn test_empty_corpus() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("readme.md"), "#").unwrap();
        let err = builder().build(dir.path(), true, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, Error::EmptyCorpus(_)));
    }

    #[test]
    fn test_all_failed() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a.png"), b"broken").unwrap();
        fs::write(dir.path().join("b.png"), b"").unwrap();
        let err = builder().build(dir.path(), true, &AtomicBool::new(false)).unwrap_err();
        assert!(matches!(err, Error::IndexBuildFailed(_)));
    }

    #[test]
    fn test_abort_before_batch() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("a.png"), 10.);
        let err = builder().build(dir.path(), true, &AtomicBool::new(true)).unwrap_err();
        assert!(matches!(err, Error::BuildAborted));
    }

    #[test]
    fn test_invalid_suffix() {
        assert!(builder().suffix("png,(jpg").is_err());
    }
}
