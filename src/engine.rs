use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use utoipa::ToSchema;

use crate::builder::{self, BuildReport, IndexBuilder};
use crate::cache::QueryCache;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::extract::FeatureExtractor;
use crate::index::FeatureIndex;
use crate::metrics;
use crate::rank::{self, RankParams, SearchHit};
use crate::store::IndexStore;
use crate::utils;

pub const DEFAULT_CACHE_SIZE: usize = 100;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// 索引保存目录
    pub index_dir: PathBuf,
    /// 图库目录
    pub corpus_dir: PathBuf,
    /// 查询缓存容量
    pub cache_size: usize,
    pub batch_size: usize,
    pub workers: usize,
    /// 扫描的文件后缀名，逗号分隔
    pub suffix: String,
    /// 增强开关的初始值
    pub augmentation: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            index_dir: PathBuf::from("index"),
            corpus_dir: PathBuf::from("uploads/products"),
            cache_size: DEFAULT_CACHE_SIZE,
            batch_size: builder::DEFAULT_BATCH_SIZE,
            workers: builder::DEFAULT_WORKERS,
            suffix: builder::DEFAULT_SUFFIX.to_string(),
            augmentation: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub rank: RankParams,
    /// 只对本次查询生效，`None` 时使用全局开关
    pub use_augmentation: Option<bool>,
}

/// 各阶段耗时，单位为秒
#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
pub struct Timing {
    pub feature_extraction: f64,
    pub similarity_calculation: f64,
    pub sorting: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub total_results: usize,
    pub min_similarity: f32,
    pub results: Vec<SearchHit>,
    pub timing: Timing,
    /// 本次查询实际使用的增强开关
    pub use_augmentation: bool,
    pub model: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct EngineStats {
    pub total_images: usize,
    pub device: String,
    pub model: String,
    pub image_folder: String,
    pub augmentation_enabled: bool,
    pub cache_entries: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RebuildState {
    Idle,
    /// 正在提取特征，可以被中止
    Building,
    /// 正在保存并替换索引，不再接受中止
    Committing,
}

/// 重建结束时（包括 panic）恢复为空闲状态
struct RebuildGuard<'a>(&'a Mutex<RebuildState>);

impl Drop for RebuildGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock() = RebuildState::Idle;
    }
}

/// 检索引擎
///
/// 索引以 `Arc` 快照的形式发布：查询开始时克隆一次快照，之后即使发生重建也只会看到
/// 同一个完整的索引。重建先持久化，成功后才替换快照。
pub struct SearchEngine {
    extractor: FeatureExtractor,
    builder: IndexBuilder,
    cache: QueryCache,
    store: IndexStore,
    index: RwLock<Option<Arc<FeatureIndex>>>,
    augmentation: AtomicBool,
    corpus_dir: PathBuf,
    rebuild_state: Mutex<RebuildState>,
    abort: AtomicBool,
}

impl SearchEngine {
    /// 打开引擎并加载已保存的索引
    pub fn open(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let extractor = FeatureExtractor::new(embedder);
        let builder = IndexBuilder::new(extractor.clone())
            .batch_size(config.batch_size)
            .workers(config.workers)
            .suffix(&config.suffix)?;
        let store = IndexStore::new(&config.index_dir);

        let model = extractor.embedder().model_name().to_string();
        let index = store.load(&model)?;
        match &index {
            Some(index) => metrics::set_index_size(index.len()),
            None => warn!("未找到模型 {} 的索引，请先构建索引", model),
        }

        Ok(Self {
            extractor,
            builder,
            cache: QueryCache::new(config.cache_size),
            store,
            index: RwLock::new(index.map(Arc::new)),
            augmentation: AtomicBool::new(config.augmentation),
            corpus_dir: config.corpus_dir,
            rebuild_state: Mutex::new(RebuildState::Idle),
            abort: AtomicBool::new(false),
        })
    }

    /// 当前索引快照
    pub fn index(&self) -> Option<Arc<FeatureIndex>> {
        self.index.read().clone()
    }

    pub fn corpus_dir(&self) -> &Path {
        &self.corpus_dir
    }

    pub fn model(&self) -> &str {
        self.extractor.embedder().model_name()
    }

    pub fn augmentation(&self) -> bool {
        self.augmentation.load(Ordering::SeqCst)
    }

    pub fn set_augmentation(&self, enabled: bool) {
        self.augmentation.store(enabled, Ordering::SeqCst);
        info!("已{}图像增强", if enabled { "开启" } else { "关闭" });
    }

    /// 搜索与图片字节最相似的已入库图片
    pub fn search(&self, bytes: &[u8], params: &SearchParams) -> Result<SearchResponse> {
        let start = Instant::now();
        let augment = params.use_augmentation.unwrap_or_else(|| self.augmentation());
        info!(
            "搜索图片: min_similarity={}, top_k={}, augmentation={}",
            params.rank.min_similarity, params.rank.top_k, augment
        );

        if params.rank.min_similarity.is_nan() {
            return Err(Error::InvalidParameter("min_similarity 不能为 NaN".to_string()));
        }
        let index = self.index().ok_or(Error::IndexUnavailable)?;

        let mut computed = false;
        let query = self.cache.get_or_compute(bytes, augment, |bytes| {
            computed = true;
            let image = utils::imdecode(bytes)?;
            self.extractor.aggregate(&image, augment)
        })?;
        metrics::inc_cache_lookup(!computed);
        let feature_extraction = start.elapsed().as_secs_f64();

        let t = Instant::now();
        let sims = rank::similarities(&query, &index)?;
        let similarity_calculation = t.elapsed().as_secs_f64();

        let t = Instant::now();
        let order = rank::order(&sims);
        let results = rank::select(&sims, &order, &index, &params.rank);
        let sorting = t.elapsed().as_secs_f64();

        let total = start.elapsed().as_secs_f64();
        info!("搜索完成: {} 个结果，耗时 {:.4}s", results.len(), total);

        metrics::inc_image_count(augment);
        metrics::observe_search_duration(augment, "feature_extraction", feature_extraction);
        metrics::observe_search_duration(augment, "similarity_calculation", similarity_calculation);
        metrics::observe_search_duration(augment, "sorting", sorting);
        metrics::observe_search_duration(augment, "total", total);
        if let Some(best) = order.first() {
            metrics::observe_max_score(sims[*best]);
        }

        Ok(SearchResponse {
            total_results: results.len(),
            min_similarity: params.rank.min_similarity,
            results,
            timing: Timing { feature_extraction, similarity_calculation, sorting, total },
            use_augmentation: augment,
            model: index.model().to_string(),
        })
    }

    /// 搜索本地图片文件
    pub fn search_image(&self, path: &Path, params: &SearchParams) -> Result<SearchResponse> {
        let bytes = fs::read(path)?;
        self.search(&bytes, params)
    }

    /// 重新扫描图库并构建索引
    ///
    /// 同一时间只允许一个重建。构建或保存失败、被中止时，内存中与磁盘上的索引都保持不变。
    pub fn rebuild(&self) -> Result<BuildReport> {
        {
            let mut state = self.rebuild_state.lock();
            if *state != RebuildState::Idle {
                return Err(Error::RebuildInProgress);
            }
            *state = RebuildState::Building;
            self.abort.store(false, Ordering::SeqCst);
        }
        let _guard = RebuildGuard(&self.rebuild_state);

        let augment = self.augmentation();
        let (index, report) = self.builder.build(&self.corpus_dir, augment, &self.abort)?;
        {
            let mut state = self.rebuild_state.lock();
            if self.abort.load(Ordering::SeqCst) {
                warn!("索引构建已中止，丢弃构建结果");
                return Err(Error::BuildAborted);
            }
            *state = RebuildState::Committing;
        }

        self.store.save(&index)?;

        metrics::set_index_size(index.len());
        *self.index.write() = Some(Arc::new(index));
        info!("新索引已生效: {} 张图片", report.indexed);
        Ok(report)
    }

    /// 没有可用索引时从图库构建一次
    ///
    /// 图库为空或全部图片处理失败时只记录警告并返回 `None`，之后仍可通过 [`Self::rebuild`] 重建。
    pub fn ensure_index(&self) -> Result<Option<BuildReport>> {
        if self.index().is_some() {
            return Ok(None);
        }
        info!("未找到已保存的索引，开始从 {} 构建", self.corpus_dir.display());
        match self.rebuild() {
            Ok(report) => Ok(Some(report)),
            Err(e @ (Error::EmptyCorpus(_) | Error::IndexBuildFailed(_))) => {
                warn!("构建初始索引失败: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 请求中止正在提取特征的重建，返回中止请求是否被接受
    ///
    /// 返回 `true` 时该次重建保证以 [`Error::BuildAborted`] 结束。
    pub fn abort_rebuild(&self) -> bool {
        let state = self.rebuild_state.lock();
        let running = *state == RebuildState::Building;
        if running {
            info!("请求中止索引构建");
            self.abort.store(true, Ordering::SeqCst);
        }
        running
    }

    pub fn stats(&self) -> EngineStats {
        let embedder = self.extractor.embedder();
        EngineStats {
            total_images: self.index().map(|index| index.len()).unwrap_or(0),
            device: embedder.device().to_string(),
            model: embedder.model_name().to_string(),
            image_folder: self.corpus_dir.to_string_lossy().to_string(),
            augmentation_enabled: self.augmentation(),
            cache_entries: self.cache.len(),
            cache_hits: self.cache.hits(),
            cache_misses: self.cache.misses(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::extract::testing::{MeanColorEmbedder, solid};

    fn write_png(path: &Path, b: f64, g: f64, r: f64) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        utils::imwrite(path.to_str().unwrap(), &solid(b, g, r)).unwrap();
    }

    fn engine(dir: &TempDir, embedder: Arc<MeanColorEmbedder>) -> SearchEngine {
        let config = EngineConfig {
            index_dir: dir.path().join("index"),
            corpus_dir: dir.path().join("corpus"),
            cache_size: 8,
            ..Default::default()
        };
        SearchEngine::open(config, embedder).unwrap()
    }

    #[test]
    fn test_search_without_index() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, Arc::new(MeanColorEmbedder::default()));
        assert!(engine.index().is_none());
        let err = engine.search(b"whatever", &SearchParams::default()).unwrap_err();
        assert!(matches!(err, Error::IndexUnavailable));
        assert_eq!(engine.stats().total_images, 0);
    }

    #[test]
    fn test_rebuild_then_search() {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("corpus");
        write_png(&corpus.join("red.png"), 10., 10., 240.);
        write_png(&corpus.join("blue.png"), 240., 10., 10.);
        write_png(&corpus.join("shoes/green.png"), 10., 240., 10.);

        let embedder = Arc::new(MeanColorEmbedder::default());
        let engine = engine(&dir, embedder.clone());
        engine.set_augmentation(false);
        let report = engine.rebuild().unwrap();
        assert_eq!(report.indexed, 3);
        assert_eq!(engine.stats().total_images, 3);

        let bytes = fs::read(corpus.join("red.png")).unwrap();
        let params = SearchParams { use_augmentation: Some(false), ..Default::default() };
        let resp = engine.search(&bytes, &params).unwrap();
        assert_eq!(resp.results[0].image, "red.png");
        assert!(resp.results[0].score > 0.99);
        assert!(!resp.use_augmentation);
        assert_eq!(resp.model, "mean-color");
        assert_eq!(resp.total_results, resp.results.len());

        // 相同图片再次搜索命中缓存
        let calls = embedder.calls.load(Ordering::SeqCst);
        engine.search(&bytes, &params).unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
        assert_eq!(engine.stats().cache_hits, 1);
    }

    #[test]
    fn test_request_override_keeps_global_flag() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("corpus/a.png"), 50., 60., 70.);
        let engine = engine(&dir, Arc::new(MeanColorEmbedder::default()));
        engine.rebuild().unwrap();

        let bytes = fs::read(dir.path().join("corpus/a.png")).unwrap();
        let params = SearchParams { use_augmentation: Some(false), ..Default::default() };
        engine.search(&bytes, &params).unwrap();
        assert!(engine.augmentation());

        engine.set_augmentation(false);
        let resp = engine.search(&bytes, &SearchParams::default()).unwrap();
        assert!(!resp.use_augmentation);
        assert!(!engine.stats().augmentation_enabled);
    }

    #[test]
    fn test_reopen_loads_persisted_index() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("corpus/a.png"), 50., 60., 70.);
        write_png(&dir.path().join("corpus/b.png"), 70., 60., 50.);
        engine(&dir, Arc::new(MeanColorEmbedder::default())).rebuild().unwrap();

        let reopened = engine(&dir, Arc::new(MeanColorEmbedder::default()));
        assert_eq!(reopened.index().unwrap().len(), 2);
    }

    #[test]
    fn test_failed_rebuild_keeps_index() {
        let dir = TempDir::new().unwrap();
        let corpus = dir.path().join("corpus");
        write_png(&corpus.join("a.png"), 50., 60., 70.);
        let engine = engine(&dir, Arc::new(MeanColorEmbedder::default()));
        engine.rebuild().unwrap();
        let before = engine.index().unwrap();

        fs::remove_file(corpus.join("a.png")).unwrap();
        assert!(matches!(engine.rebuild(), Err(Error::EmptyCorpus(_))));
        assert!(Arc::ptr_eq(&before, &engine.index().unwrap()));
    }

    #[test]
    fn test_abort_without_rebuild() {
        let dir = TempDir::new().unwrap();
        let engine = engine(&dir, Arc::new(MeanColorEmbedder::default()));
        assert!(!engine.abort_rebuild());
    }

    #[test]
    fn test_nan_threshold_rejected() {
        let dir = TempDir::new().unwrap();
        write_png(&dir.path().join("corpus/a.png"), 50., 60., 70.);
        let engine = engine(&dir, Arc::new(MeanColorEmbedder::default()));
        engine.rebuild().unwrap();

        let bytes = fs::read(dir.path().join("corpus/a.png")).unwrap();
        let mut params = SearchParams::default();
        params.rank.min_similarity = f32::NAN;
        assert!(matches!(engine.search(&bytes, &params), Err(Error::InvalidParameter(_))));
    }

    #[test]
    fn test_ensure_index() {
        let dir = TempDir::new().unwrap();
        let embedder = Arc::new(MeanColorEmbedder::default());
        let engine = engine(&dir, embedder.clone());

        // 图库为空时只记录警告
        assert!(engine.ensure_index().unwrap().is_none());
        assert!(engine.index().is_none());

        write_png(&dir.path().join("corpus/a.png"), 50., 60., 70.);
        write_png(&dir.path().join("corpus/b.png"), 70., 60., 50.);
        let report = engine.ensure_index().unwrap().unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(engine.index().unwrap().len(), 2);

        // 已有索引时不再构建
        let calls = embedder.calls.load(Ordering::SeqCst);
        assert!(engine.ensure_index().unwrap().is_none());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), calls);
    }
}
