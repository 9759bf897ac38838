use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_IMAGE_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imclip_search_image_count", "count of the image to search", &["augmentation"])
        .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imclip_search_duration",
        "duration of the per-image search in seconds",
        &["augmentation", "stage"]
    )
    .unwrap()
});

static METRIC_SEARCH_MAX_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "imclip_search_max_score",
        "max cosine similarity of the per-image search",
        (1..=20).map(|x| x as f64 / 20.).collect()
    )
    .unwrap()
});

static METRIC_CACHE_LOOKUP: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!("imclip_cache_lookup", "query cache lookups", &["result"]).unwrap()
});

static METRIC_INDEX_SIZE: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("imclip_index_size", "number of images in the live index").unwrap()
});

fn augmentation_label(augmentation: bool) -> &'static str {
    if augmentation { "on" } else { "off" }
}

/// 增加搜索图片计数
pub fn inc_image_count(augmentation: bool) {
    METRIC_SEARCH_IMAGE_COUNT.with_label_values(&[augmentation_label(augmentation)]).inc();
}

/// 记录搜索各阶段耗时，`stage` 为 `feature_extraction`、`similarity_calculation`、`sorting` 或 `total`
pub fn observe_search_duration(augmentation: bool, stage: &str, seconds: f64) {
    METRIC_SEARCH_DURATION.with_label_values(&[augmentation_label(augmentation), stage]).observe(seconds);
}

pub fn observe_max_score(score: f32) {
    METRIC_SEARCH_MAX_SCORE.observe(score as f64);
}

pub fn inc_cache_lookup(hit: bool) {
    METRIC_CACHE_LOOKUP.with_label_values(&[if hit { "hit" } else { "miss" }]).inc();
}

pub fn set_index_size(size: usize) {
    METRIC_INDEX_SIZE.set(size as i64);
}

/// 以 Prometheus 文本格式导出所有指标
pub fn encode() -> Result<String> {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather())
}
