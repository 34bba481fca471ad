use std::sync::LazyLock;

use prometheus::*;

static METRIC_QUERY_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "ss_retrieval_query_count",
        "count of retrieval queries by modality",
        &["modality"]
    )
    .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "ss_search_duration",
        "duration of a retrieval batch in seconds",
        &["modality"]
    )
    .unwrap()
});

static METRIC_TOP_SCORE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "ss_search_top_score",
        "top-1 similarity score of the per-query search",
        &["modality"],
        (0..=20).map(|x| x as f64 * 0.05).collect()
    )
    .unwrap()
});

/// 增加查询计数
pub fn inc_query_count(modality: &str) {
    METRIC_QUERY_COUNT.with_label_values(&[modality]).inc();
}

pub fn observe_search_duration(modality: &str, duration: f32) {
    METRIC_SEARCH_DURATION.with_label_values(&[modality]).observe(duration as f64);
}

pub fn observe_top_score(modality: &str, score: f32) {
    METRIC_TOP_SCORE.with_label_values(&[modality]).observe(score as f64);
}
