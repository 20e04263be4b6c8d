use std::sync::LazyLock;

use prometheus::*;

static METRIC_SEARCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "face_search_count",
        "count of the face search requests",
        &["outcome"]
    )
    .unwrap()
});

static METRIC_SEARCH_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "face_search_duration",
        "duration of the per-image face search in seconds",
        &["outcome"]
    )
    .unwrap()
});

static METRIC_SEARCH_TOP_SCORE: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "face_search_top_score",
        "similarity of the best match of the per-image search",
        (-10..=10).map(|x| x as f64 / 10.0).collect()
    )
    .unwrap()
});

static METRIC_CATALOG_FACES: LazyLock<IntGauge> = LazyLock::new(|| {
    register_int_gauge!("face_catalog_faces", "number of faces in the loaded catalog").unwrap()
});

/// 搜索的结果类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Matched,
    NoFace,
    Error,
}

impl Outcome {
    fn label(self) -> &'static str {
        match self {
            Self::Matched => "matched",
            Self::NoFace => "no_face",
            Self::Error => "error",
        }
    }
}

/// 记录一次搜索
pub fn observe_search(outcome: Outcome, duration: f32) {
    METRIC_SEARCH_COUNT.with_label_values(&[outcome.label()]).inc();
    METRIC_SEARCH_DURATION.with_label_values(&[outcome.label()]).observe(duration as f64);
}

pub fn observe_top_score(score: f32) {
    METRIC_SEARCH_TOP_SCORE.observe(score as f64);
}

pub fn set_catalog_faces(count: usize) {
    METRIC_CATALOG_FACES.set(count as i64);
}

/// 以文本格式导出所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&gather()).unwrap_or_else(|e| format!("# {e}\n"))
}
