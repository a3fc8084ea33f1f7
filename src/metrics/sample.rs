use kstring::KString;

/// One value of one time series, as fetched from the metrics
/// database. Series exported in the flat encoding carry no task or
/// subtask labels.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricSample {
    /// Unix milliseconds
    pub timestamp_ms: u64,
    pub metric: KString,
    pub task: Option<KString>,
    pub subtask: Option<u32>,
    pub value: f64,
}

impl MetricSample {
    pub fn new(
        timestamp_ms: u64,
        metric: &str,
        task: Option<&str>,
        subtask: Option<u32>,
        value: f64,
    ) -> Self {
        Self {
            timestamp_ms,
            metric: KString::from_ref(metric),
            task: task.map(KString::from_ref),
            subtask,
            value,
        }
    }
}
