//! The fixed set of metric queries issued against the metrics
//! database for each run.

use kstring::KString;

/// How the series of a metric end up in the unified table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Scope {
    /// One column per subtask of the monitored operator
    PerSubtask,
    /// Like `PerSubtask`, plus one total column per task for the
    /// operator and for every source task
    SumAcrossSubtasks,
    /// Not task related (job manager, JVM): one plain column, the
    /// mean over all series
    Job,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricQuery {
    /// Metric name used in column keys and export file names
    pub name: KString,
    /// Series selector sent to the database
    pub query: String,
    pub scope: Scope,
}

/// Metric name of the per-subtask input rate, also used to count
/// active subtasks.
pub const THROUGHPUT_METRIC: &str = "numRecordsInPerSecond";

const DEFAULT_CATALOG: &[(&str, &str, Scope)] = &[
    (
        THROUGHPUT_METRIC,
        "flink_taskmanager_job_task_numRecordsInPerSecond",
        Scope::SumAcrossSubtasks,
    ),
    (
        "busyTimeMsPerSecond",
        "flink_taskmanager_job_task_busyTimeMsPerSecond",
        Scope::PerSubtask,
    ),
    (
        "hardBackPressuredTimeMsPerSecond",
        "flink_taskmanager_job_task_hardBackPressuredTimeMsPerSecond",
        Scope::PerSubtask,
    ),
    (
        "lastCheckpointDuration",
        "flink_jobmanager_job_lastCheckpointDuration",
        Scope::Job,
    ),
    (
        "checkpointStartDelayNanos",
        "flink_taskmanager_job_task_checkpointStartDelayNanos",
        Scope::PerSubtask,
    ),
    (
        "numLateRecordsDropped",
        "flink_taskmanager_job_task_operator_numLateRecordsDropped",
        Scope::SumAcrossSubtasks,
    ),
    (
        "JVM_CPU_Load",
        "flink_taskmanager_Status_JVM_CPU_Load",
        Scope::Job,
    ),
    (
        "JVM_CPU_Time",
        "flink_taskmanager_Status_JVM_CPU_Time",
        Scope::Job,
    ),
    (
        "JVM_Threads_Count",
        "flink_taskmanager_Status_JVM_Threads_Count",
        Scope::Job,
    ),
    (
        "JVM_Memory_Heap_Used",
        "flink_taskmanager_Status_JVM_Memory_Heap_Used",
        Scope::Job,
    ),
    (
        "Flink_Memory_Managed_Used",
        "flink_taskmanager_Status_Flink_Memory_Managed_Used",
        Scope::Job,
    ),
    (
        "G1_Young_Generation_Time",
        "flink_taskmanager_Status_JVM_GarbageCollector_G1_Young_Generation_Time",
        Scope::Job,
    ),
];

pub fn default_catalog() -> Vec<MetricQuery> {
    DEFAULT_CATALOG
        .iter()
        .map(|(name, query, scope)| MetricQuery {
            name: KString::from_static(*name),
            query: query.to_string(),
            scope: *scope,
        })
        .collect()
}

pub fn find_query<'c>(catalog: &'c [MetricQuery], name: &str) -> Option<&'c MetricQuery> {
    catalog.iter().find(|q| q.name.as_str() == name)
}

pub fn is_source_task(task: &str) -> bool {
    task.contains("Source")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn t_default_catalog() {
        let catalog = default_catalog();
        assert_eq!(catalog.len(), 12);
        let names: std::collections::BTreeSet<_> = catalog.iter().map(|q| &q.name).collect();
        assert_eq!(names.len(), catalog.len(), "names must be unique");
        assert_eq!(
            find_query(&catalog, THROUGHPUT_METRIC).map(|q| q.scope),
            Some(Scope::SumAcrossSubtasks)
        );
        assert!(find_query(&catalog, "nope").is_none());
    }

    #[test]
    fn t_source_task() {
        assert!(is_source_task("Source:_Source1"));
        assert!(!is_source_task("TumblingEventTimeWindows"));
    }
}
