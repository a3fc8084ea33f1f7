//! Fetching the catalog's series for a run from the time series
//! database (VictoriaMetrics export API).

use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use anyhow::{anyhow, Context, Result};
use csv::ReaderBuilder;
use kstring::KString;
use reqwest::blocking::{Client, Response};

use crate::{
    config::{MetricsDbConfig, MetricsFormat},
    context::EvalContext,
    debug,
    descriptor::TimeWindow,
    error::PipelineError,
    info,
    metrics::{catalog::MetricQuery, sample::MetricSample},
    warn,
};

const CSV_EXPORT_FORMAT: &str = "__name__,__timestamp__:unix_s,__value__";

fn endpoint(base: &str, format: MetricsFormat) -> String {
    let path = match format {
        MetricsFormat::Csv => "/api/v1/export/csv",
        MetricsFormat::Json => "/api/v1/export",
    };
    let base = base.trim_end_matches('/');
    if base.contains("://") {
        format!("{base}{path}")
    } else {
        format!("http://{base}{path}")
    }
}

/// Parse the flat encoding: `name,unix seconds,value` per line, no
/// header. The samples carry no task labels.
pub fn parse_csv_export(metric: &str, body: &str) -> Result<Vec<MetricSample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .from_reader(body.as_bytes());
    let mut samples = Vec::new();
    for record in reader.records() {
        let record = record?;
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let (Some(ts), Some(value)) = (record.get(1), record.get(2)) else {
            return Err(anyhow!("line {line}: expected 3 fields, got {}", record.len()));
        };
        let ts: f64 = ts
            .trim()
            .parse()
            .map_err(|e| anyhow!("line {line}: invalid timestamp {ts:?}: {e}"))?;
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|e| anyhow!("line {line}: invalid value {value:?}: {e}"))?;
        if ts < 0. {
            return Err(anyhow!("line {line}: negative timestamp"));
        }
        samples.push(MetricSample::new(
            (ts * 1000.).round() as u64,
            metric,
            None,
            None,
            value,
        ));
    }
    Ok(samples)
}

#[derive(Debug, serde::Deserialize)]
struct ExportedSeries {
    metric: BTreeMap<String, String>,
    values: Vec<Option<f64>>,
    /// Unix milliseconds
    timestamps: Vec<u64>,
}

/// Parse the structured encoding: one JSON object per series, with
/// `task_name` and `subtask_index` labels. Objects may also follow
/// each other without line breaks.
pub fn parse_json_export(metric: &str, body: &str) -> Result<Vec<MetricSample>> {
    let mut samples = Vec::new();
    for (i, series) in serde_json::Deserializer::from_str(body)
        .into_iter::<ExportedSeries>()
        .enumerate()
    {
        let ExportedSeries {
            metric: labels,
            values,
            timestamps,
        } = series.with_context(|| anyhow!("series {i}"))?;
        if values.len() != timestamps.len() {
            return Err(anyhow!(
                "series {i}: {} values but {} timestamps",
                values.len(),
                timestamps.len()
            ));
        }
        let task = labels.get("task_name").map(|s| s.as_str());
        let subtask = match labels.get("subtask_index") {
            Some(s) => Some(
                s.parse()
                    .map_err(|e| anyhow!("series {i}: invalid subtask_index {s:?}: {e}"))?,
            ),
            None => None,
        };
        for (value, ts) in values.into_iter().zip(timestamps) {
            if let Some(value) = value {
                samples.push(MetricSample::new(ts, metric, task, subtask, value));
            }
        }
    }
    Ok(samples)
}

/// Samples are always taken from the json encoding, the flat one
/// has no task labels to split subtasks by. With `format: csv` the
/// flat responses are additionally kept in `flat_export_dir`.
#[derive(Debug)]
pub struct MetricsDbSource<'c> {
    pub config: &'c MetricsDbConfig,
    pub window: TimeWindow,
    pub flat_export_dir: Option<PathBuf>,
}

pub fn flat_export_file_name(metric: &str) -> String {
    format!("{metric}_flat.csv")
}

impl<'c> MetricsDbSource<'c> {
    /// Try the configured URLs in order until one answers
    /// successfully.
    fn fetch(
        &self,
        ctx: &EvalContext,
        client: &Client,
        query: &MetricQuery,
        format: MetricsFormat,
    ) -> Result<Response> {
        let start = self.window.start.to_string();
        let end = self.window.end.to_string();
        let step = format!("{}s", self.config.step_s);
        let mut params: Vec<(&str, &str)> = vec![
            ("match[]", query.query.as_str()),
            ("start", start.as_str()),
            ("end", end.as_str()),
            ("step", step.as_str()),
        ];
        if format == MetricsFormat::Csv {
            params.push(("format", CSV_EXPORT_FORMAT));
        }

        let mut tried = Vec::new();
        let mut last_error = String::new();
        for base in self.config.urls() {
            let url = endpoint(base, format);
            debug!(ctx, "querying {url} for {}", query.query);
            match client
                .get(&url)
                .query(&params)
                .send()
                .and_then(|r| r.error_for_status())
            {
                Ok(response) => return Ok(response),
                Err(e) => {
                    warn!(ctx, "metrics database {base} failed: {e}");
                    last_error = e.to_string();
                    tried.push(base.to_string());
                }
            }
        }
        Err(PipelineError::ConnectionExhausted { tried, last_error }.into())
    }

    fn fetch_text(
        &self,
        ctx: &EvalContext,
        client: &Client,
        query: &MetricQuery,
        format: MetricsFormat,
    ) -> Result<String> {
        self.fetch(ctx, client, query, format)?
            .text()
            .with_context(|| anyhow!("reading response for {}", query.query))
    }

    /// Fetch the flat encoding of `query` and save it unchanged, after
    /// checking that it parses.
    fn keep_flat_export(&self, ctx: &EvalContext, client: &Client, query: &MetricQuery) -> Result<()> {
        let Some(dir) = &self.flat_export_dir else {
            return Ok(());
        };
        let body = self.fetch_text(ctx, client, query, MetricsFormat::Csv)?;
        let n = parse_csv_export(&query.name, &body)
            .with_context(|| anyhow!("parsing flat response for {}", query.query))?
            .len();
        std::fs::create_dir_all(dir).with_context(|| anyhow!("creating directory {dir:?}"))?;
        let path = dir.join(flat_export_file_name(&query.name));
        std::fs::write(&path, &body).with_context(|| anyhow!("writing {path:?}"))?;
        debug!(ctx, "wrote {path:?} ({n} samples)");
        Ok(())
    }

    /// Samples per catalog entry name; entries without data are
    /// missing from the result.
    pub fn load(
        &self,
        ctx: &EvalContext,
        catalog: &[MetricQuery],
    ) -> Result<BTreeMap<KString, Vec<MetricSample>>> {
        let client = Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_s))
            .build()
            .with_context(|| anyhow!("building HTTP client"))?;
        let mut result = BTreeMap::new();
        for query in catalog {
            let body = self.fetch_text(ctx, &client, query, MetricsFormat::Json)?;
            if body.trim().is_empty() {
                warn!(ctx, "no data returned for {}", query.query);
                continue;
            }
            let samples = parse_json_export(&query.name, &body)
                .with_context(|| anyhow!("parsing response for {}", query.query))?;
            if self.config.format == MetricsFormat::Csv {
                self.keep_flat_export(ctx, &client, query)?;
            }
            info!(ctx, "loaded {} samples of {}", samples.len(), query.query);
            result.insert(query.name.clone(), samples);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, BufReader, Write},
        net::TcpListener,
    };

    use super::*;
    use crate::{
        config::default_derived_metrics,
        descriptor::ExperimentDescriptor,
        metrics::{
            catalog::{default_catalog, THROUGHPUT_METRIC},
            processor::MetricsProcessor,
        },
        process::single::derive_metrics,
        table::column_key::ColumnKey,
        utillib::logging::LogLevel,
    };

    fn quiet() -> EvalContext {
        EvalContext {
            log_level: LogLevel::Quiet,
            ..Default::default()
        }
    }

    /// A server answering each request on its own connection: `flat`
    /// for the csv endpoint, `json` otherwise. Returns its address.
    fn serve(json: &'static str, flat: &'static str) -> Result<String> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?.to_string();
        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let mut stream = stream.unwrap();
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request_line = String::new();
                reader.read_line(&mut request_line).unwrap();
                loop {
                    let mut header = String::new();
                    if reader.read_line(&mut header).unwrap() <= 2 {
                        break;
                    }
                }
                let body = if request_line.contains("/export/csv") {
                    flat
                } else {
                    json
                };
                write!(
                    stream,
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
            }
        });
        Ok(addr)
    }

    #[test]
    fn t_endpoint() {
        assert_eq!(
            endpoint("localhost:8428", MetricsFormat::Csv),
            "http://localhost:8428/api/v1/export/csv"
        );
        assert_eq!(
            endpoint("https://vm.example.org/", MetricsFormat::Json),
            "https://vm.example.org/api/v1/export"
        );
    }

    #[test]
    fn t_parse_csv() -> Result<()> {
        let samples = parse_csv_export("rate", "flink_x,1700000000,12.5\nflink_x,1700000005,13\n")?;
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].timestamp_ms, 1_700_000_000_000);
        assert_eq!(samples[1].value, 13.);
        assert_eq!(samples[0].task, None);
        assert!(parse_csv_export("rate", "flink_x,abc,1\n").is_err());
        Ok(())
    }

    #[test]
    fn t_parse_json() -> Result<()> {
        let body = concat!(
            r#"{"metric":{"__name__":"x","task_name":"Map","subtask_index":"1"},"values":[1,2],"timestamps":[1000,6000]}"#,
            "\n",
            r#"{"metric":{"__name__":"x"},"values":[3],"timestamps":[1000]}"#,
            r#"{"metric":{"__name__":"x","task_name":"Map","subtask_index":"0"},"values":[null],"timestamps":[1000]}"#,
        );
        let samples = parse_json_export("rate", body)?;
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].task.as_deref(), Some("Map"));
        assert_eq!(samples[0].subtask, Some(1));
        assert_eq!(samples[1].timestamp_ms, 6000);
        assert_eq!(samples[2].task, None);

        assert!(parse_json_export(
            "rate",
            r#"{"metric":{},"values":[1,2],"timestamps":[1]}"#
        )
        .is_err());
        Ok(())
    }

    #[test]
    fn t_fallback_exhaustion() {
        let config = MetricsDbConfig {
            url: "127.0.0.1:1".into(),
            fallback_urls: vec!["127.0.0.1:2".into()],
            timeout_s: 2,
            ..Default::default()
        };
        let ctx = quiet();
        let source = MetricsDbSource {
            config: &config,
            window: TimeWindow { start: 0, end: 10 },
            flat_export_dir: None,
        };
        let e = source.load(&ctx, &default_catalog()).unwrap_err();
        match PipelineError::find(&e) {
            Some(PipelineError::ConnectionExhausted { tried, .. }) => {
                assert_eq!(tried, &["127.0.0.1:1", "127.0.0.1:2"])
            }
            _ => panic!("expected ConnectionExhausted, got {e:?}"),
        }
    }

    #[test]
    fn t_flat_format_still_sums_subtasks() -> Result<()> {
        let json = concat!(
            r#"{"metric":{"task_name":"Map","subtask_index":"0"},"values":[10],"timestamps":[1000]}"#,
            "\n",
            r#"{"metric":{"task_name":"Map","subtask_index":"1"},"values":[20],"timestamps":[1000]}"#,
            "\n",
        );
        let flat = "flink_x,1,10\nflink_x,1,20\n";
        let config = MetricsDbConfig {
            url: serve(json, flat)?,
            fallback_urls: Vec::new(),
            format: MetricsFormat::Csv,
            timeout_s: 5,
            ..Default::default()
        };
        let catalog: Vec<MetricQuery> = default_catalog()
            .into_iter()
            .filter(|q| q.name.as_str() == THROUGHPUT_METRIC)
            .collect();
        let dir = tempfile::tempdir()?;
        let source = MetricsDbSource {
            config: &config,
            window: TimeWindow { start: 0, end: 10 },
            flat_export_dir: Some(dir.path().to_owned()),
        };
        let ctx = quiet();
        let raw = source.load(&ctx, &catalog)?;
        assert!(raw[THROUGHPUT_METRIC].iter().all(|s| s.task.as_deref() == Some("Map")));

        let descriptor = ExperimentDescriptor::from_json_str(
            r#"{"timestamps": {"start": 0, "end": 10}, "parallelism_events": [{"timestamp": 0, "parallelism": 2}]}"#,
        )?;
        let table = MetricsProcessor {
            catalog: &catalog,
            operator_task: "Map",
        }
        .build_unified_table(&ctx, &raw, &descriptor)?;
        let derived = derive_metrics(&table, &default_derived_metrics()[..1], "Map")?;
        assert_eq!(derived.get(&0, &ColumnKey::plain("Throughput")), Some(30.));

        let kept = std::fs::read_to_string(dir.path().join(flat_export_file_name(THROUGHPUT_METRIC)))?;
        assert_eq!(kept, flat);
        Ok(())
    }
}
