//! Prometheus text exposition of a snapshot.
//!
//! Each committed snapshot is loaded into its own `prometheus::Registry` of
//! gauge vectors, so encoding a scrape never touches the refresh cycle's data.

use prometheus::{Encoder, GaugeVec, Opts, Registry, TextEncoder};

use super::snapshot::{Gauge, InsightGroup, Snapshot, NAMESPACE};
use crate::error::Result;

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Build a registry holding one gauge vector per (group, gauge) family.
pub fn build_registry(snapshot: &Snapshot) -> Result<Registry> {
    let registry = Registry::new();

    for group in InsightGroup::ALL {
        for gauge in Gauge::ALL {
            let opts = Opts::new(gauge.name(), gauge.help(group))
                .namespace(NAMESPACE)
                .subsystem(group.subsystem());
            let vec = GaugeVec::new(opts, group.label_names())?;

            for (labels, value) in snapshot.series(group, gauge) {
                let values: Vec<&str> = labels.iter().map(String::as_str).collect();
                vec.get_metric_with_label_values(&values)?.set(value);
            }

            registry.register(Box::new(vec))?;
        }
    }

    Ok(registry)
}

/// Encode everything in `registry` as exposition text.
pub fn encode(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&registry.gather(), &mut buffer)?;

    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("exposition is not UTF-8: {e}")).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::{DurationMetrics, InsightMetrics, JobRecord, WorkflowRecord};
    use chrono::Utc;

    fn sample_snapshot() -> Snapshot {
        let metrics = InsightMetrics {
            success_rate: 0.92,
            duration_metrics: DurationMetrics {
                min: 30.0,
                max: 400.0,
                median: 90.0,
                mean: 100.0,
                p95: 120.0,
                standard_deviation: 15.5,
            },
            ..InsightMetrics::default()
        };

        let mut snapshot = Snapshot::new(Utc::now());
        snapshot.record_workflow(&WorkflowRecord {
            repo: "orgA/r1".to_string(),
            branch: "main".to_string(),
            workflow: "build".to_string(),
            metrics: metrics.clone(),
            window_start: None,
            window_end: None,
        });
        snapshot.record_job(&JobRecord {
            repo: "orgA/r1".to_string(),
            workflow: "build".to_string(),
            branch: "main".to_string(),
            job: "compile".to_string(),
            metrics,
            window_start: None,
            window_end: None,
        });
        snapshot
    }

    #[test]
    fn renders_workflow_and_job_gauges() {
        let registry = build_registry(&sample_snapshot()).unwrap();
        let output = encode(&registry).unwrap();

        assert!(output.contains("# TYPE circleci_custom_workflow_insight_success_rate gauge"));
        assert!(output.contains("# HELP circleci_custom_workflow_insight_success_rate success rate of workflow"));
        assert!(output.contains(
            "circleci_custom_workflow_insight_success_rate{branch=\"main\",repo=\"orgA/r1\",workflow=\"build\"} 0.92"
        ));
        assert!(output.contains(
            "circleci_custom_workflow_insight_duration_metrics_p95{branch=\"main\",repo=\"orgA/r1\",workflow=\"build\"} 120"
        ));
        assert!(output.contains(
            "circleci_custom_job_insight_duration_metrics_standard_deviation{branch=\"main\",job=\"compile\",repo=\"orgA/r1\",workflow=\"build\"} 15.5"
        ));
    }

    #[test]
    fn every_sample_line_has_labels() {
        let registry = build_registry(&sample_snapshot()).unwrap();
        let output = encode(&registry).unwrap();

        let sample_lines: Vec<_> = output
            .lines()
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .collect();

        assert_eq!(sample_lines.len(), 12);
        for line in sample_lines {
            assert!(line.contains('{') && line.contains('}'), "line should have labels: {line}");
        }
    }

    #[test]
    fn empty_snapshot_renders_no_samples() {
        let registry = build_registry(&Snapshot::default()).unwrap();
        let output = encode(&registry).unwrap();

        assert!(output
            .lines()
            .all(|line| line.is_empty() || line.starts_with('#')));
    }

    #[test]
    fn content_type_is_text_format() {
        assert!(CONTENT_TYPE.starts_with("text/plain"));
    }
}
