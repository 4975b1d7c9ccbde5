use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::insights::{InsightMetrics, JobRecord, WorkflowRecord};

pub const NAMESPACE: &str = "circleci_custom";

/// Which insights listing a series came from. Decides the subsystem and the
/// label names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InsightGroup {
    Workflow,
    Job,
}

impl InsightGroup {
    pub const ALL: [Self; 2] = [Self::Workflow, Self::Job];

    pub fn subsystem(self) -> &'static str {
        match self {
            Self::Workflow => "workflow_insight",
            Self::Job => "job_insight",
        }
    }

    pub fn label_names(self) -> &'static [&'static str] {
        match self {
            Self::Workflow => &["workflow", "repo", "branch"],
            Self::Job => &["job", "workflow", "repo", "branch"],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Gauge {
    SuccessRate,
    DurationMin,
    DurationMax,
    DurationMedian,
    DurationP95,
    DurationStandardDeviation,
}

impl Gauge {
    pub const ALL: [Self; 6] = [
        Self::SuccessRate,
        Self::DurationMin,
        Self::DurationMax,
        Self::DurationMedian,
        Self::DurationP95,
        Self::DurationStandardDeviation,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::SuccessRate => "success_rate",
            Self::DurationMin => "duration_metrics_min",
            Self::DurationMax => "duration_metrics_max",
            Self::DurationMedian => "duration_metrics_median",
            Self::DurationP95 => "duration_metrics_p95",
            Self::DurationStandardDeviation => "duration_metrics_standard_deviation",
        }
    }

    pub fn help(self, group: InsightGroup) -> &'static str {
        match (self, group) {
            (Self::SuccessRate, InsightGroup::Workflow) => "success rate of workflow",
            (Self::SuccessRate, InsightGroup::Job) => "success rate of job",
            (Self::DurationMin, _) => "minimum duration metrics",
            (Self::DurationMax, _) => "maximum duration metrics",
            (Self::DurationMedian, _) => "median of duration metrics",
            (Self::DurationP95, _) => "95 percentile of duration metrics",
            (Self::DurationStandardDeviation, _) => "standard deviation of duration metrics",
        }
    }

    pub fn value(self, metrics: &InsightMetrics) -> f64 {
        let durations = &metrics.duration_metrics;
        match self {
            Self::SuccessRate => metrics.success_rate,
            Self::DurationMin => durations.min,
            Self::DurationMax => durations.max,
            Self::DurationMedian => durations.median,
            Self::DurationP95 => durations.p95,
            Self::DurationStandardDeviation => durations.standard_deviation,
        }
    }
}

/// Identifies one gauge family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MetricKey {
    pub group: InsightGroup,
    pub gauge: Gauge,
}

impl MetricKey {
    pub fn full_name(self) -> String {
        format!(
            "{}_{}_{}",
            NAMESPACE,
            self.group.subsystem(),
            self.gauge.name()
        )
    }
}

/// A single exported value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

/// Label values in the order given by [`InsightGroup::label_names`].
pub type LabelValues = Vec<String>;

/// The complete metric set produced by one refresh cycle.
///
/// Holds at most one value per (family, label values); later writes replace
/// earlier ones.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    families: BTreeMap<MetricKey, BTreeMap<LabelValues, f64>>,
    collected_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    pub fn new(collected_at: DateTime<Utc>) -> Self {
        Self {
            families: BTreeMap::new(),
            collected_at: Some(collected_at),
        }
    }

    /// When the data was collected; `None` before the first successful cycle.
    pub fn collected_at(&self) -> Option<DateTime<Utc>> {
        self.collected_at
    }

    pub fn record_workflow(&mut self, record: &WorkflowRecord) {
        let labels = vec![
            record.workflow.clone(),
            record.repo.clone(),
            record.branch.clone(),
        ];
        self.record(InsightGroup::Workflow, labels, &record.metrics);
    }

    pub fn record_job(&mut self, record: &JobRecord) {
        let labels = vec![
            record.job.clone(),
            record.workflow.clone(),
            record.repo.clone(),
            record.branch.clone(),
        ];
        self.record(InsightGroup::Job, labels, &record.metrics);
    }

    fn record(&mut self, group: InsightGroup, labels: LabelValues, metrics: &InsightMetrics) {
        for gauge in Gauge::ALL {
            self.families
                .entry(MetricKey { group, gauge })
                .or_default()
                .insert(labels.clone(), gauge.value(metrics));
        }
    }

    #[cfg(test)]
    pub fn get(&self, group: InsightGroup, gauge: Gauge, labels: &[&str]) -> Option<f64> {
        self.families
            .get(&MetricKey { group, gauge })?
            .iter()
            .find(|(values, _)| values.iter().map(String::as_str).eq(labels.iter().copied()))
            .map(|(_, value)| *value)
    }

    /// Series of one family, ordered by label values.
    pub fn series(
        &self,
        group: InsightGroup,
        gauge: Gauge,
    ) -> impl Iterator<Item = (&LabelValues, f64)> + '_ {
        self.families
            .get(&MetricKey { group, gauge })
            .into_iter()
            .flat_map(|series| series.iter().map(|(labels, value)| (labels, *value)))
    }

    /// Number of samples across all families.
    pub fn len(&self) -> usize {
        self.families.values().map(BTreeMap::len).sum()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every sample, ordered by family then label values.
    pub fn samples(&self) -> Vec<MetricSample> {
        self.families
            .iter()
            .flat_map(|(key, series)| {
                let names = key.group.label_names();
                series.iter().map(move |(values, value)| MetricSample {
                    name: key.full_name(),
                    labels: names
                        .iter()
                        .map(ToString::to_string)
                        .zip(values.iter().cloned())
                        .collect(),
                    value: *value,
                })
            })
            .collect()
    }
}
