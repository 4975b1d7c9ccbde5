use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Duration statistics reported by the insights API, in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurationMetrics {
    pub min: f64,
    pub max: f64,
    pub median: f64,
    pub mean: f64,
    pub p95: f64,
    pub standard_deviation: f64,
}

/// Aggregated execution statistics for a workflow or job over the reporting window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InsightMetrics {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    /// Fraction of successful runs, 0.0 to 1.0
    pub success_rate: f64,
    pub duration_metrics: DurationMetrics,
    pub throughput: f64,
}

/// One workflow's statistics for a (repository, branch).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowRecord {
    pub repo: String,
    pub branch: String,
    pub workflow: String,
    pub metrics: InsightMetrics,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

/// One job's statistics for a (repository, workflow, branch).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub repo: String,
    pub workflow: String,
    pub branch: String,
    pub job: String,
    pub metrics: InsightMetrics,
    pub window_start: Option<DateTime<Utc>>,
    pub window_end: Option<DateTime<Utc>>,
}

/// A (repository, workflow) pair observed during workflow collection.
///
/// Jobs can only be queried for workflows discovered in the same cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkflowScope {
    pub repo: String,
    pub workflow: String,
}

/// The unit pagination runs over: a repository and branch, optionally narrowed
/// to one workflow for job queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsightScope {
    pub repo: String,
    pub branch: String,
    pub workflow: Option<String>,
}

impl InsightScope {
    pub fn workflows(repo: &str, branch: &str) -> Self {
        Self {
            repo: repo.to_owned(),
            branch: branch.to_owned(),
            workflow: None,
        }
    }

    pub fn jobs(scope: &WorkflowScope, branch: &str) -> Self {
        Self {
            repo: scope.repo.clone(),
            branch: branch.to_owned(),
            workflow: Some(scope.workflow.clone()),
        }
    }
}

impl fmt::Display for InsightScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.workflow {
            Some(workflow) => write!(f, "{}@{} workflow={}", self.repo, self.branch, workflow),
            None => write!(f, "{}@{}", self.repo, self.branch),
        }
    }
}

/// Ordered repositories crossed with ordered branches.
///
/// Iteration is repository-major. Duplicates are kept: a repeated pair is
/// fetched twice and its samples overwrite each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoBranchSelector {
    pub repositories: Vec<String>,
    pub branches: Vec<String>,
}

impl RepoBranchSelector {
    pub fn new(repositories: Vec<String>, branches: Vec<String>) -> Self {
        Self {
            repositories,
            branches,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty() || self.branches.is_empty()
    }

    pub fn pairs(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.repositories.iter().flat_map(move |repo| {
            self.branches
                .iter()
                .map(move |branch| (repo.as_str(), branch.as_str()))
        })
    }
}
