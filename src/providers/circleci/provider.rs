use chrono::Utc;
use log::{info, warn};

use super::client::InsightsClient;
use super::pagination::SkippedScope;
use crate::config::{ReportingWindow, Settings};
use crate::error::Result;
use crate::insights::{JobRecord, RepoBranchSelector, WorkflowRecord};
use crate::metrics::Snapshot;

/// Result of one collection cycle, ready to be committed.
#[derive(Debug)]
pub struct CycleReport {
    pub snapshot: Snapshot,
    pub workflows: Vec<WorkflowRecord>,
    pub jobs: Vec<JobRecord>,
    /// Scopes that contributed nothing this cycle
    pub skipped: Vec<SkippedScope>,
}

/// CircleCI insights provider.
///
/// Runs the workflow pass, then the job pass over the workflows it discovered,
/// and folds both into a fresh [`Snapshot`].
pub struct CircleCiProvider {
    client: InsightsClient,
    selector: RepoBranchSelector,
    reporting_window: ReportingWindow,
}

impl CircleCiProvider {
    /// # Errors
    ///
    /// Returns a configuration error if the HTTP client cannot be built.
    pub fn new(settings: &Settings) -> Result<Self> {
        let client = InsightsClient::new(
            settings.api_url.clone(),
            settings.vcs,
            &settings.token,
            settings.request_timeout,
            settings.max_pages,
        )?;

        Ok(Self::with_client(
            client,
            settings.selector.clone(),
            settings.reporting_window,
        ))
    }

    pub fn with_client(
        client: InsightsClient,
        selector: RepoBranchSelector,
        reporting_window: ReportingWindow,
    ) -> Self {
        Self {
            client,
            selector,
            reporting_window,
        }
    }

    /// Collect workflow and job insights into a new snapshot.
    ///
    /// # Errors
    ///
    /// Returns a transport error if any request could not be completed; no
    /// partial snapshot is produced in that case.
    pub async fn collect_snapshot(&self) -> Result<CycleReport> {
        let started_at = Utc::now();

        if self.selector.is_empty() {
            warn!("No repositories or branches configured, nothing to collect");
            return Ok(CycleReport {
                snapshot: Snapshot::new(started_at),
                workflows: Vec::new(),
                jobs: Vec::new(),
                skipped: Vec::new(),
            });
        }

        info!(
            "Collecting {} insights for {} repositories x {} branches",
            self.reporting_window,
            self.selector.repositories.len(),
            self.selector.branches.len()
        );

        let workflows = self
            .client
            .collect_workflows(&self.selector, self.reporting_window)
            .await?;

        let jobs = self
            .client
            .collect_jobs(
                &workflows.scopes,
                &self.selector.branches,
                self.reporting_window,
            )
            .await?;

        let mut snapshot = Snapshot::new(started_at);
        for record in &workflows.records {
            snapshot.record_workflow(record);
        }
        for record in &jobs.records {
            snapshot.record_job(record);
        }

        let mut skipped = workflows.skipped;
        skipped.extend(jobs.skipped);

        Ok(CycleReport {
            snapshot,
            workflows: workflows.records,
            jobs: jobs.records,
            skipped,
        })
    }
}
