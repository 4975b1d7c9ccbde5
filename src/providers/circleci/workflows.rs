use indexmap::IndexSet;
use log::{info, warn};

use super::client::InsightsClient;
use super::pagination::SkippedScope;
use crate::config::ReportingWindow;
use crate::error::Result;
use crate::insights::{InsightScope, RepoBranchSelector, WorkflowRecord, WorkflowScope};

/// Output of one workflow collection pass.
#[derive(Debug, Default)]
pub struct WorkflowCollection {
    /// Records in scope order, then page order
    pub records: Vec<WorkflowRecord>,
    /// Distinct (repo, workflow) pairs in first-seen order
    pub scopes: IndexSet<WorkflowScope>,
    pub skipped: Vec<SkippedScope>,
}

impl InsightsClient {
    /// Collect workflow insights for every (repository, branch) pair.
    ///
    /// A scope that answers with a non-2xx status, an undecodable page or a
    /// runaway cursor contributes nothing and is reported in `skipped`; the
    /// remaining scopes are still collected.
    ///
    /// # Errors
    ///
    /// Returns the first transport error, abandoning the whole pass.
    pub async fn collect_workflows(
        &self,
        selector: &RepoBranchSelector,
        window: ReportingWindow,
    ) -> Result<WorkflowCollection> {
        let mut collection = WorkflowCollection::default();

        for (repo, branch) in selector.pairs() {
            let scope = InsightScope::workflows(repo, branch);

            let items = match self.fetch_all_pages(&scope, window).await {
                Ok(items) => items,
                Err(e) if e.is_transport() => return Err(e),
                Err(e) => {
                    warn!("Skipping workflow insights for {scope}: {e}");
                    collection.skipped.push(SkippedScope {
                        scope,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            for item in items {
                collection.scopes.insert(WorkflowScope {
                    repo: repo.to_string(),
                    workflow: item.name.clone(),
                });
                collection.records.push(WorkflowRecord {
                    repo: repo.to_string(),
                    branch: branch.to_string(),
                    workflow: item.name,
                    metrics: item.metrics,
                    window_start: item.window_start,
                    window_end: item.window_end,
                });
            }
        }

        info!(
            "Collected {} workflow records across {} workflows ({} scopes skipped)",
            collection.records.len(),
            collection.scopes.len(),
            collection.skipped.len()
        );

        Ok(collection)
    }
}
