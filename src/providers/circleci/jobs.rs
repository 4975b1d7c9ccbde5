use indexmap::IndexSet;
use log::{info, warn};

use super::client::InsightsClient;
use super::pagination::SkippedScope;
use crate::config::ReportingWindow;
use crate::error::Result;
use crate::insights::{InsightScope, JobRecord, WorkflowScope};

/// Output of one job collection pass.
#[derive(Debug, Default)]
pub struct JobCollection {
    pub records: Vec<JobRecord>,
    pub skipped: Vec<SkippedScope>,
}

impl InsightsClient {
    /// Collect job insights for every discovered workflow on every branch.
    ///
    /// Must run after [`InsightsClient::collect_workflows`] in the same cycle,
    /// since only workflows seen there are queried. Scope failures are handled
    /// the same way as for workflows.
    ///
    /// # Errors
    ///
    /// Returns the first transport error, abandoning the whole pass.
    pub async fn collect_jobs(
        &self,
        workflows: &IndexSet<WorkflowScope>,
        branches: &[String],
        window: ReportingWindow,
    ) -> Result<JobCollection> {
        let mut collection = JobCollection::default();

        for workflow in workflows {
            for branch in branches {
                let scope = InsightScope::jobs(workflow, branch);

                let items = match self.fetch_all_pages(&scope, window).await {
                    Ok(items) => items,
                    Err(e) if e.is_transport() => return Err(e),
                    Err(e) => {
                        warn!("Skipping job insights for {scope}: {e}");
                        collection.skipped.push(SkippedScope {
                            scope,
                            reason: e.to_string(),
                        });
                        continue;
                    }
                };

                collection
                    .records
                    .extend(items.into_iter().map(|item| JobRecord {
                        repo: workflow.repo.clone(),
                        workflow: workflow.workflow.clone(),
                        branch: branch.clone(),
                        job: item.name,
                        metrics: item.metrics,
                        window_start: item.window_start,
                        window_end: item.window_end,
                    }));
            }
        }

        info!(
            "Collected {} job records for {} workflows ({} scopes skipped)",
            collection.records.len(),
            workflows.len(),
            collection.skipped.len()
        );

        Ok(collection)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{item_json, page_json, test_client};
    use super::*;
    use mockito::Matcher;

    fn workflows(pairs: &[(&str, &str)]) -> IndexSet<WorkflowScope> {
        pairs
            .iter()
            .map(|(repo, workflow)| WorkflowScope {
                repo: repo.to_string(),
                workflow: workflow.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn queries_exact_repo_workflow_branch_triple() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/insights/gh/orgA/r1/workflows/build/jobs")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("branch".into(), "main".into()),
                Matcher::UrlEncoded("reporting-window".into(), "last-7-days".into()),
            ]))
            .with_status(200)
            .with_body(page_json(None, &[item_json("compile", 0.8, 45.0)]))
            .expect(1)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let collection = client
            .collect_jobs(
                &workflows(&[("orgA/r1", "build")]),
                &["main".to_string()],
                ReportingWindow::Last7Days,
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(collection.records.len(), 1);
        let record = &collection.records[0];
        assert_eq!(record.repo, "orgA/r1");
        assert_eq!(record.workflow, "build");
        assert_eq!(record.branch, "main");
        assert_eq!(record.job, "compile");
        assert_eq!(record.metrics.success_rate, 0.8);
        assert_eq!(record.metrics.duration_metrics.p95, 45.0);
    }

    #[tokio::test]
    async fn crosses_every_workflow_with_every_branch() {
        let mut server = mockito::Server::new_async().await;
        let build = server
            .mock("GET", "/insights/gh/orgA/r1/workflows/build/jobs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(page_json(None, &[item_json("compile", 1.0, 1.0)]))
            .expect(2)
            .create_async()
            .await;
        let deploy = server
            .mock("GET", "/insights/gh/orgA/r2/workflows/deploy/jobs")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(page_json(None, &[item_json("ship", 1.0, 1.0)]))
            .expect(2)
            .create_async()
            .await;

        let client = test_client(&server.url());
        let collection = client
            .collect_jobs(
                &workflows(&[("orgA/r1", "build"), ("orgA/r2", "deploy")]),
                &["main".to_string(), "dev".to_string()],
                ReportingWindow::Last7Days,
            )
            .await
            .unwrap();

        let order: Vec<_> = collection
            .records
            .iter()
            .map(|r| (r.workflow.as_str(), r.branch.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![
                ("build", "main"),
                ("build", "dev"),
                ("deploy", "main"),
                ("deploy", "dev"),
            ]
        );
        build.assert_async().await;
        deploy.assert_async().await;
    }

    #[tokio::test]
    async fn no_workflows_means_no_requests() {
        let client = test_client("http://127.0.0.1:1");

        let collection = client
            .collect_jobs(&IndexSet::new(), &["main".to_string()], ReportingWindow::Last7Days)
            .await
            .unwrap();

        assert!(collection.records.is_empty());
        assert!(collection.skipped.is_empty());
    }

    #[tokio::test]
    async fn failed_job_scope_is_skipped() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/insights/gh/orgA/r1/workflows/build/jobs")
            .match_query(Matcher::UrlEncoded("branch".into(), "main".into()))
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;
        server
            .mock("GET", "/insights/gh/orgA/r1/workflows/build/jobs")
            .match_query(Matcher::UrlEncoded("branch".into(), "dev".into()))
            .with_status(200)
            .with_body(page_json(None, &[item_json("compile", 1.0, 1.0)]))
            .create_async()
            .await;

        let client = test_client(&server.url());
        let collection = client
            .collect_jobs(
                &workflows(&[("orgA/r1", "build")]),
                &["main".to_string(), "dev".to_string()],
                ReportingWindow::Last7Days,
            )
            .await
            .unwrap();

        assert_eq!(collection.records.len(), 1);
        assert_eq!(collection.records[0].branch, "dev");
        assert_eq!(collection.skipped.len(), 1);
        assert_eq!(collection.skipped[0].scope.branch, "main");
    }
}
