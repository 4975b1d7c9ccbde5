use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use log::info;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;

use crate::config::{FailurePolicy, FileConfig, Overrides, Settings};
use crate::error::ExporterError;
use crate::insights::{JobRecord, WorkflowRecord};
use crate::metrics::{MetricRegistry, MetricSample};
use crate::providers::{CircleCiProvider, CycleReport};
use crate::refresh::RefreshLoop;
use crate::server;

#[derive(Parser)]
#[command(name = "circleci-exporter")]
#[command(author, version, about = "Prometheus exporter for CircleCI insights", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    settings: SettingsArgs,
}

#[derive(Args)]
struct SettingsArgs {
    /// Configuration file (defaults to ./circleci-exporter.{toml,json,yaml,yml})
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[arg(short, long, global = true, env = "CIRCLECI_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[arg(long, global = true, env = "CIRCLECI_API_URL")]
    api_url: Option<String>,

    /// Comma-separated GitHub repositories (org/repo)
    #[arg(long, global = true, env = "GITHUB_REPOSITORY")]
    github_repository: Option<String>,

    /// Comma-separated GitHub branches
    #[arg(long, global = true, env = "GITHUB_BRANCH")]
    github_branch: Option<String>,

    /// Comma-separated Bitbucket repositories (workspace/repo)
    #[arg(long, global = true, env = "BITBUCKET_REPOSITORY")]
    bitbucket_repository: Option<String>,

    /// Comma-separated Bitbucket branches
    #[arg(long, global = true, env = "BITBUCKET_BRANCH")]
    bitbucket_branch: Option<String>,

    /// last-24-hours, last-7-days, last-30-days, last-60-days or last-90-days
    #[arg(long, global = true, env = "REPORTING_WINDOW")]
    reporting_window: Option<String>,

    /// Seconds between refresh cycles
    #[arg(short, long, global = true, env = "CIRCLECI_API_INTERVAL")]
    interval: Option<u64>,

    #[arg(short, long, global = true, env = "PORT")]
    port: Option<u16>,

    /// Per-request timeout in seconds
    #[arg(long, global = true)]
    request_timeout: Option<u64>,

    /// Page limit per scope before pagination is considered runaway
    #[arg(long, global = true)]
    max_pages: Option<usize>,

    #[arg(long, global = true, value_enum)]
    on_error: Option<FailurePolicy>,
}

/// `collect --json` document: the raw insights records alongside the
/// samples they produce.
#[derive(Serialize)]
struct CollectOutput {
    collected_at: Option<DateTime<Utc>>,
    workflows: Vec<WorkflowRecord>,
    jobs: Vec<JobRecord>,
    skipped: Vec<String>,
    samples: Vec<MetricSample>,
}

impl From<CycleReport> for CollectOutput {
    fn from(report: CycleReport) -> Self {
        Self {
            collected_at: report.snapshot.collected_at(),
            samples: report.snapshot.samples(),
            skipped: report
                .skipped
                .iter()
                .map(|s| format!("{}: {}", s.scope, s.reason))
                .collect(),
            workflows: report.workflows,
            jobs: report.jobs,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh insights in the background and serve /metrics (default)
    Serve,

    /// Run a single refresh cycle and print the result
    Collect {
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print records and samples as JSON instead of exposition text
        #[arg(long, default_value_t = false)]
        json: bool,

        #[arg(long, default_value_t = false, requires = "json")]
        pretty: bool,
    },
}

impl SettingsArgs {
    fn overrides(&self) -> Overrides {
        Overrides {
            token: self.token.clone(),
            api_url: self.api_url.clone(),
            github_repositories: self.github_repository.clone(),
            github_branches: self.github_branch.clone(),
            bitbucket_repositories: self.bitbucket_repository.clone(),
            bitbucket_branches: self.bitbucket_branch.clone(),
            reporting_window: self.reporting_window.clone(),
            interval: self.interval,
            port: self.port,
            request_timeout: self.request_timeout,
            max_pages: self.max_pages,
            on_error: self.on_error,
        }
    }

    fn resolve(&self) -> Result<Settings> {
        let file = FileConfig::load(self.config.as_deref())?;
        let settings = Settings::resolve(file, self.overrides())?;

        info!(
            "Configured {} repositories x {} branches on {}, window {}",
            settings.selector.repositories.len(),
            settings.selector.branches.len(),
            settings.vcs.as_str(),
            settings.reporting_window
        );

        Ok(settings)
    }
}

impl Cli {
    async fn execute_serve(&self, settings: Settings) -> Result<()> {
        let registry = Arc::new(MetricRegistry::new());
        let provider = CircleCiProvider::new(&settings)?;
        let refresher = RefreshLoop::new(
            provider,
            Arc::clone(&registry),
            settings.interval,
            settings.on_error,
        );

        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, settings.port));
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shutdown_tx = Arc::new(shutdown_tx);

        let signal_tx = Arc::clone(&shutdown_tx);
        tokio::spawn(async move {
            server::shutdown_signal().await;
            signal_tx.send_replace(true);
        });

        let mut server_rx = shutdown_tx.subscribe();
        let mut server = tokio::spawn(server::serve(listener, registry, async move {
            let _ = server_rx.wait_for(|stop| *stop).await;
        }));
        let mut refresh = tokio::spawn(async move { refresher.run(shutdown_rx).await });

        tokio::select! {
            joined = &mut refresh => {
                shutdown_tx.send_replace(true);
                let refreshed = joined.context("Refresh task failed")?;
                server.await.context("Server task failed")??;
                refreshed?;
            }
            joined = &mut server => {
                shutdown_tx.send_replace(true);
                let served = joined.context("Server task failed")?;
                refresh.await.context("Refresh task failed")??;
                served?;
            }
        }

        info!("Exporter stopped");
        Ok(())
    }

    async fn execute_collect(
        &self,
        settings: Settings,
        output: Option<&PathBuf>,
        json: bool,
        pretty: bool,
    ) -> Result<()> {
        let provider = CircleCiProvider::new(&settings)?;
        let report = provider.collect_snapshot().await?;

        if !report.skipped.is_empty() && settings.on_error == FailurePolicy::Exit {
            bail!(ExporterError::ScopesSkipped(report.skipped.len()));
        }

        let rendered = if json {
            let collected = CollectOutput::from(report);
            if pretty {
                serde_json::to_string_pretty(&collected)?
            } else {
                serde_json::to_string(&collected)?
            }
        } else {
            let registry = MetricRegistry::new();
            registry.commit(report.snapshot)?;
            registry.render()?
        };

        if let Some(output_path) = output {
            std::fs::write(output_path, rendered)?;
            info!("Metrics written to: {}", output_path.display());
        } else {
            println!("{}", rendered);
        }

        Ok(())
    }

    pub async fn execute(&self) -> Result<()> {
        let settings = self.settings.resolve()?;

        match &self.command {
            None | Some(Commands::Serve) => self.execute_serve(settings).await,
            Some(Commands::Collect {
                output,
                json,
                pretty,
            }) => {
                self.execute_collect(settings, output.as_ref(), *json, *pretty)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::{DurationMetrics, InsightMetrics};
    use crate::metrics::Snapshot;
    use clap::CommandFactory;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["circleci-exporter", "--token", "abc"]).unwrap();

        assert!(cli.command.is_none());
        assert_eq!(cli.settings.token.as_deref(), Some("abc"));
    }

    #[test]
    fn settings_flags_are_accepted_after_subcommand() {
        let cli = Cli::try_parse_from([
            "circleci-exporter",
            "collect",
            "--json",
            "--github-repository",
            "orgA/r1,orgA/r2",
            "--on-error",
            "exit",
        ])
        .unwrap();

        assert!(matches!(
            cli.command,
            Some(Commands::Collect { json: true, .. })
        ));
        let overrides = cli.settings.overrides();
        assert_eq!(
            overrides.github_repositories.as_deref(),
            Some("orgA/r1,orgA/r2")
        );
        assert_eq!(overrides.on_error, Some(FailurePolicy::Exit));
    }

    #[test]
    fn pretty_requires_json() {
        let result = Cli::try_parse_from(["circleci-exporter", "collect", "--pretty"]);

        assert!(result.is_err());
    }

    #[test]
    fn unknown_failure_policy_is_rejected() {
        let result = Cli::try_parse_from(["circleci-exporter", "--on-error", "retry"]);

        assert!(result.is_err());
    }

    #[test]
    fn collect_json_carries_records_and_samples() {
        let started: DateTime<Utc> = "2024-01-08T00:00:00Z".parse().unwrap();
        let record = WorkflowRecord {
            repo: "orgA/r1".to_string(),
            branch: "main".to_string(),
            workflow: "build".to_string(),
            metrics: InsightMetrics {
                total_runs: 10,
                successful_runs: 9,
                failed_runs: 1,
                success_rate: 0.9,
                duration_metrics: DurationMetrics {
                    mean: 75.0,
                    ..DurationMetrics::default()
                },
                throughput: 1.4,
            },
            window_start: Some("2024-01-01T00:00:00Z".parse().unwrap()),
            window_end: Some(started),
        };
        let mut snapshot = Snapshot::new(started);
        snapshot.record_workflow(&record);
        let report = CycleReport {
            snapshot,
            workflows: vec![record],
            jobs: Vec::new(),
            skipped: Vec::new(),
        };

        let value = serde_json::to_value(CollectOutput::from(report)).unwrap();

        assert_eq!(value["collected_at"], "2024-01-08T00:00:00Z");
        let workflow = &value["workflows"][0];
        assert_eq!(workflow["workflow"], "build");
        assert_eq!(workflow["metrics"]["total_runs"], 10);
        assert_eq!(workflow["metrics"]["throughput"], 1.4);
        assert_eq!(workflow["metrics"]["duration_metrics"]["mean"], 75.0);
        assert_eq!(workflow["window_start"], "2024-01-01T00:00:00Z");
        assert_eq!(value["jobs"].as_array().unwrap().len(), 0);
        assert_eq!(value["samples"].as_array().unwrap().len(), 6);
        assert_eq!(
            value["samples"][0]["name"],
            "circleci_custom_workflow_insight_success_rate"
        );
    }
}
